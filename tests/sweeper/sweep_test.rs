//! Background sweeping against the engine and a host repository.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use quietkey::config::Config;
use quietkey::policy::{AccessPolicyEngine, GatingEnvelope, ResourceKind, ResourceRecord};
use quietkey::repository::{InMemoryRepository, Repository, RepositoryError, RepositoryEvent};
use quietkey::sweeper::ExpirySweeper;
use quietkey::types::ActorId;
use quietkey::vault::shard::ShardRequirement;
use tokio::sync::watch;
use tokio_stream::StreamExt;

fn engine() -> Arc<AccessPolicyEngine> {
    let engine = Arc::new(AccessPolicyEngine::new(Config::default()));
    engine.issue_bundle("alice").expect("issue");
    engine
}

fn protect(engine: &AccessPolicyEngine, created: DateTime<Utc>, ttl: Duration) -> ResourceRecord {
    engine
        .protect(
            &ActorId::new("alice"),
            ResourceKind::Media {
                mime_type: "image/png".to_owned(),
            },
            b"pixels",
            GatingEnvelope::new(vec![ShardRequirement::Device]).expires_at(created + ttl),
            created,
        )
        .expect("protect")
}

async fn store(repo: &InMemoryRepository<ResourceRecord>, record: &ResourceRecord) {
    repo.create(&record.id.to_string(), record.clone())
        .await
        .expect("create");
}

#[tokio::test]
async fn sweep_once_deletes_purged_records() {
    let engine = engine();
    let repo = Arc::new(InMemoryRepository::new());
    let t0 = Utc::now();
    let dead = protect(&engine, t0, Duration::seconds(5));
    let alive = protect(&engine, t0, Duration::hours(1));
    store(&repo, &dead).await;
    store(&repo, &alive).await;

    let sweeper = ExpirySweeper::new(Arc::clone(&engine)).with_repository(repo.clone());
    let purged = sweeper.sweep_once(t0 + Duration::seconds(10)).await;

    assert_eq!(purged, vec![dead.id]);
    assert_eq!(
        repo.get(&dead.id.to_string()).await,
        Err(RepositoryError::NotFound(dead.id.to_string()))
    );
    assert!(repo.get(&alive.id.to_string()).await.is_ok());
    assert_eq!(engine.resource_count(), 1);
}

#[tokio::test]
async fn sweep_tolerates_records_the_host_never_stored() {
    let engine = engine();
    let repo: Arc<InMemoryRepository<ResourceRecord>> = Arc::new(InMemoryRepository::new());
    let t0 = Utc::now();
    protect(&engine, t0, Duration::seconds(1));

    let sweeper = ExpirySweeper::new(Arc::clone(&engine)).with_repository(repo);
    assert_eq!(sweeper.sweep_once(t0 + Duration::seconds(2)).await.len(), 1);
    assert!(sweeper.sweep_once(t0 + Duration::seconds(3)).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn run_purges_on_tick_and_stops_on_shutdown() {
    let engine = engine();
    let repo = Arc::new(InMemoryRepository::new());
    // Already expired by wall clock.
    let created = Utc::now() - Duration::seconds(30);
    let record = protect(&engine, created, Duration::seconds(10));
    store(&repo, &record).await;
    let mut events = repo.subscribe();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = ExpirySweeper::new(Arc::clone(&engine))
        .with_repository(repo.clone())
        .with_interval(StdDuration::from_secs(1))
        .spawn(shutdown_rx);

    tokio::time::sleep(StdDuration::from_secs(2)).await;
    assert_eq!(
        events.next().await,
        Some(RepositoryEvent::Deleted(record.id.to_string()))
    );
    assert_eq!(engine.resource_count(), 0);

    shutdown_tx.send(true).expect("send shutdown");
    handle.await.expect("sweeper task");
}

#[tokio::test(start_paused = true)]
async fn run_stops_when_shutdown_sender_drops() {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = ExpirySweeper::new(engine()).spawn(shutdown_rx);
    drop(shutdown_tx);
    tokio::time::timeout(StdDuration::from_secs(5), handle)
        .await
        .expect("sweeper should stop")
        .expect("sweeper task");
}

#[test]
fn zero_interval_is_clamped() {
    let sweeper = ExpirySweeper::new(engine()).with_interval(StdDuration::ZERO);
    assert!(format!("{sweeper:?}").contains("1ms"));
}
