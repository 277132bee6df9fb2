//! Background expiry sweeper.
//!
//! Runs as a Tokio task, ticking at `temporal.sweep_interval_secs`. Each tick
//! destroys every expired resource through the engine (taking each
//! resource's own lock) and removes the destroyed ids from the host
//! repository, if one is attached.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::policy::{AccessPolicyEngine, ResourceRecord};
use crate::repository::{Repository, RepositoryError};
use crate::types::ResourceId;

/// Periodically purges expired resources.
pub struct ExpirySweeper {
    engine: Arc<AccessPolicyEngine>,
    records: Option<Arc<dyn Repository<ResourceRecord>>>,
    interval: Duration,
}

impl std::fmt::Debug for ExpirySweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpirySweeper")
            .field("interval", &self.interval)
            .field("has_repository", &self.records.is_some())
            .finish_non_exhaustive()
    }
}

impl ExpirySweeper {
    /// Sweeper using the engine's configured interval.
    pub fn new(engine: Arc<AccessPolicyEngine>) -> Self {
        let interval = engine.config().temporal.sweep_interval();
        Self {
            engine,
            records: None,
            interval,
        }
    }

    /// Also delete purged ids from `records`.
    pub fn with_repository(mut self, records: Arc<dyn Repository<ResourceRecord>>) -> Self {
        self.records = Some(records);
        self
    }

    /// Override the tick interval. Clamped to at least one millisecond.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Run one sweep at `now`. Returns the destroyed ids.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Vec<ResourceId> {
        let purged = self.engine.purge_expired(now);
        if let Some(records) = &self.records {
            for id in &purged {
                match records.delete(&id.to_string()).await {
                    Ok(()) | Err(RepositoryError::NotFound(_)) => {}
                    Err(e) => warn!(resource = %id, error = %e, "failed to delete purged record"),
                }
            }
        }
        purged
    }

    /// Tick until the shutdown flag flips or its channel closes.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "expiry sweeper started");
        let mut interval = tokio::time::interval(self.interval);

        // Skip the first immediate tick.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let purged = self.sweep_once(Utc::now()).await;
                    if purged.is_empty() {
                        debug!("sweep found nothing to purge");
                    } else {
                        info!(purged = purged.len(), "sweep purged expired resources");
                    }
                }
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        info!("expiry sweeper shutting down");
                        break;
                    }
                }
            }
        }

        info!("expiry sweeper stopped");
    }

    /// Spawn [`Self::run`] on the current runtime.
    pub fn spawn(self, shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown_rx))
    }
}
