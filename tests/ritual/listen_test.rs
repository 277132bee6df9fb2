//! Async listening: timeout, cancel, sensor failure, drop and grant.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use quietkey::config::Config;
use quietkey::policy::{
    AccessDecision, AccessPolicyEngine, AccessRequest, GatingEnvelope, ResourceKind, ShardProofs,
};
use quietkey::ritual::{
    DenialCause, RitualCredential, RitualOutcome, RitualSensor, RitualState, SensorError,
    SensorReading,
};
use quietkey::types::{ActorId, ResourceId, RitualKind};
use quietkey::vault::shard::ShardRequirement;

struct Silent;

#[async_trait]
impl RitualSensor for Silent {
    async fn capture(&self, _kind: RitualKind) -> Result<SensorReading, SensorError> {
        std::future::pending().await
    }
}

struct Fixed {
    confidence: f64,
    is_match: bool,
}

#[async_trait]
impl RitualSensor for Fixed {
    async fn capture(&self, _kind: RitualKind) -> Result<SensorReading, SensorError> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(SensorReading {
            confidence: self.confidence,
            is_match: self.is_match,
            timestamp: Utc::now(),
        })
    }
}

struct Broken;

#[async_trait]
impl RitualSensor for Broken {
    async fn capture(&self, _kind: RitualKind) -> Result<SensorReading, SensorError> {
        Err(SensorError::Unavailable("microphone busy".to_owned()))
    }
}

fn setup(kind: RitualKind) -> (AccessPolicyEngine, ActorId, ResourceId) {
    let engine = AccessPolicyEngine::new(Config::default());
    let owner = ActorId::new("alice");
    engine.issue_bundle(owner.as_str()).expect("issue");
    let record = engine
        .protect(
            &owner,
            ResourceKind::Media {
                mime_type: "image/png".to_owned(),
            },
            b"\x89PNG",
            GatingEnvelope::new(vec![ShardRequirement::Device, ShardRequirement::Ritual(kind)]),
            Utc::now(),
        )
        .expect("protect");
    engine
        .enroll_ritual(record.id, kind, &RitualCredential::new("open up"))
        .expect("enroll");
    (engine, owner, record.id)
}

#[tokio::test(start_paused = true)]
async fn silent_sensor_times_out() {
    let (engine, _, id) = setup(RitualKind::Whisper);
    let outcome = engine
        .listen_for_ritual(
            id,
            RitualKind::Whisper,
            &Silent,
            Some(RitualCredential::new("open up")),
            std::future::pending(),
        )
        .await
        .expect("listen");
    assert_eq!(outcome, RitualOutcome::Denied(DenialCause::SensorTimeout));
    assert_eq!(
        engine.ritual_state(id, RitualKind::Whisper),
        RitualState::UnlockDenied
    );
    assert_eq!(engine.seal_status(Utc::now()).failure_count, 1);
}

#[tokio::test(start_paused = true)]
async fn external_cancel_stops_listening() {
    let (engine, _, id) = setup(RitualKind::Breath);
    let outcome = engine
        .listen_for_ritual(
            id,
            RitualKind::Breath,
            &Silent,
            None,
            tokio::time::sleep(Duration::from_secs(1)),
        )
        .await
        .expect("listen");
    assert_eq!(outcome, RitualOutcome::Denied(DenialCause::Cancelled));
    assert_eq!(
        engine.ritual_state(id, RitualKind::Breath),
        RitualState::UnlockDenied
    );
    assert_eq!(engine.seal_status(Utc::now()).failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn dropped_listen_never_leaves_machine_listening() {
    let (engine, _, id) = setup(RitualKind::Gesture);
    let abandoned = tokio::time::timeout(
        Duration::from_secs(2),
        engine.listen_for_ritual(id, RitualKind::Gesture, &Silent, None, std::future::pending()),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(
        engine.ritual_state(id, RitualKind::Gesture),
        RitualState::UnlockDenied
    );
    let last = engine.rituals().sessions().pop().expect("session");
    assert_eq!(
        last.outcome,
        Some(RitualOutcome::Denied(DenialCause::Cancelled))
    );
}

#[tokio::test]
async fn broken_sensor_is_a_denial() {
    let (engine, _, id) = setup(RitualKind::Whisper);
    let outcome = engine
        .listen_for_ritual(id, RitualKind::Whisper, &Broken, None, std::future::pending())
        .await
        .expect("listen");
    assert_eq!(outcome, RitualOutcome::Denied(DenialCause::SensorFailure));
}

#[tokio::test(start_paused = true)]
async fn confident_match_with_right_credential_unlocks() {
    let (engine, owner, id) = setup(RitualKind::Whisper);
    let now = Utc::now();
    let req = AccessRequest::new(owner, id, now).with_proofs(ShardProofs::all());
    assert_eq!(
        engine.can_access(&req),
        AccessDecision::Deny(quietkey::policy::DenyReason::KeyUnavailable)
    );

    let sensor = Fixed {
        confidence: 0.92,
        is_match: true,
    };
    let outcome = engine
        .listen_for_ritual(
            id,
            RitualKind::Whisper,
            &sensor,
            Some(RitualCredential::new("open up")),
            std::future::pending(),
        )
        .await
        .expect("listen");
    assert_eq!(outcome, RitualOutcome::Granted);
    assert_eq!(
        engine.ritual_state(id, RitualKind::Whisper),
        RitualState::UnlockGranted
    );

    let plain = engine.open(&req).expect("open");
    assert_eq!(plain.as_slice(), b"\x89PNG");
}

#[tokio::test(start_paused = true)]
async fn wrong_credential_is_denied_even_when_confident() {
    let (engine, _, id) = setup(RitualKind::Whisper);
    let sensor = Fixed {
        confidence: 0.99,
        is_match: true,
    };
    let outcome = engine
        .listen_for_ritual(
            id,
            RitualKind::Whisper,
            &sensor,
            Some(RitualCredential::new("let me in")),
            std::future::pending(),
        )
        .await
        .expect("listen");
    assert_eq!(
        outcome,
        RitualOutcome::Denied(DenialCause::CredentialMismatch)
    );
}
