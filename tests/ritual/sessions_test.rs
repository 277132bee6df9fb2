//! Ritual machine transitions and session records.

use chrono::{Duration, Utc};
use quietkey::ritual::{
    DenialCause, RitualCredential, RitualOutcome, RitualState, RitualUnlocker, SensorReading,
};
use quietkey::types::{ResourceId, RitualKind};

fn reading(confidence: f64, is_match: bool) -> SensorReading {
    SensorReading {
        confidence,
        is_match,
        timestamp: Utc::now(),
    }
}

#[test]
fn sensor_no_match_is_denied() {
    let u = RitualUnlocker::new(0.7, 16);
    let id = ResourceId::generate();
    let now = Utc::now();
    u.begin(id, RitualKind::Gesture, now).expect("begin");
    let outcome = u
        .submit(id, RitualKind::Gesture, &reading(0.95, false), None, true, now)
        .expect("submit");
    assert_eq!(outcome, RitualOutcome::Denied(DenialCause::NoMatch));
}

#[test]
fn missing_credential_is_denied() {
    let u = RitualUnlocker::new(0.7, 16);
    let id = ResourceId::generate();
    let now = Utc::now();
    u.enroll(id, RitualKind::Breath, &RitualCredential::new("4-7-8"))
        .expect("enroll");
    u.begin(id, RitualKind::Breath, now).expect("begin");
    let outcome = u
        .submit(id, RitualKind::Breath, &reading(0.8, true), None, true, now)
        .expect("submit");
    assert_eq!(outcome, RitualOutcome::Denied(DenialCause::MissingCredential));
}

#[test]
fn vanished_resource_is_denied() {
    let u = RitualUnlocker::new(0.7, 16);
    let id = ResourceId::generate();
    let secret = RitualCredential::new("4-7-8");
    let now = Utc::now();
    u.enroll(id, RitualKind::Breath, &secret).expect("enroll");
    u.begin(id, RitualKind::Breath, now).expect("begin");
    let outcome = u
        .submit(id, RitualKind::Breath, &reading(0.8, true), Some(&secret), false, now)
        .expect("submit");
    assert_eq!(outcome, RitualOutcome::Denied(DenialCause::UnknownResource));
}

#[test]
fn nan_confidence_is_denied() {
    let u = RitualUnlocker::new(0.7, 16);
    let id = ResourceId::generate();
    let now = Utc::now();
    u.begin(id, RitualKind::Whisper, now).expect("begin");
    let outcome = u
        .submit(id, RitualKind::Whisper, &reading(f64::NAN, true), None, true, now)
        .expect("submit");
    assert_eq!(outcome, RitualOutcome::Denied(DenialCause::LowConfidence));
}

#[test]
fn session_records_timestamps_and_attempts() {
    let u = RitualUnlocker::new(0.7, 16);
    let id = ResourceId::generate();
    let secret = RitualCredential::new("swirl");
    u.enroll(id, RitualKind::Gesture, &secret).expect("enroll");
    let t0 = Utc::now();

    u.begin(id, RitualKind::Gesture, t0).expect("begin");
    u.submit(id, RitualKind::Gesture, &reading(0.1, true), None, true, t0 + Duration::seconds(1))
        .expect("submit");
    u.begin(id, RitualKind::Gesture, t0 + Duration::seconds(2))
        .expect("begin again");
    u.submit(
        id,
        RitualKind::Gesture,
        &reading(0.9, true),
        Some(&secret),
        true,
        t0 + Duration::seconds(3),
    )
    .expect("submit");

    let sessions = u.sessions();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].attempts, 1);
    assert_eq!(sessions[1].attempts, 2);
    assert_eq!(sessions[1].started_at, t0 + Duration::seconds(2));
    assert_eq!(sessions[1].ended_at, Some(t0 + Duration::seconds(3)));
    assert_eq!(sessions[1].outcome, Some(RitualOutcome::Granted));
    assert_eq!(u.state(id, RitualKind::Gesture), RitualState::UnlockGranted);
}
