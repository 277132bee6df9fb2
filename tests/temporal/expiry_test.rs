//! Expiry boundaries and presence windows.

use chrono::{Duration, Utc};
use quietkey::presence::{
    Bandwidth, CognitiveMode, EmotionalTone, IntentVector, PresenceState, SocialContext,
};
use quietkey::temporal::{TemporalGate, TemporalReason};
use quietkey::types::ResourceId;

fn window(social: SocialContext) -> PresenceState {
    PresenceState {
        cognitive: CognitiveMode::Reflective,
        emotional: EmotionalTone::Tender,
        intent: IntentVector {
            listening: true,
            ..IntentVector::default()
        },
        social,
        bandwidth: Bandwidth::Low,
        timestamp: Utc::now(),
    }
}

#[test]
fn accessible_at_half_life_and_at_the_boundary() {
    let gate = TemporalGate::new();
    let id = ResourceId::generate();
    let t0 = Utc::now();
    let lifetime = Duration::seconds(120);
    gate.register(id, t0, lifetime, Vec::new()).expect("register");

    let half = gate
        .is_accessible(id, None, t0 + Duration::seconds(60))
        .expect("check");
    assert!(half.accessible);
    assert_eq!(half.remaining, Duration::seconds(60));

    let boundary = gate.is_accessible(id, None, t0 + lifetime).expect("check");
    assert!(boundary.accessible);
    assert_eq!(boundary.reason, TemporalReason::Open);

    let after = gate
        .is_accessible(id, None, t0 + lifetime + Duration::milliseconds(1))
        .expect("check");
    assert!(!after.accessible);
    assert_eq!(after.reason, TemporalReason::Expired);
    assert_eq!(after.remaining, Duration::zero());
}

#[test]
fn presence_windows_restrict_visibility() {
    let gate = TemporalGate::new();
    let id = ResourceId::generate();
    let t0 = Utc::now();
    gate.register(
        id,
        t0,
        Duration::minutes(10),
        vec![window(SocialContext::Available)],
    )
    .expect("register");

    let none = gate.is_accessible(id, None, t0).expect("check");
    assert_eq!(none.reason, TemporalReason::PresenceWindow);

    let busy = window(SocialContext::Busy);
    let denied = gate.is_accessible(id, Some(&busy), t0).expect("check");
    assert!(!denied.accessible);

    let inviting = window(SocialContext::Inviting);
    let allowed = gate.is_accessible(id, Some(&inviting), t0).expect("check");
    assert!(allowed.accessible);
}

#[test]
fn expiry_dominates_presence() {
    let gate = TemporalGate::new();
    let id = ResourceId::generate();
    let t0 = Utc::now();
    let w = window(SocialContext::Busy);
    gate.register(id, t0, Duration::seconds(1), vec![w.clone()])
        .expect("register");
    let v = gate
        .is_accessible(id, Some(&w), t0 + Duration::seconds(2))
        .expect("check");
    assert_eq!(v.reason, TemporalReason::Expired);
}

#[test]
fn negative_lifetime_is_rejected() {
    let gate = TemporalGate::new();
    assert!(gate
        .register(ResourceId::generate(), Utc::now(), Duration::seconds(-1), Vec::new())
        .is_err());
}
