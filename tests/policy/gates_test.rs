//! Gate ordering and fail-closed behaviour.

use chrono::{Duration, Utc};
use quietkey::config::Config;
use quietkey::lockdown::SealTrigger;
use quietkey::policy::{
    AccessDecision, AccessPolicyEngine, AccessRequest, DenyReason, GatingEnvelope, ResourceKind,
    ShardProofs,
};
use quietkey::presence::{
    Bandwidth, CognitiveMode, EmotionalTone, IntentVector, PresenceState, SocialContext,
};
use quietkey::types::ActorId;
use quietkey::vault::shard::ShardRequirement;

fn presence(social: SocialContext) -> PresenceState {
    PresenceState {
        cognitive: CognitiveMode::Exploratory,
        emotional: EmotionalTone::Playful,
        intent: IntentVector {
            collaboration: true,
            ..IntentVector::default()
        },
        social,
        bandwidth: Bandwidth::Medium,
        timestamp: Utc::now(),
    }
}

fn setup() -> (AccessPolicyEngine, ActorId) {
    let engine = AccessPolicyEngine::new(Config::default());
    let alice = ActorId::new("alice");
    engine.issue_bundle(alice.as_str()).expect("issue");
    (engine, alice)
}

fn room() -> ResourceKind {
    ResourceKind::Room {
        name: "studio".to_owned(),
    }
}

#[test]
fn expired_and_sealed_resource_is_purged_as_expired() {
    let (engine, alice) = setup();
    let t0 = Utc::now();
    let record = engine
        .protect(
            &alice,
            room(),
            b"x",
            GatingEnvelope::new(vec![ShardRequirement::Device])
                .expires_at(t0 + Duration::seconds(5)),
            t0,
        )
        .expect("protect");
    engine
        .seal(SealTrigger::Manual, t0 + Duration::seconds(6))
        .expect("seal");
    let req = AccessRequest::new(alice, record.id, t0 + Duration::seconds(7));
    assert_eq!(
        engine.can_access(&req),
        AccessDecision::Deny(DenyReason::Expired)
    );
    assert_eq!(engine.resource_count(), 0);
}

#[test]
fn seal_is_checked_before_presence() {
    let (engine, alice) = setup();
    let t0 = Utc::now();
    let record = engine
        .protect(
            &alice,
            room(),
            b"x",
            GatingEnvelope::new(vec![ShardRequirement::Presence])
                .requiring_presence(presence(SocialContext::Inviting)),
            t0,
        )
        .expect("protect");
    engine.seal(SealTrigger::TripleTap, t0).expect("seal");
    let req = AccessRequest::new(alice, record.id, t0).with_presence(presence(SocialContext::Busy));
    assert_eq!(
        engine.can_access(&req),
        AccessDecision::Deny(DenyReason::Sealed)
    );
    assert_eq!(engine.resource_count(), 1);
}

#[test]
fn presence_is_checked_before_keys() {
    let (engine, alice) = setup();
    let t0 = Utc::now();
    let record = engine
        .protect(
            &alice,
            room(),
            b"x",
            GatingEnvelope::new(vec![ShardRequirement::Biometric])
                .requiring_presence(presence(SocialContext::Available)),
            t0,
        )
        .expect("protect");
    let mismatch =
        AccessRequest::new(alice.clone(), record.id, t0).with_presence(presence(SocialContext::Reserved));
    assert_eq!(
        engine.can_access(&mismatch),
        AccessDecision::Deny(DenyReason::PresenceMismatch)
    );
    let no_biometric =
        AccessRequest::new(alice.clone(), record.id, t0).with_presence(presence(SocialContext::Inviting));
    assert_eq!(
        engine.can_access(&no_biometric),
        AccessDecision::Deny(DenyReason::KeyUnavailable)
    );
    let full = no_biometric.with_proofs(ShardProofs::all());
    assert_eq!(engine.can_access(&full), AccessDecision::Allow);
}

#[test]
fn presence_shard_needs_a_live_presence() {
    let (engine, alice) = setup();
    let t0 = Utc::now();
    let record = engine
        .protect(
            &alice,
            room(),
            b"x",
            GatingEnvelope::new(vec![ShardRequirement::Presence]),
            t0,
        )
        .expect("protect");
    let anonymous = AccessRequest::new(ActorId::new("stranger"), record.id, t0);
    assert_eq!(
        engine.can_access(&anonymous),
        AccessDecision::Deny(DenyReason::KeyUnavailable)
    );
    let present = anonymous.with_presence(presence(SocialContext::Busy));
    assert_eq!(engine.can_access(&present), AccessDecision::Allow);
}

#[test]
fn reissued_bundle_orphans_existing_content() {
    let (engine, alice) = setup();
    let t0 = Utc::now();
    let record = engine
        .protect(
            &alice,
            room(),
            b"x",
            GatingEnvelope::new(vec![ShardRequirement::Device]),
            t0,
        )
        .expect("protect");
    let req = AccessRequest::new(alice.clone(), record.id, t0).with_proofs(ShardProofs::all());
    assert!(engine.can_access(&req).is_allowed());
    engine.issue_bundle(alice.as_str()).expect("reissue");
    assert_eq!(
        engine.can_access(&req),
        AccessDecision::Deny(DenyReason::KeyUnavailable)
    );
    assert!(engine.open(&req).is_err());
}

#[test]
fn successful_access_does_not_consume_the_resource() {
    let (engine, alice) = setup();
    let t0 = Utc::now();
    let record = engine
        .protect(
            &alice,
            room(),
            b"x",
            GatingEnvelope::new(vec![ShardRequirement::Device]),
            t0,
        )
        .expect("protect");
    let req = AccessRequest::new(alice, record.id, t0).with_proofs(ShardProofs::all());
    for _ in 0..3 {
        assert!(engine.can_access(&req).is_allowed());
    }
    assert_eq!(engine.resource_count(), 1);
}
