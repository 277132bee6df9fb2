//! Cleanup and expiring-soon queries.

use std::sync::Arc;
use std::thread;

use chrono::{Duration, Utc};
use quietkey::temporal::TemporalGate;
use quietkey::types::ResourceId;

#[test]
fn cleanup_is_idempotent() {
    let gate = TemporalGate::new();
    let t0 = Utc::now();
    for secs in [1, 2, 3, 100] {
        gate.register(ResourceId::generate(), t0, Duration::seconds(secs), Vec::new())
            .expect("register");
    }
    let later = t0 + Duration::seconds(10);
    assert_eq!(gate.cleanup_expired(later), 3);
    assert_eq!(gate.cleanup_expired(later), 0);
    assert_eq!(gate.len(), 1);
}

#[test]
fn cleanup_counts_revoked_records() {
    let gate = TemporalGate::new();
    let t0 = Utc::now();
    let id = ResourceId::generate();
    gate.register(id, t0, Duration::hours(1), Vec::new())
        .expect("register");
    gate.revoke(id, t0).expect("revoke");
    assert_eq!(gate.cleanup_expired(t0), 1);
    assert!(gate.is_empty());
}

#[test]
fn cleanup_is_safe_under_concurrent_inserts() {
    let gate = Arc::new(TemporalGate::new());
    let t0 = Utc::now();
    let writers: Vec<_> = (0..4)
        .map(|_| {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                for _ in 0..50 {
                    gate.register(ResourceId::generate(), t0, Duration::hours(1), Vec::new())
                        .expect("register");
                }
            })
        })
        .collect();
    let mut removed = 0;
    for _ in 0..20 {
        removed = gate.cleanup_expired(t0 + Duration::minutes(1)).saturating_add(removed);
    }
    for w in writers {
        w.join().expect("writer");
    }
    assert_eq!(removed, 0);
    assert_eq!(gate.len(), 200);
}

#[test]
fn expiring_soon_uses_closed_window() {
    let gate = TemporalGate::new();
    let t0 = Utc::now();
    let at_edge = ResourceId::generate();
    let inside = ResourceId::generate();
    let outside = ResourceId::generate();
    gate.register(at_edge, t0, Duration::seconds(300), Vec::new())
        .expect("register");
    gate.register(inside, t0, Duration::seconds(30), Vec::new())
        .expect("register");
    gate.register(outside, t0, Duration::seconds(301), Vec::new())
        .expect("register");

    let soon = gate.expiring_soon(Duration::seconds(300), t0);
    let ids: Vec<_> = soon.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![inside, at_edge]);

    let at_expiry = gate.expiring_soon(Duration::seconds(300), t0 + Duration::seconds(30));
    assert!(at_expiry.iter().any(|(id, left)| *id == inside && *left == Duration::zero()));
}
