//! Ritual unlock orchestration on top of the engine.
//!
//! A granted ritual leaves a short-lived grant that satisfies the matching
//! `Ritual` shard. Every denial except an external cancel counts towards
//! the seal threshold.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use super::AccessPolicyEngine;
use crate::audit::AuditEventType;
use crate::ritual::{
    DenialCause, RitualCredential, RitualError, RitualOutcome, RitualSensor, RitualState,
    SensorReading,
};
use crate::types::{ResourceId, RitualKind};

impl AccessPolicyEngine {
    /// Run `f` while holding the lock of a live resource, so a purge cannot
    /// interleave and leave ritual state behind for a destroyed id.
    fn with_live_resource<T>(
        &self,
        id: ResourceId,
        now: Option<DateTime<Utc>>,
        f: impl FnOnce() -> Result<T, RitualError>,
    ) -> Result<T, RitualError> {
        let slot = self.slot(id).ok_or(RitualError::UnknownResource(id))?;
        let guard = slot.lock().map_err(|_| RitualError::Unavailable)?;
        let expired = now.is_some_and(|now| self.temporal.is_expired(id, now));
        if guard.is_none() || expired {
            return Err(RitualError::UnknownResource(id));
        }
        let result = f();
        drop(guard);
        result
    }

    /// Enrol the credential a ritual must reproduce for `resource`.
    pub fn enroll_ritual(
        &self,
        resource: ResourceId,
        kind: RitualKind,
        secret: &RitualCredential,
    ) -> Result<(), RitualError> {
        self.with_live_resource(resource, None, || {
            self.rituals.enroll(resource, kind, secret)
        })
    }

    /// Start listening for a ritual on a live resource.
    pub fn begin_ritual(
        &self,
        resource: ResourceId,
        kind: RitualKind,
        now: DateTime<Utc>,
    ) -> Result<Uuid, RitualError> {
        self.with_live_resource(resource, Some(now), || {
            self.rituals.begin(resource, kind, now)
        })
    }

    /// Current state of the ritual machine for (resource, kind).
    pub fn ritual_state(&self, resource: ResourceId, kind: RitualKind) -> RitualState {
        self.rituals.state(resource, kind)
    }

    /// Resolve a listening ritual with a sensor reading.
    ///
    /// The resource lookup and the resolution happen under the resource's
    /// lock, so a concurrent purge cannot grant a destroyed resource.
    pub fn submit_ritual(
        &self,
        resource: ResourceId,
        kind: RitualKind,
        reading: &SensorReading,
        credential: Option<&RitualCredential>,
        now: DateTime<Utc>,
    ) -> Result<RitualOutcome, RitualError> {
        let slot = self.slot(resource);
        let guard = match &slot {
            Some(slot) => Some(slot.lock().map_err(|_| RitualError::Unavailable)?),
            None => None,
        };
        let exists = guard.as_ref().is_some_and(|g| g.is_some())
            && !self.temporal.is_expired(resource, now);
        let outcome = self
            .rituals
            .submit(resource, kind, reading, credential, exists, now)?;
        self.settle_ritual(resource, kind, outcome, now);
        drop(guard);
        Ok(outcome)
    }

    /// Cancel a listening ritual. Cancels do not count as failures.
    pub fn abort_ritual(
        &self,
        resource: ResourceId,
        kind: RitualKind,
        now: DateTime<Utc>,
    ) -> Option<RitualOutcome> {
        self.deny_ritual(resource, kind, DenialCause::Cancelled, now)
    }

    /// Listen for one ritual through `sensor` and resolve it.
    ///
    /// The session ends on the first of: a reading, the configured listen
    /// timeout, or `cancel` completing. Dropping the returned future
    /// mid-listen resolves the session as cancelled.
    pub async fn listen_for_ritual<F>(
        &self,
        resource: ResourceId,
        kind: RitualKind,
        sensor: &dyn RitualSensor,
        credential: Option<RitualCredential>,
        cancel: F,
    ) -> Result<RitualOutcome, RitualError>
    where
        F: Future<Output = ()> + Send,
    {
        self.begin_ritual(resource, kind, Utc::now())?;
        let mut guard = self.rituals.guard(resource, kind);
        let timeout = self.config.ritual.listen_timeout();

        let denied = |cause| {
            self.deny_ritual(resource, kind, cause, Utc::now())
                .unwrap_or(RitualOutcome::Denied(cause))
        };
        let outcome = tokio::select! {
            captured = tokio::time::timeout(timeout, sensor.capture(kind)) => match captured {
                Ok(Ok(reading)) => {
                    self.submit_ritual(resource, kind, &reading, credential.as_ref(), Utc::now())
                }
                Ok(Err(err)) => {
                    warn!(resource = %resource, kind = %kind, error = %err, "ritual sensor failed");
                    Ok(denied(DenialCause::SensorFailure))
                }
                Err(_) => {
                    warn!(resource = %resource, kind = %kind, "ritual sensor timed out");
                    Ok(denied(DenialCause::SensorTimeout))
                }
            },
            () = cancel => Ok(denied(DenialCause::Cancelled)),
        };
        guard.disarm();
        outcome
    }

    fn deny_ritual(
        &self,
        resource: ResourceId,
        kind: RitualKind,
        cause: DenialCause,
        now: DateTime<Utc>,
    ) -> Option<RitualOutcome> {
        let outcome = self.rituals.abort(resource, kind, cause, now)?;
        self.settle_ritual(resource, kind, outcome, now);
        Some(outcome)
    }

    fn settle_ritual(
        &self,
        resource: ResourceId,
        kind: RitualKind,
        outcome: RitualOutcome,
        now: DateTime<Utc>,
    ) {
        match outcome {
            RitualOutcome::Granted => {
                let until = now
                    .checked_add_signed(self.config.ritual.grant_ttl())
                    .unwrap_or(now);
                if let Ok(mut grants) = self.grants.lock() {
                    grants.insert((resource, kind), until);
                }
            }
            RitualOutcome::Denied(DenialCause::Cancelled) => {}
            RitualOutcome::Denied(_) => {
                if let Err(err) = self.record_failed_attempt(now) {
                    warn!(error = %err, "could not record failed ritual attempt");
                }
            }
        }
        self.audit.record(
            AuditEventType::RitualResolved,
            now,
            json!({
                "resource": resource.to_string(),
                "kind": kind,
                "outcome": outcome,
            }),
        );
    }
}
