//! Access policy engine.
//!
//! Owns every component and the registry of protected resources. An access
//! decision runs four gates in a fixed order and stops at the first failure:
//!
//! 1. temporal: past expiry (or revoked) denies and destroys the resource,
//!    whatever the later gates would have said
//! 2. seal
//! 3. presence
//! 4. key reassembly
//!
//! All four run under the resource's own lock, so a concurrent revoke or
//! sweep can never land between two gates.
//!
//! Lock order: resource slot, then any component lock. The registry map is
//! never held while a slot is being locked.

pub mod decision;
pub mod resource;
mod rituals;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::audit::{AuditEventType, AuditTrail};
use crate::config::Config;
use crate::lockdown::{LockdownError, SealState, SealStatus, SealTrigger, SecurityLockdown};
use crate::presence::{matches, PresenceState, PresenceTable};
use crate::ritual::RitualUnlocker;
use crate::signals::{OutgoingSignal, Signal, SignalRouter};
use crate::temporal::{TemporalGate, Visibility};
use crate::types::{ActorId, BoundedLog, ResourceId, RitualKind, ValidationError};
use crate::vault::aead::{AeadCipher, AesGcmCipher};
use crate::vault::keys::SymmetricKey;
use crate::vault::shard::ShardRequirement;
use crate::vault::{CryptoError, KeyShardVault, SecurityKeyBundle};

pub use self::decision::{AccessDecision, AccessDenied, AccessRequest, DenyReason, ShardProofs};
pub use self::resource::{GatingEnvelope, ProtectedResource, ResourceKind, ResourceRecord};

type Slot = Arc<Mutex<Option<ProtectedResource>>>;

/// Failure to protect new content.
#[derive(Debug, thiserror::Error)]
pub enum ProtectError {
    /// Bad input or unknown owner.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Encryption or key wrapping failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// The root component: one engine per host process.
#[derive(Debug)]
pub struct AccessPolicyEngine {
    config: Config,
    vault: KeyShardVault,
    temporal: TemporalGate,
    lockdown: SecurityLockdown,
    rituals: RitualUnlocker,
    presence: PresenceTable,
    signals: SignalRouter,
    audit: AuditTrail,
    resources: Mutex<HashMap<ResourceId, Slot>>,
    tombstones: Mutex<BoundedLog<(ResourceId, DenyReason)>>,
    grants: Mutex<HashMap<(ResourceId, RitualKind), DateTime<Utc>>>,
}

impl AccessPolicyEngine {
    /// Build an engine with the default AES-256-GCM primitive.
    pub fn new(config: Config) -> Self {
        Self::with_cipher(config, Arc::new(AesGcmCipher))
    }

    /// Build an engine over a caller-supplied AEAD primitive.
    pub fn with_cipher(config: Config, cipher: Arc<dyn AeadCipher>) -> Self {
        Self {
            vault: KeyShardVault::new(cipher, config.vault.key_mixing),
            temporal: TemporalGate::new(),
            lockdown: SecurityLockdown::new(&config.lockdown),
            rituals: RitualUnlocker::new(
                config.ritual.confidence_threshold,
                config.ritual.session_capacity,
            ),
            presence: PresenceTable::new(config.presence.history_capacity),
            signals: SignalRouter::new(
                config.signals.history_capacity,
                config.signals.inbox_capacity,
            ),
            audit: AuditTrail::new(config.audit.capacity),
            resources: Mutex::new(HashMap::new()),
            tombstones: Mutex::new(BoundedLog::new(config.temporal.tombstone_capacity)),
            grants: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The key vault.
    pub fn vault(&self) -> &KeyShardVault {
        &self.vault
    }

    /// The temporal gate.
    pub fn temporal(&self) -> &TemporalGate {
        &self.temporal
    }

    /// The ritual machines.
    pub fn rituals(&self) -> &RitualUnlocker {
        &self.rituals
    }

    /// The audit trail.
    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    // --- identities and presence ---

    /// Issue (or re-issue) the key bundle for `identity`.
    pub fn issue_bundle(&self, identity: &str) -> Result<Arc<SecurityKeyBundle>, ValidationError> {
        let bundle = self.vault.issue(identity)?;
        self.audit.record(
            AuditEventType::BundleIssued,
            bundle.issued_at,
            json!({
                "alias": bundle.alias,
                "generation": bundle.generation,
            }),
        );
        Ok(bundle)
    }

    /// Replace the actor's presence.
    pub fn update_presence(&self, actor: &ActorId, state: PresenceState) {
        self.presence.update(actor, state);
    }

    /// The actor's current presence.
    pub fn presence_of(&self, actor: &ActorId) -> Option<PresenceState> {
        self.presence.current(actor)
    }

    /// The actor's presence history, oldest first.
    pub fn presence_history(&self, actor: &ActorId) -> Vec<PresenceState> {
        self.presence.history(actor)
    }

    /// Resonance between two actors' current presence.
    pub fn resonance_between(&self, a: &ActorId, b: &ActorId) -> Option<f64> {
        self.presence.resonance_between(a, b)
    }

    // --- resources ---

    /// Encrypt `plaintext` and register it as a protected resource.
    ///
    /// A fresh content key is split into one shard per envelope requirement;
    /// each shard is sealed under `owner`'s bundle.
    pub fn protect(
        &self,
        owner: &ActorId,
        kind: ResourceKind,
        plaintext: &[u8],
        envelope: GatingEnvelope,
        now: DateTime<Utc>,
    ) -> Result<ResourceRecord, ProtectError> {
        if envelope.shard_requirements.is_empty() {
            return Err(ValidationError::Malformed("no shard requirements".to_owned()).into());
        }
        if envelope.expires_at.is_some_and(|at| at < now) {
            return Err(ValidationError::Malformed("expiry is in the past".to_owned()).into());
        }
        if self.vault.bundle(owner.as_str()).is_none() {
            return Err(ValidationError::UnknownIdentity(owner.to_string()).into());
        }

        let content_key = SymmetricKey::generate();
        let payload = self.vault.encrypt(plaintext, &content_key)?;
        let wrapped_key =
            self.vault
                .wrap_content_key(owner.as_str(), &content_key, &envelope.shard_requirements)?;

        let id = ResourceId::generate();
        // Publish the slot, locked and empty, before the temporal record
        // exists: a sweep that sees the record then waits on the slot.
        let slot: Slot = Arc::new(Mutex::new(None));
        let Ok(mut guard) = slot.lock() else {
            return Err(ValidationError::Malformed("resource slot unavailable".to_owned()).into());
        };
        let Ok(mut resources) = self.resources.lock() else {
            return Err(ValidationError::Malformed("resource registry unavailable".to_owned()).into());
        };
        resources.insert(id, Arc::clone(&slot));
        drop(resources);

        let windows = envelope.required_presence.iter().cloned().collect();
        if let Err(err) = self.temporal.register_until(
            id,
            now,
            envelope.expires_at.unwrap_or(DateTime::<Utc>::MAX_UTC),
            windows,
        ) {
            if let Ok(mut resources) = self.resources.lock() {
                resources.remove(&id);
            }
            return Err(err.into());
        }

        let resource = ProtectedResource {
            id,
            owner: owner.clone(),
            kind,
            envelope,
            created_at: now,
            accessed_at: None,
            accessed_by: None,
            payload,
            wrapped_key,
        };
        let record = resource.record();
        *guard = Some(resource);
        drop(guard);

        info!(
            resource = %id,
            owner = %owner,
            shards = record.shard_requirements.len(),
            expires_at = ?record.expires_at,
            "resource protected"
        );
        self.audit.record(
            AuditEventType::ResourceProtected,
            now,
            json!({ "resource": id.to_string(), "owner": owner.as_str() }),
        );
        Ok(record)
    }

    /// Metadata for a live resource.
    pub fn resource_record(&self, id: ResourceId) -> Option<ResourceRecord> {
        let slot = self.slot(id)?;
        let guard = slot.lock().ok()?;
        guard.as_ref().map(ProtectedResource::record)
    }

    /// Number of live resources.
    pub fn resource_count(&self) -> usize {
        self.resources.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Run the four gates.
    pub fn can_access(&self, req: &AccessRequest) -> AccessDecision {
        let decision = match self.gate(req, |_, _| Ok(())) {
            Ok(()) => AccessDecision::Allow,
            Err(reason) => AccessDecision::Deny(reason),
        };
        self.note_decision(req, decision);
        decision
    }

    /// Run the four gates and, on success, decrypt the payload.
    pub fn open(&self, req: &AccessRequest) -> Result<Zeroizing<Vec<u8>>, AccessDenied> {
        let result = self.gate(req, |resource, key| {
            self.vault
                .decrypt(&resource.payload, Some(key))
                .map(Zeroizing::new)
        });
        let decision = match &result {
            Ok(_) => AccessDecision::Allow,
            Err(reason) => AccessDecision::Deny(*reason),
        };
        self.note_decision(req, decision);
        result.map_err(AccessDenied)
    }

    /// Destroy a resource now. Later access reports `revoked`.
    pub fn revoke(&self, id: ResourceId, now: DateTime<Utc>) -> Result<(), ValidationError> {
        let slot = self.slot(id).ok_or(ValidationError::UnknownResource(id))?;
        let mut guard = slot
            .lock()
            .map_err(|_| ValidationError::Malformed("resource unavailable".to_owned()))?;
        if guard.is_none() {
            return Err(ValidationError::UnknownResource(id));
        }
        self.temporal.revoke(id, now)?;
        self.purge_locked(&mut guard, id, DenyReason::Revoked, now);
        Ok(())
    }

    /// Push a resource's expiry back. Returns the new expiry.
    ///
    /// Resources without an expiry cannot be extended, and an already
    /// expired resource is destroyed rather than revived.
    pub fn extend(
        &self,
        id: ResourceId,
        by: Duration,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ValidationError> {
        let slot = self.slot(id).ok_or(ValidationError::UnknownResource(id))?;
        let mut guard = slot
            .lock()
            .map_err(|_| ValidationError::Malformed("resource unavailable".to_owned()))?;
        let Some(resource) = guard.as_ref() else {
            return Err(ValidationError::UnknownResource(id));
        };
        if resource.envelope.expires_at.is_none() {
            return Err(ValidationError::Malformed("resource never expires".to_owned()));
        }
        if self.temporal.is_expired(id, now) {
            self.purge_locked(&mut guard, id, DenyReason::Expired, now);
            return Err(ValidationError::UnknownResource(id));
        }
        let record = self.temporal.extend(id, by)?;
        if let Some(resource) = guard.as_mut() {
            resource.envelope.expires_at = Some(record.expires_at);
        }
        debug!(resource = %id, expires_at = %record.expires_at, "expiry extended");
        Ok(record.expires_at)
    }

    /// Temporal visibility, including presence windows.
    pub fn visibility(
        &self,
        id: ResourceId,
        presence: Option<&PresenceState>,
        now: DateTime<Utc>,
    ) -> Result<Visibility, ValidationError> {
        self.temporal.is_accessible(id, presence, now)
    }

    /// Destroy every resource that is expired at `now`. Returns their ids.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Vec<ResourceId> {
        let mut purged = Vec::new();
        for id in self.temporal.expired_ids(now) {
            let Some(slot) = self.slot(id) else {
                self.temporal.remove(id);
                continue;
            };
            let Ok(mut guard) = slot.lock() else {
                continue;
            };
            // Re-check under the lock; an extend may have landed in between.
            let Some(record) = self.temporal.record(id) else {
                continue;
            };
            if guard.is_none() || !(record.revoked || now > record.expires_at) {
                continue;
            }
            let reason = if record.revoked {
                DenyReason::Revoked
            } else {
                DenyReason::Expired
            };
            self.purge_locked(&mut guard, id, reason, now);
            purged.push(id);
        }
        purged
    }

    /// Destroy every expired resource. Returns how many were destroyed.
    pub fn cleanup_expired(&self, now: DateTime<Utc>) -> usize {
        self.purge_expired(now).len()
    }

    /// Live resources expiring within the configured window, soonest first.
    pub fn expiring_soon(&self, now: DateTime<Utc>) -> Vec<(ResourceId, Duration)> {
        self.temporal
            .expiring_soon(self.config.temporal.expiring_soon(), now)
    }

    // --- seal ---

    /// Engage the seal.
    pub fn seal(&self, trigger: SealTrigger, now: DateTime<Utc>) -> Result<SealState, LockdownError> {
        let state = self.lockdown.trigger(trigger, now)?;
        self.note_seal(&state, now);
        Ok(state)
    }

    /// Release the seal. Rejected while the seal window is open.
    pub fn unseal(&self, now: DateTime<Utc>) -> Result<SealState, LockdownError> {
        let state = self.lockdown.unseal(now)?;
        self.note_seal(&state, now);
        Ok(state)
    }

    /// Read-only seal status.
    pub fn seal_status(&self, now: DateTime<Utc>) -> SealStatus {
        self.lockdown.status(now)
    }

    /// Count a failed attempt against the seal threshold.
    pub fn record_failed_attempt(&self, now: DateTime<Utc>) -> Result<SealState, LockdownError> {
        let state = self.lockdown.record_failed_attempt(now)?;
        if state.active && state.failure_count == 0 {
            self.note_seal(&state, now);
        }
        Ok(state)
    }

    // --- signals ---

    /// Route a signal; the glow hint follows the recipient's presence.
    pub fn send_signal(&self, outgoing: OutgoingSignal, now: DateTime<Utc>) -> Signal {
        let recipient = self.presence.current(&outgoing.recipient);
        self.signals.send(outgoing, recipient.as_ref(), now)
    }

    /// Remove a signal from the recipient's inbox.
    pub fn acknowledge_signal(&self, recipient: &ActorId, signal_id: Uuid) -> bool {
        self.signals.acknowledge(recipient, signal_id)
    }

    /// Unacknowledged signals for `recipient`.
    pub fn inbox(&self, recipient: &ActorId) -> Vec<Signal> {
        self.signals.inbox(recipient)
    }

    /// Signals from `sender` to `recipient`.
    pub fn signal_history(&self, sender: &ActorId, recipient: &ActorId) -> Vec<Signal> {
        self.signals.history(sender, recipient)
    }

    // --- internals ---

    fn slot(&self, id: ResourceId) -> Option<Slot> {
        self.resources.lock().ok()?.get(&id).cloned()
    }

    fn tombstone(&self, id: ResourceId) -> Option<DenyReason> {
        let tombstones = self.tombstones.lock().ok()?;
        let reason = tombstones
            .iter()
            .rev()
            .find(|(dead, _)| *dead == id)
            .map(|(_, reason)| *reason);
        reason
    }

    fn gone(&self, id: ResourceId) -> DenyReason {
        self.tombstone(id).unwrap_or(DenyReason::UnknownResource)
    }

    fn active_grants(&self, id: ResourceId, now: DateTime<Utc>) -> Vec<RitualKind> {
        let Ok(grants) = self.grants.lock() else {
            return Vec::new();
        };
        grants
            .iter()
            .filter(|((resource, _), until)| *resource == id && now <= **until)
            .map(|((_, kind), _)| *kind)
            .collect()
    }

    fn gate<T>(
        &self,
        req: &AccessRequest,
        then: impl FnOnce(&ProtectedResource, &SymmetricKey) -> Result<T, CryptoError>,
    ) -> Result<T, DenyReason> {
        let id = req.resource;
        let Some(slot) = self.slot(id) else {
            return Err(self.gone(id));
        };
        let Ok(mut guard) = slot.lock() else {
            return Err(DenyReason::Unavailable);
        };
        if guard.is_none() {
            return Err(self.gone(id));
        }

        let Some(record) = self.temporal.record(id) else {
            return Err(DenyReason::Unavailable);
        };
        if record.revoked || req.now > record.expires_at {
            let reason = if record.revoked {
                DenyReason::Revoked
            } else {
                DenyReason::Expired
            };
            self.purge_locked(&mut guard, id, reason, req.now);
            return Err(reason);
        }

        if self.lockdown.is_sealed(req.now) {
            return Err(DenyReason::Sealed);
        }

        let Some(resource) = guard.as_mut() else {
            return Err(self.gone(id));
        };
        let live = req
            .presence
            .clone()
            .or_else(|| self.presence.current(&req.actor));
        let presence_ok = match (&resource.envelope.required_presence, &live) {
            (None, _) => true,
            (Some(required), Some(live)) => matches(live, required),
            (Some(_), None) => false,
        };
        if !presence_ok {
            return Err(DenyReason::PresenceMismatch);
        }

        let granted = self.active_grants(id, req.now);
        let proofs = req.proofs;
        let has_presence = live.is_some();
        let key = self
            .vault
            .unwrap_content_key(resource.owner.as_str(), &resource.wrapped_key, |requirement| {
                match requirement {
                    ShardRequirement::Device => proofs.device,
                    ShardRequirement::Biometric => proofs.biometric,
                    ShardRequirement::Presence => has_presence,
                    ShardRequirement::Ritual(kind) => granted.contains(kind),
                }
            })
            .map_err(|err| {
                debug!(resource = %id, error = %err, "content key unavailable");
                DenyReason::KeyUnavailable
            })?;
        let value = then(resource, &key).map_err(|err| {
            warn!(resource = %id, error = %err, "payload failed to open");
            DenyReason::KeyUnavailable
        })?;

        resource.accessed_at = Some(req.now);
        resource.accessed_by = Some(req.actor.clone());
        Ok(value)
    }

    /// Destroy the resource held in `guard`. Caller holds the slot lock.
    fn purge_locked(
        &self,
        guard: &mut Option<ProtectedResource>,
        id: ResourceId,
        reason: DenyReason,
        now: DateTime<Utc>,
    ) {
        let Some(resource) = guard.take() else {
            return;
        };
        drop(resource);
        // Tombstone before unlinking so a concurrent lookup never sees a gap.
        if let Ok(mut tombstones) = self.tombstones.lock() {
            tombstones.push((id, reason));
        }
        if let Ok(mut resources) = self.resources.lock() {
            resources.remove(&id);
        }
        self.temporal.remove(id);
        self.rituals.forget(id);
        if let Ok(mut grants) = self.grants.lock() {
            grants.retain(|(resource, _), _| *resource != id);
        }
        info!(resource = %id, reason = %reason, "resource purged");
        self.audit.record(
            AuditEventType::ResourcePurged,
            now,
            json!({ "resource": id.to_string(), "reason": reason }),
        );
    }

    fn note_decision(&self, req: &AccessRequest, decision: AccessDecision) {
        match decision {
            AccessDecision::Allow => {
                debug!(actor = %req.actor, resource = %req.resource, "access allowed");
            }
            AccessDecision::Deny(reason) => {
                debug!(
                    actor = %req.actor,
                    resource = %req.resource,
                    reason = %reason,
                    "access denied"
                );
            }
        }
        self.audit.record(
            AuditEventType::AccessDecision,
            req.now,
            json!({
                "actor": req.actor.as_str(),
                "resource": req.resource.to_string(),
                "decision": decision,
            }),
        );
    }

    fn note_seal(&self, state: &SealState, now: DateTime<Utc>) {
        self.audit.record(
            AuditEventType::SealTransition,
            now,
            json!({
                "active": state.active,
                "reason": state.trigger.as_ref().map(SealTrigger::reason),
                "version": state.version,
            }),
        );
    }
}
