//! Temporal gate: expiry and presence-bound visibility windows per resource.
//!
//! A resource is accessible while `now <= expires_at`; the expiry instant
//! itself is still inside the window. Revocation is a separate flag so a
//! revoked resource is inaccessible even at the instant it was revoked.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::presence::{matches, PresenceState};
use crate::types::{ResourceId, ValidationError};

/// Why a visibility check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemporalReason {
    /// Inside the window.
    Open,
    /// Past the expiry instant.
    Expired,
    /// Explicitly revoked.
    Revoked,
    /// No allowed presence window matches.
    PresenceWindow,
}

/// Result of [`TemporalGate::is_accessible`].
#[derive(Debug, Clone, PartialEq)]
pub struct Visibility {
    /// Whether the resource may be shown now.
    pub accessible: bool,
    /// Why.
    pub reason: TemporalReason,
    /// Time left before expiry, zero once expired.
    pub remaining: Duration,
}

/// Lifetime record of one resource. Replaced, never edited.
#[derive(Debug, Clone, PartialEq)]
pub struct TemporalRecord {
    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// Absolute expiry.
    pub expires_at: DateTime<Utc>,
    /// Presence states any of which makes the resource visible. Empty means
    /// no presence restriction.
    pub presence_windows: Vec<PresenceState>,
    /// Set by [`TemporalGate::revoke`].
    pub revoked: bool,
}

impl TemporalRecord {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.revoked || now > self.expires_at
    }

    fn remaining(&self, now: DateTime<Utc>) -> Duration {
        if self.revoked {
            return Duration::zero();
        }
        (self.expires_at - now).max(Duration::zero())
    }
}

/// Tracks expiry per resource.
#[derive(Debug, Default)]
pub struct TemporalGate {
    records: Mutex<HashMap<ResourceId, TemporalRecord>>,
}

impl TemporalGate {
    /// Create an empty gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource living for `ttl` from `now`.
    pub fn register(
        &self,
        id: ResourceId,
        now: DateTime<Utc>,
        ttl: Duration,
        presence_windows: Vec<PresenceState>,
    ) -> Result<TemporalRecord, ValidationError> {
        if ttl < Duration::zero() {
            return Err(ValidationError::Malformed("negative lifetime".to_owned()));
        }
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| ValidationError::Malformed("lifetime overflows".to_owned()))?;
        self.register_until(id, now, expires_at, presence_windows)
    }

    /// Register a resource expiring at an absolute instant.
    pub fn register_until(
        &self,
        id: ResourceId,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        presence_windows: Vec<PresenceState>,
    ) -> Result<TemporalRecord, ValidationError> {
        let record = TemporalRecord {
            created_at: now,
            expires_at,
            presence_windows,
            revoked: false,
        };
        let mut records = self.lock()?;
        records.insert(id, record.clone());
        Ok(record)
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<ResourceId, TemporalRecord>>, ValidationError>
    {
        self.records
            .lock()
            .map_err(|_| ValidationError::Malformed("temporal state unavailable".to_owned()))
    }

    /// The record for `id`.
    pub fn record(&self, id: ResourceId) -> Option<TemporalRecord> {
        self.records.lock().ok()?.get(&id).cloned()
    }

    /// Whether `id` is past expiry or revoked. Unknown ids are not expired.
    pub fn is_expired(&self, id: ResourceId, now: DateTime<Utc>) -> bool {
        match self.records.lock() {
            Ok(records) => records.get(&id).is_some_and(|r| r.is_expired(now)),
            Err(_) => true,
        }
    }

    /// Full visibility check including presence windows.
    pub fn is_accessible(
        &self,
        id: ResourceId,
        presence: Option<&PresenceState>,
        now: DateTime<Utc>,
    ) -> Result<Visibility, ValidationError> {
        let records = self.lock()?;
        let record = records.get(&id).ok_or(ValidationError::UnknownResource(id))?;
        let remaining = record.remaining(now);
        let (accessible, reason) = if record.revoked {
            (false, TemporalReason::Revoked)
        } else if record.is_expired(now) {
            (false, TemporalReason::Expired)
        } else if !record.presence_windows.is_empty()
            && !presence.is_some_and(|p| record.presence_windows.iter().any(|w| matches(p, w)))
        {
            (false, TemporalReason::PresenceWindow)
        } else {
            (true, TemporalReason::Open)
        };
        Ok(Visibility {
            accessible,
            reason,
            remaining,
        })
    }

    /// Push the expiry of a live resource back by `by`.
    pub fn extend(&self, id: ResourceId, by: Duration) -> Result<TemporalRecord, ValidationError> {
        if by < Duration::zero() {
            return Err(ValidationError::Malformed("negative extension".to_owned()));
        }
        let mut records = self.lock()?;
        let current = records.get(&id).ok_or(ValidationError::UnknownResource(id))?;
        let expires_at = current
            .expires_at
            .checked_add_signed(by)
            .ok_or_else(|| ValidationError::Malformed("extension overflows".to_owned()))?;
        let next = TemporalRecord {
            expires_at,
            ..current.clone()
        };
        records.insert(id, next.clone());
        Ok(next)
    }

    /// Force immediate expiry.
    pub fn revoke(&self, id: ResourceId, now: DateTime<Utc>) -> Result<TemporalRecord, ValidationError> {
        let mut records = self.lock()?;
        let current = records.get(&id).ok_or(ValidationError::UnknownResource(id))?;
        let next = TemporalRecord {
            expires_at: now.min(current.expires_at),
            revoked: true,
            ..current.clone()
        };
        records.insert(id, next.clone());
        Ok(next)
    }

    /// Drop the record for `id`, returning it if present.
    pub fn remove(&self, id: ResourceId) -> Option<TemporalRecord> {
        self.records.lock().ok()?.remove(&id)
    }

    /// Ids whose records are expired or revoked at `now`.
    pub fn expired_ids(&self, now: DateTime<Utc>) -> Vec<ResourceId> {
        let Ok(records) = self.records.lock() else {
            return Vec::new();
        };
        records
            .iter()
            .filter(|(_, r)| r.is_expired(now))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Remove every expired or revoked record. Returns how many were removed.
    ///
    /// Idempotent: a second call at the same instant removes nothing.
    pub fn cleanup_expired(&self, now: DateTime<Utc>) -> usize {
        let Ok(mut records) = self.records.lock() else {
            return 0;
        };
        let before = records.len();
        records.retain(|_, r| !r.is_expired(now));
        before.saturating_sub(records.len())
    }

    /// Live ids whose remaining time lies in `[0, window]`, soonest first.
    pub fn expiring_soon(&self, window: Duration, now: DateTime<Utc>) -> Vec<(ResourceId, Duration)> {
        let Ok(records) = self.records.lock() else {
            return Vec::new();
        };
        let mut soon: Vec<_> = records
            .iter()
            .filter(|(_, r)| !r.is_expired(now))
            .map(|(id, r)| (*id, r.remaining(now)))
            .filter(|(_, remaining)| *remaining >= Duration::zero() && *remaining <= window)
            .collect();
        soon.sort_by_key(|(_, remaining)| *remaining);
        soon
    }

    /// Number of tracked records.
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Whether no records are tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
