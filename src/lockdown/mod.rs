//! Global security lockdown: a two-state seal machine.
//!
//! `Unsealed -> Sealed` on an explicit trigger or when the failed-attempt
//! counter reaches the threshold. `Sealed -> Unsealed` only once the seal
//! duration has elapsed; the release is applied lazily by whichever call
//! observes it first. Every transition replaces the whole [`SealState`].

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::LockdownConfig;

/// Why the seal was engaged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "cause", content = "detail", rename_all = "snake_case")]
pub enum SealTrigger {
    /// A spoken lockdown command.
    VoiceCommand,
    /// Triple-tap emergency gesture.
    TripleTap,
    /// The failed-attempt counter reached the threshold.
    FailedAttempts(u32),
    /// An untrusted device came into proximity.
    ProximityThreat,
    /// The user sealed manually.
    Manual,
    /// A collaborator flagged suspicious activity.
    SuspiciousActivity(String),
}

impl SealTrigger {
    /// Human-readable reason string.
    pub fn reason(&self) -> String {
        match self {
            Self::VoiceCommand => "voice command".to_owned(),
            Self::TripleTap => "triple-tap gesture".to_owned(),
            Self::FailedAttempts(count) => format!("{count} failed attempts"),
            Self::ProximityThreat => "proximity threat".to_owned(),
            Self::Manual => "manual activation".to_owned(),
            Self::SuspiciousActivity(detail) => format!("suspicious activity: {detail}"),
        }
    }
}

/// Complete lockdown state. Replaced as a unit on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SealState {
    /// Whether the seal is engaged.
    pub active: bool,
    /// What engaged it.
    pub trigger: Option<SealTrigger>,
    /// When it was engaged.
    pub triggered_at: Option<DateTime<Utc>>,
    /// Failed attempts since the last trigger.
    pub failure_count: u32,
    /// Incremented on every replacement.
    pub version: u64,
}

/// Read-only view of the lockdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SealStatus {
    /// Whether the seal is engaged.
    pub active: bool,
    /// Trigger reason, if sealed.
    pub reason: Option<String>,
    /// Failed attempts since the last trigger.
    pub failure_count: u32,
    /// Seconds until auto-release; zero when unsealed.
    pub remaining_secs: i64,
    /// Whether the seal window has elapsed and release is due.
    pub auto_release_eligible: bool,
}

/// Lockdown failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockdownError {
    /// An unseal was requested before the seal duration elapsed.
    #[error("seal window still active for {remaining_secs}s")]
    SealWindowActive {
        /// Seconds left in the window.
        remaining_secs: i64,
    },
    /// The state lock was poisoned.
    #[error("lockdown state unavailable")]
    Unavailable,
}

/// The seal state machine.
#[derive(Debug)]
pub struct SecurityLockdown {
    state: Mutex<SealState>,
    threshold: u32,
    duration: Duration,
}

impl SecurityLockdown {
    /// Create an unsealed machine.
    pub fn new(config: &LockdownConfig) -> Self {
        Self {
            state: Mutex::new(SealState::default()),
            threshold: config.failure_threshold.max(1),
            duration: config.seal_duration(),
        }
    }

    fn remaining(&self, state: &SealState, now: DateTime<Utc>) -> Duration {
        match (state.active, state.triggered_at) {
            (true, Some(at)) => {
                let release_at = at.checked_add_signed(self.duration).unwrap_or(at);
                (release_at - now).max(Duration::zero())
            }
            _ => Duration::zero(),
        }
    }

    fn release_if_due(&self, state: &mut SealState, now: DateTime<Utc>) {
        if state.active && self.remaining(state, now) <= Duration::zero() {
            info!(
                reason = state.trigger.as_ref().map(SealTrigger::reason).as_deref(),
                "seal window elapsed, auto-releasing"
            );
            *state = SealState {
                active: false,
                trigger: None,
                triggered_at: None,
                failure_count: 0,
                version: state.version.saturating_add(1),
            };
        }
    }

    fn engage(&self, state: &mut SealState, cause: SealTrigger, now: DateTime<Utc>) -> SealState {
        let next = SealState {
            active: true,
            trigger: Some(cause),
            triggered_at: Some(now),
            failure_count: 0,
            version: state.version.saturating_add(1),
        };
        warn!(
            reason = next.trigger.as_ref().map(SealTrigger::reason).as_deref(),
            "security seal engaged"
        );
        *state = next.clone();
        next
    }

    /// Engage the seal. Resets the failure counter. Re-triggering while
    /// sealed restarts the window.
    pub fn trigger(&self, cause: SealTrigger, now: DateTime<Utc>) -> Result<SealState, LockdownError> {
        let mut state = self.state.lock().map_err(|_| LockdownError::Unavailable)?;
        Ok(self.engage(&mut state, cause, now))
    }

    /// Count a failed attempt; reaching the threshold engages the seal.
    ///
    /// Returns the state after the attempt was recorded. Counting and
    /// sealing happen in one critical section, so exactly one attempt
    /// crosses the threshold.
    pub fn record_failed_attempt(&self, now: DateTime<Utc>) -> Result<SealState, LockdownError> {
        let mut state = self.state.lock().map_err(|_| LockdownError::Unavailable)?;
        self.release_if_due(&mut state, now);
        let count = state.failure_count.saturating_add(1);
        if count < self.threshold {
            *state = SealState {
                failure_count: count,
                version: state.version.saturating_add(1),
                ..state.clone()
            };
            return Ok(state.clone());
        }
        Ok(self.engage(&mut state, SealTrigger::FailedAttempts(count), now))
    }

    /// Whether the seal is engaged at `now`, applying any due release.
    /// A poisoned state reads as sealed.
    pub fn is_sealed(&self, now: DateTime<Utc>) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return true;
        };
        self.release_if_due(&mut state, now);
        state.active
    }

    /// Explicit unseal. Rejected while the seal window is still open.
    pub fn unseal(&self, now: DateTime<Utc>) -> Result<SealState, LockdownError> {
        let mut state = self.state.lock().map_err(|_| LockdownError::Unavailable)?;
        let remaining = self.remaining(&state, now);
        if state.active && remaining > Duration::zero() {
            return Err(LockdownError::SealWindowActive {
                remaining_secs: remaining.num_seconds(),
            });
        }
        self.release_if_due(&mut state, now);
        Ok(state.clone())
    }

    /// Snapshot of the state without applying a due release.
    pub fn snapshot(&self) -> Option<SealState> {
        self.state.lock().ok().map(|s| s.clone())
    }

    /// Read-only status at `now`.
    pub fn status(&self, now: DateTime<Utc>) -> SealStatus {
        let Ok(state) = self.state.lock() else {
            return SealStatus {
                active: true,
                reason: Some("lockdown state unavailable".to_owned()),
                failure_count: 0,
                remaining_secs: 0,
                auto_release_eligible: false,
            };
        };
        let remaining = self.remaining(&state, now);
        SealStatus {
            active: state.active,
            reason: state.trigger.as_ref().map(SealTrigger::reason),
            failure_count: state.failure_count,
            remaining_secs: remaining.num_seconds(),
            auto_release_eligible: state.active && remaining <= Duration::zero(),
        }
    }
}
