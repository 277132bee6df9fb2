//! Ritual unlock state machines (whisper, gesture, breath).
//!
//! One machine per (resource, ritual kind):
//!
//! ```text
//! Ready -> Listening -> Processing -> Verified -> UnlockGranted -> Ready
//!                   \              \
//!                    +--------------+-> UnlockDenied -> Ready
//! ```
//!
//! Processing and Verified only exist inside a single locked transition, so
//! observers only ever see Ready, Listening or a terminal state. A session
//! that is cancelled, times out or is dropped mid-listen resolves to
//! UnlockDenied.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::types::{BoundedLog, ResourceId, RitualKind};

const ENROLMENT_DOMAIN: &[u8] = b"quietkey-ritual-v1";

/// Ritual machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RitualState {
    /// Idle.
    Ready,
    /// Sensor capture in progress.
    Listening,
    /// A confident reading is being verified.
    Processing,
    /// The credential matched.
    Verified,
    /// Unlock granted.
    UnlockGranted,
    /// Unlock denied.
    UnlockDenied,
}

/// Output of a hardware sensor collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    /// Detection confidence in `[0, 1]`.
    pub confidence: f64,
    /// Whether the sensor considers the signal a match.
    pub is_match: bool,
    /// Capture time.
    pub timestamp: DateTime<Utc>,
}

/// Sensor collaborator failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SensorError {
    /// The sensor could not produce a reading.
    #[error("sensor unavailable: {0}")]
    Unavailable(String),
}

/// A capture device for one or more ritual kinds.
#[async_trait]
pub trait RitualSensor: Send + Sync {
    /// Capture one reading for `kind`.
    async fn capture(&self, kind: RitualKind) -> Result<SensorReading, SensorError>;
}

/// The phrase or pattern the user performed, as bytes.
#[derive(Clone)]
pub struct RitualCredential(Zeroizing<Vec<u8>>);

impl RitualCredential {
    /// Wrap raw credential bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Zeroizing::new(bytes.into()))
    }
}

impl fmt::Debug for RitualCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("__REDACTED__")
    }
}

/// Why an unlock was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DenialCause {
    /// Confidence below the threshold.
    LowConfidence,
    /// The sensor reported no match.
    NoMatch,
    /// The resource no longer exists.
    UnknownResource,
    /// No credential was supplied.
    MissingCredential,
    /// No credential was enrolled for this resource and kind.
    NotEnrolled,
    /// The credential did not match the enrolment.
    CredentialMismatch,
    /// No reading arrived in time.
    SensorTimeout,
    /// The sensor failed.
    SensorFailure,
    /// The session was stopped externally.
    Cancelled,
}

/// Final result of one unlock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "cause", rename_all = "snake_case")]
pub enum RitualOutcome {
    /// Unlock granted.
    Granted,
    /// Unlock denied.
    Denied(DenialCause),
}

/// Record of one listening session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnlockSession {
    /// Session id.
    pub id: Uuid,
    /// Target resource.
    pub resource: ResourceId,
    /// Ritual kind.
    pub kind: RitualKind,
    /// When listening started.
    pub started_at: DateTime<Utc>,
    /// When the session resolved.
    pub ended_at: Option<DateTime<Utc>>,
    /// Consecutive attempts on this machine, including this one.
    pub attempts: u32,
    /// How it resolved.
    pub outcome: Option<RitualOutcome>,
}

/// Invalid use of a ritual machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RitualError {
    /// The action is not allowed in the current state.
    #[error("cannot {action} while {from:?}")]
    InvalidTransition {
        /// Current state.
        from: RitualState,
        /// Attempted action.
        action: &'static str,
    },
    /// The target resource does not exist.
    #[error("unknown resource: {0}")]
    UnknownResource(ResourceId),
    /// Internal state lock poisoned.
    #[error("ritual state unavailable")]
    Unavailable,
}

#[derive(Debug)]
struct Machine {
    state: RitualState,
    session: Option<UnlockSession>,
    consecutive_attempts: u32,
}

impl Default for Machine {
    fn default() -> Self {
        Self {
            state: RitualState::Ready,
            session: None,
            consecutive_attempts: 0,
        }
    }
}

type MachineKey = (ResourceId, RitualKind);

/// All ritual machines, their enrolments and the session log.
#[derive(Debug)]
pub struct RitualUnlocker {
    machines: Mutex<HashMap<MachineKey, Machine>>,
    enrolments: Mutex<HashMap<MachineKey, [u8; 32]>>,
    sessions: Mutex<BoundedLog<UnlockSession>>,
    threshold: f64,
}

fn enrolment_digest(resource: ResourceId, kind: RitualKind, secret: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(ENROLMENT_DOMAIN);
    hasher.update(resource.as_uuid().as_bytes());
    hasher.update(kind.as_str().as_bytes());
    hasher.update(secret);
    hasher.finalize().into()
}

impl RitualUnlocker {
    /// Create an unlocker with the given confidence threshold and session cap.
    pub fn new(threshold: f64, session_capacity: usize) -> Self {
        Self {
            machines: Mutex::new(HashMap::new()),
            enrolments: Mutex::new(HashMap::new()),
            sessions: Mutex::new(BoundedLog::new(session_capacity)),
            threshold,
        }
    }

    /// Store the expected credential for (resource, kind). Replaces any
    /// previous enrolment.
    pub fn enroll(
        &self,
        resource: ResourceId,
        kind: RitualKind,
        secret: &RitualCredential,
    ) -> Result<(), RitualError> {
        let digest = enrolment_digest(resource, kind, &secret.0);
        self.enrolments
            .lock()
            .map_err(|_| RitualError::Unavailable)?
            .insert((resource, kind), digest);
        Ok(())
    }

    /// Drop every machine and enrolment for a destroyed resource.
    pub fn forget(&self, resource: ResourceId) {
        if let Ok(mut machines) = self.machines.lock() {
            machines.retain(|(id, _), _| *id != resource);
        }
        if let Ok(mut enrolments) = self.enrolments.lock() {
            enrolments.retain(|(id, _), _| *id != resource);
        }
    }

    /// Number of (resource, kind) machines currently tracked.
    pub fn machine_count(&self) -> usize {
        self.machines.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Current state of (resource, kind). Unknown machines are Ready.
    pub fn state(&self, resource: ResourceId, kind: RitualKind) -> RitualState {
        self.machines
            .lock()
            .ok()
            .and_then(|m| m.get(&(resource, kind)).map(|m| m.state))
            .unwrap_or(RitualState::Ready)
    }

    /// Enter Listening. Terminal states are reset to Ready first.
    pub fn begin(
        &self,
        resource: ResourceId,
        kind: RitualKind,
        now: DateTime<Utc>,
    ) -> Result<Uuid, RitualError> {
        let mut machines = self.machines.lock().map_err(|_| RitualError::Unavailable)?;
        let machine = machines.entry((resource, kind)).or_default();
        match machine.state {
            RitualState::Ready | RitualState::UnlockGranted | RitualState::UnlockDenied => {}
            from => {
                return Err(RitualError::InvalidTransition {
                    from,
                    action: "begin listening",
                })
            }
        }
        let attempts = machine.consecutive_attempts.saturating_add(1);
        let id = Uuid::new_v4();
        machine.consecutive_attempts = attempts;
        machine.session = Some(UnlockSession {
            id,
            resource,
            kind,
            started_at: now,
            ended_at: None,
            attempts,
            outcome: None,
        });
        machine.state = RitualState::Listening;
        debug!(resource = %resource, kind = %kind, session = %id, "ritual listening");
        Ok(id)
    }

    /// Feed a sensor reading to a listening machine and resolve it.
    ///
    /// `resource_exists` is the caller's lookup result, taken under the
    /// resource's exclusion.
    pub fn submit(
        &self,
        resource: ResourceId,
        kind: RitualKind,
        reading: &SensorReading,
        credential: Option<&RitualCredential>,
        resource_exists: bool,
        now: DateTime<Utc>,
    ) -> Result<RitualOutcome, RitualError> {
        let expected = self
            .enrolments
            .lock()
            .map_err(|_| RitualError::Unavailable)?
            .get(&(resource, kind))
            .copied();
        let mut machines = self.machines.lock().map_err(|_| RitualError::Unavailable)?;
        let not_listening = |from| RitualError::InvalidTransition {
            from,
            action: "submit a reading",
        };
        let machine = machines
            .get_mut(&(resource, kind))
            .ok_or(not_listening(RitualState::Ready))?;
        if machine.state != RitualState::Listening {
            return Err(not_listening(machine.state));
        }

        // NaN confidence fails this comparison and is denied.
        let confident = reading.confidence >= self.threshold;
        let outcome = if !confident {
            RitualOutcome::Denied(DenialCause::LowConfidence)
        } else if !reading.is_match {
            RitualOutcome::Denied(DenialCause::NoMatch)
        } else {
            machine.state = RitualState::Processing;
            verify(resource, kind, credential, expected, resource_exists)
        };
        if outcome == RitualOutcome::Granted {
            machine.state = RitualState::Verified;
        }
        let session = resolve(machine, outcome, now);
        drop(machines);
        self.archive(session);
        Ok(outcome)
    }

    /// Resolve a listening machine as denied. No-op in any other state.
    pub fn abort(
        &self,
        resource: ResourceId,
        kind: RitualKind,
        cause: DenialCause,
        now: DateTime<Utc>,
    ) -> Option<RitualOutcome> {
        let mut machines = self.machines.lock().ok()?;
        let machine = machines.get_mut(&(resource, kind))?;
        if machine.state != RitualState::Listening {
            return None;
        }
        let outcome = RitualOutcome::Denied(cause);
        let session = resolve(machine, outcome, now);
        drop(machines);
        self.archive(session);
        Some(outcome)
    }

    /// Return a terminal machine to Ready.
    pub fn reset(&self, resource: ResourceId, kind: RitualKind) -> Result<(), RitualError> {
        let mut machines = self.machines.lock().map_err(|_| RitualError::Unavailable)?;
        let Some(machine) = machines.get_mut(&(resource, kind)) else {
            return Ok(());
        };
        match machine.state {
            RitualState::UnlockGranted | RitualState::UnlockDenied | RitualState::Ready => {
                machine.state = RitualState::Ready;
                Ok(())
            }
            from => Err(RitualError::InvalidTransition {
                from,
                action: "reset",
            }),
        }
    }

    /// Arm a guard that denies the session if dropped while still listening.
    pub fn guard(&self, resource: ResourceId, kind: RitualKind) -> ListeningGuard<'_> {
        ListeningGuard {
            unlocker: self,
            resource,
            kind,
            armed: true,
        }
    }

    /// Archived sessions, oldest first.
    pub fn sessions(&self) -> Vec<UnlockSession> {
        self.sessions
            .lock()
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn archive(&self, session: Option<UnlockSession>) {
        let Some(session) = session else { return };
        info!(
            resource = %session.resource,
            kind = %session.kind,
            attempts = session.attempts,
            outcome = ?session.outcome,
            "ritual session resolved"
        );
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.push(session);
        }
    }
}

fn verify(
    resource: ResourceId,
    kind: RitualKind,
    credential: Option<&RitualCredential>,
    expected: Option<[u8; 32]>,
    resource_exists: bool,
) -> RitualOutcome {
    if !resource_exists {
        return RitualOutcome::Denied(DenialCause::UnknownResource);
    }
    let Some(credential) = credential else {
        return RitualOutcome::Denied(DenialCause::MissingCredential);
    };
    let Some(expected) = expected else {
        return RitualOutcome::Denied(DenialCause::NotEnrolled);
    };
    if digests_match(&enrolment_digest(resource, kind, &credential.0), &expected) {
        RitualOutcome::Granted
    } else {
        RitualOutcome::Denied(DenialCause::CredentialMismatch)
    }
}

/// Compares every byte so timing does not reveal the matching prefix.
fn digests_match(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn resolve(machine: &mut Machine, outcome: RitualOutcome, now: DateTime<Utc>) -> Option<UnlockSession> {
    machine.state = match outcome {
        RitualOutcome::Granted => {
            machine.consecutive_attempts = 0;
            RitualState::UnlockGranted
        }
        RitualOutcome::Denied(_) => RitualState::UnlockDenied,
    };
    machine.session.take().map(|s| UnlockSession {
        ended_at: Some(now),
        outcome: Some(outcome),
        ..s
    })
}

/// Denies a listening session when dropped, unless disarmed.
#[derive(Debug)]
pub struct ListeningGuard<'a> {
    unlocker: &'a RitualUnlocker,
    resource: ResourceId,
    kind: RitualKind,
    armed: bool,
}

impl ListeningGuard<'_> {
    /// The session resolved normally; do nothing on drop.
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ListeningGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.unlocker
                .abort(self.resource, self.kind, DenialCause::Cancelled, Utc::now());
        }
    }
}
