//! Access requests and decisions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::presence::PresenceState;
use crate::types::{ActorId, ResourceId};

/// Why access was denied. Every denial carries one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DenyReason {
    /// Past expiry; the resource has been destroyed.
    Expired,
    /// Explicitly revoked; the resource has been destroyed.
    Revoked,
    /// The security seal is engaged.
    Sealed,
    /// The requester's presence does not satisfy the resource.
    PresenceMismatch,
    /// The content key could not be reassembled.
    KeyUnavailable,
    /// No such resource.
    UnknownResource,
    /// Engine state could not be read.
    Unavailable,
}

impl DenyReason {
    /// Stable reason code.
    pub fn code(self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::Revoked => "revoked",
            Self::Sealed => "sealed",
            Self::PresenceMismatch => "presence-mismatch",
            Self::KeyUnavailable => "key-unavailable",
            Self::UnknownResource => "unknown-resource",
            Self::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Result of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum AccessDecision {
    /// All gates passed.
    Allow,
    /// A gate failed.
    Deny(DenyReason),
}

impl AccessDecision {
    /// Whether access is allowed.
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }

    /// The denial reason, if denied.
    pub fn deny_reason(self) -> Option<DenyReason> {
        match self {
            Self::Allow => None,
            Self::Deny(reason) => Some(reason),
        }
    }
}

/// Returned by [`super::AccessPolicyEngine::open`] when a gate fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("access denied: {0}")]
pub struct AccessDenied(pub DenyReason);

/// Proofs supplied by device and biometric collaborators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardProofs {
    /// The requesting device holds the actor's device key.
    pub device: bool,
    /// A biometric check passed for this request.
    pub biometric: bool,
}

impl ShardProofs {
    /// Both device and biometric proofs present.
    pub fn all() -> Self {
        Self {
            device: true,
            biometric: true,
        }
    }
}

/// One access attempt.
#[derive(Debug, Clone)]
pub struct AccessRequest {
    /// Who is asking.
    pub actor: ActorId,
    /// What they want.
    pub resource: ResourceId,
    /// Decision time.
    pub now: DateTime<Utc>,
    /// Live presence. Falls back to the actor's last recorded presence.
    pub presence: Option<PresenceState>,
    /// Collaborator proofs.
    pub proofs: ShardProofs,
}

impl AccessRequest {
    /// A request with no explicit presence and no proofs.
    pub fn new(actor: ActorId, resource: ResourceId, now: DateTime<Utc>) -> Self {
        Self {
            actor,
            resource,
            now,
            presence: None,
            proofs: ShardProofs::default(),
        }
    }

    /// Attach the live presence.
    pub fn with_presence(mut self, presence: PresenceState) -> Self {
        self.presence = Some(presence);
        self
    }

    /// Attach collaborator proofs.
    pub fn with_proofs(mut self, proofs: ShardProofs) -> Self {
        self.proofs = proofs;
        self
    }
}
