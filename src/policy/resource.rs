//! Protected resources: one gating envelope shared by every resource kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::presence::PresenceState;
use crate::types::{ActorId, ResourceId};
use crate::vault::aead::SealedBox;
use crate::vault::shard::ShardRequirement;
use crate::vault::WrappedKey;

/// What the resource is. Gating is identical for every kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceKind {
    /// A chat message.
    Message {
        /// Conversation the message belongs to.
        thread: String,
    },
    /// A photo, clip or voice note.
    Media {
        /// MIME type of the decrypted payload.
        mime_type: String,
    },
    /// A shared space.
    Room {
        /// Display name.
        name: String,
    },
    /// Raw key material handed to another component.
    Key {
        /// Label for the key.
        label: String,
    },
}

/// The gates a resource is protected by.
#[derive(Debug, Clone, PartialEq)]
pub struct GatingEnvelope {
    /// Absolute expiry. `None` never expires.
    pub expires_at: Option<DateTime<Utc>>,
    /// Presence the requester must satisfy, if any.
    pub required_presence: Option<PresenceState>,
    /// One content-key shard is produced per requirement.
    pub shard_requirements: Vec<ShardRequirement>,
}

impl GatingEnvelope {
    /// Envelope with the given shard requirements, no expiry and no presence
    /// requirement.
    pub fn new(shard_requirements: Vec<ShardRequirement>) -> Self {
        Self {
            expires_at: None,
            required_presence: None,
            shard_requirements,
        }
    }

    /// Expire at an absolute instant.
    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Require a presence match.
    pub fn requiring_presence(mut self, presence: PresenceState) -> Self {
        self.required_presence = Some(presence);
        self
    }
}

/// A live protected resource. Only ciphertext is held; dropping the value
/// zeroes it.
#[derive(Debug)]
pub struct ProtectedResource {
    /// Resource id.
    pub id: ResourceId,
    /// Owner; the owner's key bundle seals the content key.
    pub owner: ActorId,
    /// Variant-specific descriptor.
    pub kind: ResourceKind,
    /// Gates.
    pub envelope: GatingEnvelope,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last successful access.
    pub accessed_at: Option<DateTime<Utc>>,
    /// Who accessed it last.
    pub accessed_by: Option<ActorId>,
    pub(crate) payload: SealedBox,
    pub(crate) wrapped_key: WrappedKey,
}

impl ProtectedResource {
    /// Metadata for persistence. Carries no key or payload material.
    pub fn record(&self) -> ResourceRecord {
        ResourceRecord {
            id: self.id,
            owner: self.owner.clone(),
            kind: self.kind.clone(),
            created_at: self.created_at,
            expires_at: self.envelope.expires_at,
            presence_gated: self.envelope.required_presence.is_some(),
            shard_requirements: self.envelope.shard_requirements.clone(),
            bundle_generation: self.wrapped_key.bundle_generation,
        }
    }
}

impl Drop for ProtectedResource {
    fn drop(&mut self) {
        self.payload.zeroize();
    }
}

/// Persistable description of a protected resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Resource id.
    pub id: ResourceId,
    /// Owner.
    pub owner: ActorId,
    /// Kind.
    pub kind: ResourceKind,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Expiry at creation time.
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether a presence match is required.
    pub presence_gated: bool,
    /// Shard requirements in index order.
    pub shard_requirements: Vec<ShardRequirement>,
    /// Owner bundle generation the content key is sealed under.
    pub bundle_generation: u32,
}
