//! N-of-N XOR key splitting with requirement-tagged shards.
//!
//! Every shard is needed to rebuild the key. Reassembly checks the set is
//! complete, that each shard's requirement is satisfied and that the result
//! matches the fingerprint recorded at split time. Any failure aborts the
//! whole reassembly; a partial key is never produced.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

use super::keys::SymmetricKey;
use super::CryptoError;
use crate::types::RitualKind;

const FINGERPRINT_DOMAIN: &[u8] = b"quietkey-shard-set-v1";

/// The condition that must hold for a shard to take part in reassembly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "ritual", rename_all = "snake_case")]
pub enum ShardRequirement {
    /// The requesting device holds the actor's device key.
    Device,
    /// The requester's live presence satisfies the resource.
    Presence,
    /// A biometric proof was supplied.
    Biometric,
    /// The named ritual was recently completed for the resource.
    Ritual(RitualKind),
}

impl fmt::Display for ShardRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device => f.write_str("device"),
            Self::Presence => f.write_str("presence"),
            Self::Biometric => f.write_str("biometric"),
            Self::Ritual(kind) => write!(f, "ritual:{kind}"),
        }
    }
}

/// One fragment of key material. Meaningless on its own.
#[derive(Clone)]
pub struct KeyShard {
    /// Identifies the split this shard belongs to.
    pub set_id: Uuid,
    /// Position within the set.
    pub index: u8,
    /// Number of shards in the set.
    pub total: u8,
    /// Gating condition.
    pub requirement: ShardRequirement,
    payload: Vec<u8>,
}

impl KeyShard {
    /// Build a shard from its parts.
    pub fn new(
        set_id: Uuid,
        index: u8,
        total: u8,
        requirement: ShardRequirement,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            set_id,
            index,
            total,
            requirement,
            payload,
        }
    }

    /// Borrow the raw payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl Drop for KeyShard {
    fn drop(&mut self) {
        self.payload.zeroize();
    }
}

impl fmt::Debug for KeyShard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyShard")
            .field("set_id", &self.set_id)
            .field("index", &self.index)
            .field("total", &self.total)
            .field("requirement", &self.requirement)
            .field("payload", &"__REDACTED__")
            .finish()
    }
}

/// The output of [`shard`]: the shards plus the fingerprint of the key.
#[derive(Debug, Clone)]
pub struct ShardSet {
    /// Identifies the split.
    pub set_id: Uuid,
    /// Fingerprint of the original key, checked on reassembly.
    pub fingerprint: [u8; 32],
    /// One shard per requirement, in requirement order.
    pub shards: Vec<KeyShard>,
}

fn set_fingerprint(set_id: Uuid, key: &SymmetricKey) -> [u8; 32] {
    let mut domain = FINGERPRINT_DOMAIN.to_vec();
    domain.extend_from_slice(set_id.as_bytes());
    key.fingerprint(&domain)
}

/// Split `key` into one shard per requirement.
pub fn shard(key: &SymmetricKey, requirements: &[ShardRequirement]) -> Result<ShardSet, CryptoError> {
    if key.is_empty() {
        return Err(CryptoError::EmptyKey);
    }
    let total = u8::try_from(requirements.len()).map_err(|_| CryptoError::TooManyShards)?;
    let Some((last_requirement, leading)) = requirements.split_last() else {
        return Err(CryptoError::NoShards);
    };

    let set_id = Uuid::new_v4();
    let mut remainder = Zeroizing::new(key.as_bytes().to_vec());
    let mut shards = Vec::with_capacity(requirements.len());
    for (index, requirement) in (0u8..).zip(leading) {
        let mut pad = vec![0u8; key.len()];
        rand::rngs::OsRng.fill_bytes(&mut pad);
        for (r, p) in remainder.iter_mut().zip(&pad) {
            *r ^= p;
        }
        shards.push(KeyShard::new(set_id, index, total, requirement.clone(), pad));
    }
    let last_index = total.saturating_sub(1);
    shards.push(KeyShard::new(
        set_id,
        last_index,
        total,
        last_requirement.clone(),
        remainder.to_vec(),
    ));

    Ok(ShardSet {
        set_id,
        fingerprint: set_fingerprint(set_id, key),
        shards,
    })
}

/// Rebuild a key from a complete shard set.
///
/// `is_satisfied` is asked about every shard's requirement; a single `false`
/// fails the whole reassembly.
pub fn reassemble(
    shards: &[KeyShard],
    fingerprint: &[u8; 32],
    is_satisfied: impl Fn(&ShardRequirement) -> bool,
) -> Result<SymmetricKey, CryptoError> {
    let first = shards.first().ok_or(CryptoError::NoShards)?;
    let (set_id, total, key_len) = (first.set_id, first.total, first.payload.len());

    let mut seen = vec![false; usize::from(total)];
    for s in shards {
        if s.set_id != set_id || s.total != total || s.payload.len() != key_len {
            return Err(CryptoError::MismatchedShardSet);
        }
        let slot = seen
            .get_mut(usize::from(s.index))
            .ok_or(CryptoError::MismatchedShardSet)?;
        if *slot {
            return Err(CryptoError::DuplicateShard(s.index));
        }
        *slot = true;
        if !is_satisfied(&s.requirement) {
            return Err(CryptoError::RequirementUnmet(s.requirement.clone()));
        }
    }
    let present = seen.iter().filter(|s| **s).count();
    if present != usize::from(total) {
        return Err(CryptoError::IncompleteShardSet {
            expected: usize::from(total),
            got: present,
        });
    }

    let mut acc = Zeroizing::new(vec![0u8; key_len]);
    for s in shards {
        for (a, p) in acc.iter_mut().zip(&s.payload) {
            *a ^= p;
        }
    }
    let key = SymmetricKey::from_bytes(acc.to_vec());
    if set_fingerprint(set_id, &key) != *fingerprint {
        return Err(CryptoError::FingerprintMismatch);
    }
    Ok(key)
}
