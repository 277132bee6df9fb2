//! Key shard vault: per-identity key bundles and content-key wrapping.
//!
//! Every identity owns a [`SecurityKeyBundle`] of three independent keys
//! (device, presence, biometric). A protected resource's content key is
//! split into one shard per requirement and each shard is sealed under the
//! owner's bundle key for that requirement. Re-issuing a bundle replaces all
//! three keys, so shards sealed under the old bundle can never be opened
//! again.

pub mod aead;
pub mod keys;
pub mod shard;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rand::RngCore;
use tracing::info;
use uuid::Uuid;

use crate::types::ValidationError;

use self::aead::{AeadCipher, AesGcmCipher, SealedBox};
use self::keys::{mix, KeyMixing, SymmetricKey};
use self::shard::{reassemble, KeyShard, ShardRequirement};

const ALIAS_BYTES: usize = 6;

/// Cryptographic failure. Always fails closed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// Key has the wrong length for the primitive.
    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength {
        /// Required length.
        expected: usize,
        /// Supplied length.
        got: usize,
    },
    /// A key with no bytes was supplied.
    #[error("empty key")]
    EmptyKey,
    /// Encryption failed.
    #[error("encryption failed")]
    Encrypt,
    /// Authentication tag mismatch or corrupt ciphertext.
    #[error("decryption failed")]
    Decrypt,
    /// No key is available for the operation.
    #[error("key unavailable: {0}")]
    MissingKey(String),
    /// HKDF expansion failed.
    #[error("key derivation failed")]
    Derivation,
    /// A split was requested with no requirements, or no shards were supplied.
    #[error("no shards")]
    NoShards,
    /// More than 255 requirements.
    #[error("too many shards")]
    TooManyShards,
    /// Not every shard of the set was supplied.
    #[error("incomplete shard set: expected {expected}, got {got}")]
    IncompleteShardSet {
        /// Shards in the set.
        expected: usize,
        /// Shards supplied.
        got: usize,
    },
    /// Shards disagree on set id, size or length.
    #[error("shards do not belong to one set")]
    MismatchedShardSet,
    /// The same shard index was supplied twice.
    #[error("duplicate shard index {0}")]
    DuplicateShard(u8),
    /// A shard's gating condition is not currently met.
    #[error("shard requirement not met: {0}")]
    RequirementUnmet(ShardRequirement),
    /// The rebuilt key does not match the recorded fingerprint.
    #[error("reassembled key fingerprint mismatch")]
    FingerprintMismatch,
}

/// The three keys issued to an identity, each held as a tagged shard.
#[derive(Clone)]
pub struct SecurityKeyBundle {
    /// Identity the bundle was issued to.
    pub identity: String,
    /// Random public alias for the bundle.
    pub alias: String,
    /// Incremented on every re-issue.
    pub generation: u32,
    /// When this generation was issued.
    pub issued_at: DateTime<Utc>,
    shards: Vec<KeyShard>,
}

impl SecurityKeyBundle {
    fn generate(identity: &str, generation: u32) -> Self {
        let set_id = Uuid::new_v4();
        let slots = [
            ShardRequirement::Device,
            ShardRequirement::Presence,
            ShardRequirement::Biometric,
        ];
        let total = 3;
        let shards = (0u8..)
            .zip(slots)
            .map(|(index, requirement)| {
                let key = SymmetricKey::generate();
                KeyShard::new(set_id, index, total, requirement, key.as_bytes().to_vec())
            })
            .collect();
        Self {
            identity: identity.to_owned(),
            alias: random_alias(),
            generation,
            issued_at: Utc::now(),
            shards,
        }
    }

    /// Requirement tags of the bundle's shards.
    pub fn shards(&self) -> &[KeyShard] {
        &self.shards
    }

    fn slot_key(&self, requirement: &ShardRequirement) -> Option<SymmetricKey> {
        self.shards
            .iter()
            .find(|s| &s.requirement == requirement)
            .map(|s| SymmetricKey::from_bytes(s.payload().to_vec()))
    }

    /// The key that seals shards of the given requirement.
    ///
    /// Ritual shards are sealed under the device key mixed with the
    /// biometric key.
    pub fn wrapping_key(
        &self,
        requirement: &ShardRequirement,
        mixing: KeyMixing,
    ) -> Result<SymmetricKey, CryptoError> {
        let missing = || CryptoError::MissingKey(format!("{}:{requirement}", self.alias));
        match requirement {
            ShardRequirement::Ritual(_) => {
                let device = self
                    .slot_key(&ShardRequirement::Device)
                    .ok_or_else(missing)?;
                let biometric = self
                    .slot_key(&ShardRequirement::Biometric)
                    .ok_or_else(missing)?;
                mix(mixing, &device, &biometric)
            }
            other => self.slot_key(other).ok_or_else(missing),
        }
    }
}

impl fmt::Debug for SecurityKeyBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityKeyBundle")
            .field("identity", &self.identity)
            .field("alias", &self.alias)
            .field("generation", &self.generation)
            .field("issued_at", &self.issued_at)
            .field("shards", &self.shards.len())
            .finish()
    }
}

fn random_alias() -> String {
    let mut bytes = [0u8; ALIAS_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("qk-{}", hex::encode(bytes))
}

/// One content-key shard sealed under a bundle key.
#[derive(Debug, Clone)]
pub struct WrappedShard {
    /// Position within the set.
    pub index: u8,
    /// Gating condition.
    pub requirement: ShardRequirement,
    sealed: SealedBox,
}

/// A content key split and sealed for storage alongside a resource.
#[derive(Debug, Clone)]
pub struct WrappedKey {
    /// Split identifier.
    pub set_id: Uuid,
    /// Bundle generation the shards were sealed under.
    pub bundle_generation: u32,
    fingerprint: [u8; 32],
    total: u8,
    shards: Vec<WrappedShard>,
}

impl WrappedKey {
    /// Requirements of every shard, in index order.
    pub fn requirements(&self) -> Vec<ShardRequirement> {
        self.shards.iter().map(|s| s.requirement.clone()).collect()
    }
}

/// Issues key bundles and seals/opens content keys.
pub struct KeyShardVault {
    cipher: Arc<dyn AeadCipher>,
    mixing: KeyMixing,
    bundles: Mutex<HashMap<String, Arc<SecurityKeyBundle>>>,
}

impl fmt::Debug for KeyShardVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyShardVault")
            .field("mixing", &self.mixing)
            .finish_non_exhaustive()
    }
}

impl Default for KeyShardVault {
    fn default() -> Self {
        Self::new(Arc::new(AesGcmCipher), KeyMixing::default())
    }
}

impl KeyShardVault {
    /// Create a vault over the given AEAD primitive.
    pub fn new(cipher: Arc<dyn AeadCipher>, mixing: KeyMixing) -> Self {
        Self {
            cipher,
            mixing,
            bundles: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a fresh bundle for `identity`, replacing any previous one.
    ///
    /// Ciphertext bound to the previous bundle becomes permanently unreadable.
    pub fn issue(&self, identity: &str) -> Result<Arc<SecurityKeyBundle>, ValidationError> {
        if identity.trim().is_empty() {
            return Err(ValidationError::Malformed("empty identity".to_owned()));
        }
        let mut bundles = self
            .bundles
            .lock()
            .map_err(|_| ValidationError::Malformed("vault unavailable".to_owned()))?;
        let generation = bundles
            .get(identity)
            .map_or(1, |b| b.generation.saturating_add(1));
        let bundle = Arc::new(SecurityKeyBundle::generate(identity, generation));
        bundles.insert(identity.to_owned(), Arc::clone(&bundle));
        info!(
            identity,
            alias = %bundle.alias,
            generation,
            "issued key bundle"
        );
        Ok(bundle)
    }

    /// The current bundle for `identity`.
    pub fn bundle(&self, identity: &str) -> Option<Arc<SecurityKeyBundle>> {
        self.bundles.lock().ok()?.get(identity).cloned()
    }

    /// Encrypt `plaintext` under `key` with a fresh nonce.
    pub fn encrypt(&self, plaintext: &[u8], key: &SymmetricKey) -> Result<SealedBox, CryptoError> {
        self.cipher.encrypt(plaintext, key)
    }

    /// Decrypt `sealed`. A missing key fails like a bad tag does.
    pub fn decrypt(
        &self,
        sealed: &SealedBox,
        key: Option<&SymmetricKey>,
    ) -> Result<Vec<u8>, CryptoError> {
        let key = key.ok_or_else(|| CryptoError::MissingKey("content key".to_owned()))?;
        self.cipher.decrypt(sealed, key)
    }

    /// Split `key` over `requirements` and seal each shard under the
    /// matching key of `identity`'s bundle.
    pub fn wrap_content_key(
        &self,
        identity: &str,
        key: &SymmetricKey,
        requirements: &[ShardRequirement],
    ) -> Result<WrappedKey, CryptoError> {
        let bundle = self
            .bundle(identity)
            .ok_or_else(|| CryptoError::MissingKey(identity.to_owned()))?;
        let set = shard::shard(key, requirements)?;
        let total = u8::try_from(set.shards.len()).map_err(|_| CryptoError::TooManyShards)?;
        let shards = set
            .shards
            .iter()
            .map(|s| {
                let wrapping = bundle.wrapping_key(&s.requirement, self.mixing)?;
                Ok(WrappedShard {
                    index: s.index,
                    requirement: s.requirement.clone(),
                    sealed: self.cipher.encrypt(s.payload(), &wrapping)?,
                })
            })
            .collect::<Result<Vec<_>, CryptoError>>()?;
        Ok(WrappedKey {
            set_id: set.set_id,
            bundle_generation: bundle.generation,
            fingerprint: set.fingerprint,
            total,
            shards,
        })
    }

    /// Rebuild a content key sealed by [`Self::wrap_content_key`].
    ///
    /// Every requirement is checked before any shard is opened; one unmet
    /// requirement or one unopenable shard fails the whole operation.
    pub fn unwrap_content_key(
        &self,
        identity: &str,
        wrapped: &WrappedKey,
        is_satisfied: impl Fn(&ShardRequirement) -> bool,
    ) -> Result<SymmetricKey, CryptoError> {
        if let Some(unmet) = wrapped
            .shards
            .iter()
            .find(|s| !is_satisfied(&s.requirement))
        {
            return Err(CryptoError::RequirementUnmet(unmet.requirement.clone()));
        }
        let bundle = self
            .bundle(identity)
            .ok_or_else(|| CryptoError::MissingKey(identity.to_owned()))?;
        let shards = wrapped
            .shards
            .iter()
            .map(|w| {
                let wrapping = bundle.wrapping_key(&w.requirement, self.mixing)?;
                let payload = self.cipher.decrypt(&w.sealed, &wrapping)?;
                Ok(KeyShard::new(
                    wrapped.set_id,
                    w.index,
                    wrapped.total,
                    w.requirement.clone(),
                    payload,
                ))
            })
            .collect::<Result<Vec<_>, CryptoError>>()?;
        reassemble(&shards, &wrapped.fingerprint, is_satisfied)
    }
}
