//! Symmetric key material and key mixing.

use std::fmt;

use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::CryptoError;

/// Length in bytes of every generated key.
pub const KEY_LEN: usize = 32;

const HKDF_INFO: &[u8] = b"quietkey-mix-v1";

/// Raw symmetric key bytes. Zeroed on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey(Vec<u8>);

impl SymmetricKey {
    /// Generate a fresh random key from the OS entropy source.
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap existing key bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Key length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the key holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// SHA-256 of the key under a caller-chosen domain label.
    pub fn fingerprint(&self, domain: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        hasher.update(&self.0);
        hasher.finalize().into()
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("__REDACTED__")
    }
}

/// How two keys are mixed into one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMixing {
    /// HKDF-SHA256 with the second key as salt.
    #[default]
    Hkdf,
    /// Byte-wise XOR. Weak; kept for material produced by older deployments.
    Xor,
}

/// Byte-wise XOR across the longer key's length, wrapping the shorter key.
///
/// This is a mixing step, not a key derivation function: equal inputs
/// cancel to zero and structure in either input leaks into the output.
pub fn combine(a: &SymmetricKey, b: &SymmetricKey) -> Result<SymmetricKey, CryptoError> {
    if a.is_empty() || b.is_empty() {
        return Err(CryptoError::EmptyKey);
    }
    let (longer, shorter) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    let bytes = longer
        .as_bytes()
        .iter()
        .zip(shorter.as_bytes().iter().cycle())
        .map(|(x, y)| x ^ y)
        .collect();
    Ok(SymmetricKey(bytes))
}

/// Derive a [`KEY_LEN`]-byte key from `ikm` salted with `salt` via HKDF-SHA256.
pub fn derive_combined(ikm: &SymmetricKey, salt: &SymmetricKey) -> Result<SymmetricKey, CryptoError> {
    if ikm.is_empty() || salt.is_empty() {
        return Err(CryptoError::EmptyKey);
    }
    let hk = Hkdf::<Sha256>::new(Some(salt.as_bytes()), ikm.as_bytes());
    let mut okm = vec![0u8; KEY_LEN];
    hk.expand(HKDF_INFO, &mut okm)
        .map_err(|_| CryptoError::Derivation)?;
    Ok(SymmetricKey(okm))
}

/// Mix two keys with the configured strategy.
pub fn mix(mode: KeyMixing, a: &SymmetricKey, b: &SymmetricKey) -> Result<SymmetricKey, CryptoError> {
    match mode {
        KeyMixing::Hkdf => derive_combined(a, b),
        KeyMixing::Xor => combine(a, b),
    }
}
