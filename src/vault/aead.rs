//! Authenticated encryption seam.
//!
//! The engine only needs `encrypt -> (ciphertext, nonce)` and a `decrypt`
//! that fails closed. [`AesGcmCipher`] is the default primitive; hosts may
//! supply their own through [`AeadCipher`].

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use zeroize::Zeroize;

use super::keys::{SymmetricKey, KEY_LEN};
use super::CryptoError;

/// Nonce length for AES-256-GCM.
pub const NONCE_LEN: usize = 12;

/// Ciphertext plus the nonce it was sealed under.
#[derive(Clone, Zeroize)]
pub struct SealedBox {
    /// Ciphertext including the authentication tag.
    pub ciphertext: Vec<u8>,
    /// Random per-call nonce.
    pub nonce: [u8; NONCE_LEN],
}

impl std::fmt::Debug for SealedBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedBox")
            .field("ciphertext_len", &self.ciphertext.len())
            .finish_non_exhaustive()
    }
}

/// An AEAD primitive supplied by the crypto collaborator.
pub trait AeadCipher: Send + Sync {
    /// Encrypt under a fresh random nonce.
    fn encrypt(&self, plaintext: &[u8], key: &SymmetricKey) -> Result<SealedBox, CryptoError>;

    /// Decrypt and authenticate. Never returns partial plaintext.
    fn decrypt(&self, sealed: &SealedBox, key: &SymmetricKey) -> Result<Vec<u8>, CryptoError>;
}

/// AES-256-GCM with OS-random nonces.
#[derive(Debug, Clone, Copy, Default)]
pub struct AesGcmCipher;

impl AesGcmCipher {
    fn cipher(key: &SymmetricKey) -> Result<Aes256Gcm, CryptoError> {
        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_LEN,
            got: key.len(),
        })
    }
}

impl AeadCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &[u8], key: &SymmetricKey) -> Result<SealedBox, CryptoError> {
        let cipher = Self::cipher(key)?;
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::Encrypt)?;
        Ok(SealedBox { ciphertext, nonce })
    }

    fn decrypt(&self, sealed: &SealedBox, key: &SymmetricKey) -> Result<Vec<u8>, CryptoError> {
        let cipher = Self::cipher(key)?;
        cipher
            .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_slice())
            .map_err(|_| CryptoError::Decrypt)
    }
}
