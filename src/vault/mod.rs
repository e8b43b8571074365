//! Credential vault: symmetric encryption of provider API keys at rest.
//!
//! [`CredentialVault`] turns a configured secret into a 256-bit key
//! (SHA-256 of the secret) and seals each API key with AES-256-GCM.
//!
//! # Stored form
//!
//! ```text
//! base64( nonce[12] ‖ ciphertext ‖ tag[16] )
//! ```
//!
//! A fresh random nonce is drawn for every call to
//! [`encrypt`](CredentialVault::encrypt), so encrypting the same key twice
//! yields two different strings that both decrypt to the original.
//!
//! The vault holds no mutable state after construction; share it behind an
//! `Arc` and call it from any task.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// AES-GCM nonce length in bytes (96 bits).
const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes.
const TAG_LEN: usize = 16;

// ---------------------------------------------------------------------------
// VaultError
// ---------------------------------------------------------------------------

/// Errors raised by the credential vault.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VaultError {
    /// The environment variable holding the vault secret is unset or empty.
    #[error("encryption secret not configured (set {0})")]
    MissingSecret(String),

    /// Sealing failed.  Only reachable on allocator failure inside the AEAD.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// The stored ciphertext is malformed or was sealed with another secret.
    #[error("decryption failed: {0}")]
    Decryption(String),
}

// ---------------------------------------------------------------------------
// CredentialVault
// ---------------------------------------------------------------------------

/// Encrypts and decrypts provider API keys with a process-wide key.
///
/// # Example
/// ```rust
/// use reflex_coach::vault::CredentialVault;
///
/// let vault = CredentialVault::new("correct horse battery staple");
/// let sealed = vault.encrypt("sk-live-123").unwrap();
/// assert_ne!(sealed, "sk-live-123");
/// assert_eq!(vault.decrypt(&sealed).unwrap(), "sk-live-123");
/// ```
pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault").finish_non_exhaustive()
    }
}

impl CredentialVault {
    /// Derive the vault key from `secret`.
    ///
    /// The same secret always yields the same key, so ciphertexts written by
    /// one process can be read by any other process configured identically.
    pub fn new(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(digest.as_slice());
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Build a vault from the secret stored in environment variable `var`.
    ///
    /// # Errors
    /// [`VaultError::MissingSecret`] when the variable is unset or blank.
    pub fn from_env(var: &str) -> Result<Self, VaultError> {
        match std::env::var(var) {
            Ok(secret) if !secret.trim().is_empty() => Ok(Self::new(&secret)),
            _ => Err(VaultError::MissingSecret(var.to_string())),
        }
    }

    /// Seal `plaintext` and return the base64 text form.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| VaultError::Encryption(e.to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + sealed.len());
        blob.extend_from_slice(nonce.as_slice());
        blob.extend_from_slice(&sealed);
        Ok(STANDARD.encode(blob))
    }

    /// Open a value previously produced by [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    /// [`VaultError::Decryption`] when the input is not valid base64, is too
    /// short to hold a nonce and tag, fails authentication (wrong secret or
    /// tampering), or does not decode to UTF-8.
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, VaultError> {
        let blob = STANDARD
            .decode(ciphertext.trim())
            .map_err(|e| VaultError::Decryption(format!("invalid base64: {e}")))?;

        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(VaultError::Decryption(format!(
                "ciphertext too short ({} bytes)",
                blob.len()
            )));
        }

        let (nonce, sealed) = blob.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| VaultError::Decryption("authentication failed".into()))?;

        String::from_utf8(plain)
            .map_err(|_| VaultError::Decryption("plaintext is not UTF-8".into()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
