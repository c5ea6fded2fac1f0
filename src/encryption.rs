//! Column-encryption strategies consulted by code-driven migrations.
//!
//! Encrypted values are stored as two text columns: the payload and an
//! optional nonce. A missing nonce means the payload is plaintext, which is
//! how [`NoEncryption`] round-trips data.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use thiserror::Error;

pub const NONCE_SIZE: usize = 24;

pub type SymmetricKey = [u8; 32];

#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed")]
    DecryptFailed,

    #[error("payload carries a nonce but no key is configured")]
    Unencrypted,

    #[error("plaintext is not valid UTF-8")]
    NotText,

    #[error("Hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),
}

pub trait EncryptionStrategy {
    /// Returns the stored payload and, when actually encrypted, the nonce.
    fn encrypt(&self, plaintext: &[u8]) -> Result<(String, Option<String>), EncryptionError>;

    fn decrypt(&self, payload: &str, nonce: Option<&str>) -> Result<Vec<u8>, EncryptionError>;
}

/// Pass-through strategy; stores plaintext with no nonce.
pub struct NoEncryption;

impl EncryptionStrategy for NoEncryption {
    fn encrypt(&self, plaintext: &[u8]) -> Result<(String, Option<String>), EncryptionError> {
        let text = String::from_utf8(plaintext.to_vec()).map_err(|_| EncryptionError::NotText)?;
        Ok((text, None))
    }

    fn decrypt(&self, payload: &str, nonce: Option<&str>) -> Result<Vec<u8>, EncryptionError> {
        if nonce.is_some() {
            return Err(EncryptionError::Unencrypted);
        }
        Ok(payload.as_bytes().to_vec())
    }
}

/// XChaCha20-Poly1305 with hex-encoded ciphertext and a fresh random nonce
/// per value.
pub struct AeadEncryption {
    cipher: XChaCha20Poly1305,
}

impl AeadEncryption {
    pub fn new(key: &SymmetricKey) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(key.into()),
        }
    }
}

impl EncryptionStrategy for AeadEncryption {
    fn encrypt(&self, plaintext: &[u8]) -> Result<(String, Option<String>), EncryptionError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| EncryptionError::EncryptFailed)?;

        Ok((hex::encode(ciphertext), Some(hex::encode(nonce_bytes))))
    }

    fn decrypt(&self, payload: &str, nonce: Option<&str>) -> Result<Vec<u8>, EncryptionError> {
        // A payload without a nonce predates encryption; hand it back as-is.
        let Some(nonce) = nonce else {
            return Ok(payload.as_bytes().to_vec());
        };

        let nonce_bytes = hex::decode(nonce)?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(EncryptionError::DecryptFailed);
        }

        let ciphertext = hex::decode(payload)?;
        self.cipher
            .decrypt(XNonce::from_slice(&nonce_bytes), ciphertext.as_slice())
            .map_err(|_| EncryptionError::DecryptFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SymmetricKey {
        let mut key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut key);
        key
    }

    #[test]
    fn aead_round_trip() {
        let strategy = AeadEncryption::new(&key());
        let (payload, nonce) = strategy.encrypt(b"{\"basic\":{}}").unwrap();
        assert!(nonce.is_some());

        let plaintext = strategy.decrypt(&payload, nonce.as_deref()).unwrap();
        assert_eq!(plaintext, b"{\"basic\":{}}");
    }

    #[test]
    fn aead_wrong_key_fails() {
        let (payload, nonce) = AeadEncryption::new(&key()).encrypt(b"secret").unwrap();
        let other = AeadEncryption::new(&key());
        assert!(other.decrypt(&payload, nonce.as_deref()).is_err());
    }

    #[test]
    fn aead_passes_through_legacy_plaintext() {
        let strategy = AeadEncryption::new(&key());
        assert_eq!(strategy.decrypt("{}", None).unwrap(), b"{}");
    }

    #[test]
    fn no_encryption_round_trip() {
        let (payload, nonce) = NoEncryption.encrypt(b"{}").unwrap();
        assert_eq!(payload, "{}");
        assert!(nonce.is_none());
        assert_eq!(NoEncryption.decrypt(&payload, None).unwrap(), b"{}");
    }

    #[test]
    fn no_encryption_rejects_nonced_payloads() {
        assert!(NoEncryption.decrypt("abcd", Some("ff")).is_err());
    }
}
