//! Credential secret encryption via AES-256-GCM. If the configured key
//! equals the insecure-lab sentinel and the environment is not `lab`,
//! startup aborts rather than run with a known key.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use thiserror::Error;

use crate::config::{INSECURE_LAB_KEY, Settings};
use crate::domain::device::Environment;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption key is the insecure lab sentinel outside a lab environment")]
    InsecureKeyOutsideLab,
    #[error("encryption key must decode to exactly 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("failed to decrypt credential secret")]
    DecryptionFailed,
    #[error("ciphertext too short to contain a nonce")]
    CiphertextTooShort,
}

const NONCE_LEN: usize = 12;

/// Process-wide symmetric credential cipher, loaded once at startup.
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    /// Validates the configured key against the insecure-lab-key rule
    /// before ever attempting to derive a cipher from it.
    pub fn from_settings(settings: &Settings) -> Result<Self, CryptoError> {
        if settings.encryption_key == INSECURE_LAB_KEY && settings.environment != Environment::Lab {
            return Err(CryptoError::InsecureKeyOutsideLab);
        }
        Self::from_key_material(&settings.encryption_key)
    }

    fn from_key_material(key_material: &str) -> Result<Self, CryptoError> {
        let derived = derive_32_bytes(key_material);
        let key = Key::<Aes256Gcm>::from_slice(&derived);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Encrypts `plaintext`, returning `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypts a blob produced by [`Self::encrypt`].
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if blob.len() < NONCE_LEN {
            return Err(CryptoError::CiphertextTooShort);
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = aes_gcm::Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

/// Stretches arbitrary key material (a base64 string or raw passphrase)
/// into exactly 32 bytes via SHA-256, so operators can hand us any secret
/// string without worrying about AES-256's fixed key length.
pub fn derive_32_bytes(key_material: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(key_material.as_bytes());
    hasher.finalize().into()
}

/// Base64-encodes a ciphertext blob for storage in a text column.
pub fn encode_ciphertext(blob: &[u8]) -> String {
    BASE64.encode(blob)
}

pub fn decode_ciphertext(encoded: &str) -> Result<Vec<u8>, CryptoError> {
    BASE64.decode(encoded).map_err(|_| CryptoError::DecryptionFailed)
}
