//! Token encryption using AES-256-GCM.
//!
//! Access and refresh tokens are stored as versioned ciphertexts
//! (`0x01 || nonce || ciphertext+tag`) with additional authenticated data
//! bound to the owning website, so a ciphertext copied between rows fails
//! authentication on decrypt.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

const VERSION_ENCRYPTED: u8 = 0x01;
const VERSION_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_ENCRYPTED_LEN: usize = VERSION_FIELD_LEN + NONCE_LEN + TAG_LEN;

/// Crypto error types
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("empty ciphertext")]
    EmptyCiphertext,
}

/// Secure wrapper for the encryption key with zeroization on drop
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct CryptoKey(Vec<u8>);

impl CryptoKey {
    /// Create a new crypto key from bytes
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        Ok(CryptoKey(bytes))
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// AAD binding a token ciphertext to its owning website row.
fn token_aad(website_id: &str) -> Vec<u8> {
    format!("connection|{}", website_id).into_bytes()
}

/// Encrypt a token for the given website
pub fn encrypt_token(
    key: &CryptoKey,
    website_id: &str,
    token: &str,
) -> Result<Vec<u8>, CryptoError> {
    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: token.as_bytes(),
                aad: &token_aad(website_id),
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut result = Vec::with_capacity(VERSION_FIELD_LEN + NONCE_LEN + ciphertext.len());
    result.push(VERSION_ENCRYPTED);
    result.extend_from_slice(&nonce);
    result.append(&mut ciphertext);

    Ok(result)
}

/// Decrypt a token stored for the given website.
///
/// Payloads without the version marker are treated as legacy plaintext and
/// returned as-is.
pub fn decrypt_token(
    key: &CryptoKey,
    website_id: &str,
    ciphertext: &[u8],
) -> Result<String, CryptoError> {
    if ciphertext.is_empty() {
        return Err(CryptoError::EmptyCiphertext);
    }

    if ciphertext[0] != VERSION_ENCRYPTED {
        return String::from_utf8(ciphertext.to_vec())
            .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid UTF-8: {}", e)));
    }

    if ciphertext.len() < MIN_ENCRYPTED_LEN {
        return Err(CryptoError::InvalidFormat);
    }

    let nonce = Nonce::from_slice(&ciphertext[VERSION_FIELD_LEN..VERSION_FIELD_LEN + NONCE_LEN]);
    let payload = &ciphertext[VERSION_FIELD_LEN + NONCE_LEN..];

    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    let plaintext = cipher
        .decrypt(
            nonce,
            Payload {
                msg: payload,
                aad: &token_aad(website_id),
            },
        )
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;

    String::from_utf8(plaintext)
        .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid UTF-8: {}", e)))
}

/// Determine if a payload is using the encrypted format
pub fn is_encrypted_payload(ciphertext: &[u8]) -> bool {
    ciphertext.len() >= MIN_ENCRYPTED_LEN && ciphertext[0] == VERSION_ENCRYPTED
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> CryptoKey {
        CryptoKey::new(vec![7u8; 32]).expect("valid test key")
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = test_key();

        let encrypted = encrypt_token(&key, "site-1", "ya29.secret").expect("encrypt");
        assert!(is_encrypted_payload(&encrypted));

        let decrypted = decrypt_token(&key, "site-1", &encrypted).expect("decrypt");
        assert_eq!(decrypted, "ya29.secret");
    }

    #[test]
    fn foreign_website_aad_fails() {
        let key = test_key();

        let encrypted = encrypt_token(&key, "site-1", "ya29.secret").expect("encrypt");
        let result = decrypt_token(&key, "site-2", &encrypted);

        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn modified_ciphertext_fails() {
        let key = test_key();

        let mut encrypted = encrypt_token(&key, "site-1", "ya29.secret").expect("encrypt");
        encrypted[13] ^= 0x01;

        assert!(decrypt_token(&key, "site-1", &encrypted).is_err());
    }

    #[test]
    fn nonces_are_unique_per_encryption() {
        let key = test_key();

        let first = encrypt_token(&key, "site-1", "token").expect("encrypt");
        let second = encrypt_token(&key, "site-1", "token").expect("encrypt");

        assert_ne!(&first[1..13], &second[1..13]);
    }

    #[test]
    fn legacy_plaintext_passthrough() {
        let key = test_key();

        let decrypted =
            decrypt_token(&key, "site-1", b"legacy-plaintext-token").expect("passthrough");
        assert_eq!(decrypted, "legacy-plaintext-token");
        assert!(!is_encrypted_payload(b"legacy-plaintext-token"));
    }

    #[test]
    fn truncated_versioned_payload_rejected() {
        let key = test_key();

        let short = vec![VERSION_ENCRYPTED, 0x02, 0x03];
        assert!(matches!(
            decrypt_token(&key, "site-1", &short),
            Err(CryptoError::InvalidFormat)
        ));
    }

    #[test]
    fn empty_ciphertext_rejected() {
        let key = test_key();
        assert!(matches!(
            decrypt_token(&key, "site-1", &[]),
            Err(CryptoError::EmptyCiphertext)
        ));
    }

    #[test]
    fn key_length_enforced() {
        assert!(CryptoKey::new(vec![0u8; 16]).is_err());
        assert!(CryptoKey::new(vec![0u8; 33]).is_err());
        assert!(CryptoKey::new(vec![0u8; 32]).is_ok());
    }
}
