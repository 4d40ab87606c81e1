//! Encryption at rest for shared files.
//!
//! Each share gets a random salt. The file key is derived from the share code
//! and that salt with PBKDF2-HMAC-SHA256, and every file is sealed separately
//! with AES-256-GCM under a fresh nonce.
//!
//! Sealed blob layout:
//!
//! ```text
//! [version: 1 byte][nonce: 12 bytes][ciphertext || tag: 16 bytes]
//! ```

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use rand::RngCore;
use sha2::Sha256;

use crate::error::{AppError, AppResult};

/// Blob format version written by `seal`.
pub const BLOB_VERSION: u8 = 1;

/// Length of the per-share salt.
pub const SALT_LEN: usize = 16;

/// Length of the derived AES-256 key.
pub const KEY_LEN: usize = 32;

/// AES-GCM nonce length.
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length.
pub const TAG_LEN: usize = 16;

/// Smallest valid blob: header, nonce and tag around an empty plaintext.
pub const MIN_BLOB_LEN: usize = 1 + NONCE_LEN + TAG_LEN;

/// Derives the file key for a share.
#[must_use]
pub fn derive_key(code: &str, salt: &[u8], iterations: u32) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(code.as_bytes(), salt, iterations, &mut key);
    key
}

/// Generates a random per-share salt.
#[must_use]
pub fn gen_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Encrypts `plaintext` into a versioned blob.
pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> AppResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| AppError::Crypto("encryption failed".to_string()))?;

    let mut blob = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
    blob.push(BLOB_VERSION);
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypts a blob produced by `seal`.
///
/// Fails on truncated input, an unknown version byte, or an authentication
/// failure (wrong key or tampered bytes).
pub fn open(key: &[u8; KEY_LEN], blob: &[u8]) -> AppResult<Vec<u8>> {
    if blob.len() < MIN_BLOB_LEN {
        return Err(AppError::Crypto(format!(
            "sealed blob too short: {} bytes",
            blob.len()
        )));
    }

    let (version, rest) = blob.split_at(1);
    if version[0] != BLOB_VERSION {
        return Err(AppError::Crypto(format!(
            "unsupported blob version {}",
            version[0]
        )));
    }

    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| AppError::Crypto("authentication failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Low iteration count keeps the tests fast; production uses KDF_ITERATIONS
    const TEST_ITERATIONS: u32 = 1_000;

    fn test_key() -> [u8; KEY_LEN] {
        derive_key("123456", b"0123456789abcdef", TEST_ITERATIONS)
    }

    #[test]
    fn test_derive_key_deterministic() {
        let salt = gen_salt();
        assert_eq!(
            derive_key("123456", &salt, TEST_ITERATIONS),
            derive_key("123456", &salt, TEST_ITERATIONS)
        );
    }

    #[test]
    fn test_derive_key_depends_on_every_input() {
        let salt = b"0123456789abcdef";
        let base = derive_key("123456", salt, TEST_ITERATIONS);
        assert_ne!(base, derive_key("123457", salt, TEST_ITERATIONS));
        assert_ne!(base, derive_key("123456", b"fedcba9876543210", TEST_ITERATIONS));
        assert_ne!(base, derive_key("123456", salt, TEST_ITERATIONS + 1));
    }

    #[test]
    fn test_derive_key_known_vector() {
        // Published PBKDF2-HMAC-SHA256 vector: P="password", S="salt", c=1, dkLen=32
        let key = derive_key("password", b"salt", 1);
        assert_eq!(
            hex::encode(key),
            "120fb6cffcf8b32c43e7225256c4f837a86548c92ccc35480805987cb70be17b"
        );
    }

    #[test]
    fn test_gen_salt_unique() {
        assert_ne!(gen_salt(), gen_salt());
    }

    #[test]
    fn test_seal_open() {
        let key = test_key();
        let plaintext = b"quarterly-report.pdf contents";

        let blob = seal(&key, plaintext).unwrap();
        assert_eq!(blob[0], BLOB_VERSION);
        assert_eq!(blob.len(), MIN_BLOB_LEN + plaintext.len());
        assert_eq!(open(&key, &blob).unwrap(), plaintext);
    }

    #[test]
    fn test_seal_empty_plaintext() {
        let key = test_key();
        let blob = seal(&key, b"").unwrap();
        assert_eq!(blob.len(), MIN_BLOB_LEN);
        assert!(open(&key, &blob).unwrap().is_empty());
    }

    #[test]
    fn test_seal_uses_fresh_nonce() {
        let key = test_key();
        let a = seal(&key, b"same bytes").unwrap();
        let b = seal(&key, b"same bytes").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_open_wrong_key_fails() {
        let blob = seal(&test_key(), b"secret").unwrap();
        let other = derive_key("999999", b"0123456789abcdef", TEST_ITERATIONS);
        assert!(matches!(open(&other, &blob), Err(AppError::Crypto(_))));
    }

    #[test]
    fn test_open_tampered_fails() {
        let key = test_key();
        let mut blob = seal(&key, b"secret").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(matches!(open(&key, &blob), Err(AppError::Crypto(_))));
    }

    #[test]
    fn test_open_truncated_fails() {
        let key = test_key();
        let blob = seal(&key, b"secret").unwrap();
        assert!(open(&key, &blob[..MIN_BLOB_LEN - 1]).is_err());
        assert!(open(&key, &[]).is_err());
    }

    #[test]
    fn test_open_unknown_version_fails() {
        let key = test_key();
        let mut blob = seal(&key, b"secret").unwrap();
        blob[0] = 2;
        match open(&key, &blob) {
            Err(AppError::Crypto(msg)) => assert!(msg.contains("version")),
            other => panic!("expected version error, got {other:?}"),
        }
    }
}
