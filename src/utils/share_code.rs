//! 공유 코드 생성/검증 모듈.
//!
//! Share codes are six decimal digits. The plaintext code is only ever shown
//! to the sender; storage and cache keys use a peppered HMAC of it.

use hmac::{Hmac, Mac};
use once_cell::sync::Lazy;
use rand::Rng;
use sha2::Sha256;

use crate::config::{get_env, is_production_env};
use crate::error::{AppError, AppResult};

/// Number of digits in a share code.
pub const SHARE_CODE_LEN: usize = 6;

/// How many fresh codes to try before giving up on a collision streak.
pub const CODE_GENERATION_ATTEMPTS: usize = 8;

/// Minimum recommended length for the code pepper.
const MIN_PEPPER_LENGTH: usize = 32;

static SHARE_CODE_PEPPER: Lazy<String> = Lazy::new(|| {
    let pepper = get_env("SHARE_CODE_PEPPER", None);

    if pepper.is_empty() {
        assert!(
            !is_production_env(),
            "SHARE_CODE_PEPPER must be set in production environment"
        );
        tracing::warn!(
            "⚠️  SHARE_CODE_PEPPER not set - using insecure default. \
             Set RUST_ENV=production to enforce security requirements."
        );
        "default-pepper-change-me-in-production".to_string()
    } else {
        if pepper.len() < MIN_PEPPER_LENGTH {
            tracing::warn!(
                "⚠️  SHARE_CODE_PEPPER is shorter than {} characters.",
                MIN_PEPPER_LENGTH
            );
        }
        pepper
    }
});

/// Generates a share code of `SHARE_CODE_LEN` digits.
///
/// Each digit is drawn independently from the thread-local CSPRNG, so
/// leading zeros are as likely as any other digit.
#[must_use]
pub fn gen_share_code() -> String {
    let mut rng = rand::thread_rng();
    (0..SHARE_CODE_LEN)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Validates a share code.
///
/// # Validation Rules
///
/// - Exactly `SHARE_CODE_LEN` characters
/// - ASCII digits only
pub fn validate_share_code(code: &str) -> AppResult<()> {
    if code.len() != SHARE_CODE_LEN || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AppError::BadRequest(format!(
            "Share code must be exactly {SHARE_CODE_LEN} digits"
        )));
    }
    Ok(())
}

/// Hashes a share code with the given pepper (lowercase hex HMAC-SHA256).
#[must_use]
pub fn hash_share_code_with(code: &str, pepper: &[u8]) -> String {
    // HMAC accepts keys of any length, so this cannot fail
    let mut mac = Hmac::<Sha256>::new_from_slice(pepper)
        .unwrap_or_else(|_| unreachable!("HMAC key length is unrestricted"));
    mac.update(code.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Hashes a share code with the configured `SHARE_CODE_PEPPER`.
#[must_use]
pub fn hash_share_code(code: &str) -> String {
    hash_share_code_with(code, SHARE_CODE_PEPPER.as_bytes())
}
