//! JWT utility module.
//!
//! Every browser that opens the send page gets an anonymous visitor token.
//! Its subject identifies the uploader so only they can revoke their shares.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use once_cell::sync::Lazy;
use rand::distributions::{Alphanumeric, DistString};
use serde::{Deserialize, Serialize};

use crate::config::{get_env, get_env_parsed, is_production_env};
use crate::error::AppResult;

/// Minimum recommended length for JWT secrets.
const MIN_SECRET_LENGTH: usize = 32;

/// Length of generated visitor subjects.
pub const VISITOR_ID_LEN: usize = 16;

static JWT_SECRET: Lazy<String> = Lazy::new(|| {
    let secret = get_env("JWT_SECRET", None);

    if secret.is_empty() {
        assert!(
            !is_production_env(),
            "JWT_SECRET must be set in production environment"
        );
        tracing::warn!(
            "⚠️  JWT_SECRET not set - using insecure default. \
             Set RUST_ENV=production to enforce security requirements."
        );
        "default-secret-change-me-in-production".to_string()
    } else {
        if secret.len() < MIN_SECRET_LENGTH {
            tracing::warn!(
                "⚠️  JWT_SECRET is shorter than {} characters. \
                 Consider using a longer secret for better security.",
                MIN_SECRET_LENGTH
            );
        }
        secret
    }
});

static JWT_EXPIRATION_HOURS: Lazy<i64> = Lazy::new(|| get_env_parsed("JWT_EXPIRATION_HOURS", 24));

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (visitor identifier)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
}

/// Outcome of resolving the visitor behind a request.
#[derive(Debug, Clone)]
pub struct VisitorSession {
    pub subject: String,
    /// Set when the presented token was missing or invalid and a new one was minted
    pub new_token: Option<String>,
}

/// Generates a fresh anonymous visitor id.
#[must_use]
pub fn gen_visitor_id() -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), VISITOR_ID_LEN)
}

/// Generates a JWT token for the given subject.
#[must_use = "the generated token should be used"]
pub fn gen_token(subject: &str) -> AppResult<String> {
    let now = chrono::Utc::now().timestamp();
    let exp = now + (*JWT_EXPIRATION_HOURS * 3600);

    let claims = Claims {
        sub: subject.to_string(),
        exp,
        iat: now,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )?;

    Ok(token)
}

/// Parses and validates a JWT token.
#[must_use = "the parsed claims should be used"]
pub fn parse_token(token: &str) -> AppResult<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(JWT_SECRET.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

/// Keeps the visitor id from a still-valid token, or mints a new identity.
pub fn resolve_visitor(existing_token: Option<&str>) -> AppResult<VisitorSession> {
    if let Some(claims) = existing_token.and_then(|t| parse_token(t).ok()) {
        return Ok(VisitorSession {
            subject: claims.sub,
            new_token: None,
        });
    }

    let subject = gen_visitor_id();
    let token = gen_token(&subject)?;
    Ok(VisitorSession {
        subject,
        new_token: Some(token),
    })
}
