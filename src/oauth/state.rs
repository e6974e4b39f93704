//! OAuth correlation state tokens.
//!
//! The authorization redirect and its callback are correlated by a short-lived
//! HS256 token carrying the website ID. Validity is proven purely by signature
//! and expiry; no server-side state is kept for pending authorizations.

use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
    errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from issuing or verifying a correlation token
#[derive(Debug, Error)]
pub enum StateTokenError {
    #[error("failed to sign state token: {0}")]
    Signing(String),
    #[error("state token expired")]
    Expired,
    #[error("state token invalid: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct CorrelationClaims {
    website_id: String,
    iat: i64,
    exp: i64,
}

/// Issue a correlation token binding an authorization flow to a website
pub fn issue_correlation_token(
    secret: &str,
    website_id: &str,
    ttl_seconds: u64,
) -> Result<String, StateTokenError> {
    let now = Utc::now().timestamp();
    let claims = CorrelationClaims {
        website_id: website_id.to_owned(),
        iat: now,
        exp: now + ttl_seconds as i64,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| StateTokenError::Signing(e.to_string()))
}

/// Verify a correlation token, returning the website ID it was issued for
pub fn verify_correlation_token(secret: &str, token: &str) -> Result<String, StateTokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    let data = decode::<CorrelationClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => StateTokenError::Expired,
        _ => StateTokenError::Invalid(e.to_string()),
    })?;

    Ok(data.claims.website_id)
}
