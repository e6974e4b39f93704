//! # Service-Identity Verification
//!
//! Validates that a caller is an authorized internal service before any
//! `/api/*` handler runs. Two credential forms are accepted: a pre-shared key
//! in the `X-Service-Key` header (compared in constant time) or an HS256
//! bearer token signed with the same shared secret. With no secret configured
//! the middleware fails closed and rejects everything.
//!
//! Verification carries no tenant scoping: any valid service credential may
//! act on any website. That trust boundary is deliberate.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use subtle::ConstantTimeEq;

use crate::config::AppConfig;
use crate::error::{ApiError, ErrorCode, unauthorized, unauthorized_with_trace_id};
use crate::server::AppState;
use crate::telemetry::TraceContext;

/// Header carrying the raw pre-shared key
pub const SERVICE_KEY_HEADER: &str = "X-Service-Key";

/// Marker type for requests that passed service-identity verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceIdentity;

/// Claims accepted on a signed service token. Expiry is mandatory; a token
/// without `exp` never validates.
#[derive(Debug, Deserialize)]
struct ServiceClaims {
    #[serde(default)]
    #[allow(dead_code)]
    sub: Option<String>,
    #[allow(dead_code)]
    exp: i64,
}

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.config)
    }
}

/// Middleware enforcing service-identity verification
pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let trace_id = request
        .extensions()
        .get::<TraceContext>()
        .map(|ctx| ctx.trace_id.clone());

    verify_service_credential(&config, request.headers(), trace_id)?;

    let mut request = request;
    request.extensions_mut().insert(ServiceIdentity);

    Ok(next.run(request).await)
}

fn verify_service_credential(
    config: &AppConfig,
    headers: &HeaderMap,
    trace_id: Option<String>,
) -> Result<(), ApiError> {
    // Fail closed: an unset secret must never mean open access.
    let secret = match config.service_shared_secret.as_deref() {
        Some(secret) if !secret.is_empty() => secret,
        _ => {
            tracing::error!("Rejecting request: service shared secret is not configured");
            return Err(ErrorCode::InternalServerError
                .with_message("Service authentication is not configured"));
        }
    };

    if let Some(presented) = headers.get(SERVICE_KEY_HEADER) {
        let presented = presented.as_bytes();
        if bool::from(ConstantTimeEq::ct_eq(presented, secret.as_bytes())) {
            return Ok(());
        }
        return Err(reject(Some("Invalid service key"), trace_id));
    }

    if let Some(token) = extract_bearer_token(headers) {
        return verify_service_token(secret, token, trace_id);
    }

    Err(reject(
        Some("Missing service credential: provide X-Service-Key or a bearer token"),
        trace_id,
    ))
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
}

fn verify_service_token(
    secret: &str,
    token: &str,
    trace_id: Option<String>,
) -> Result<(), ApiError> {
    let validation = Validation::new(Algorithm::HS256);

    match decode::<ServiceClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    ) {
        Ok(_) => Ok(()),
        Err(e) => {
            tracing::debug!(error = %e, "Service token rejected");
            Err(reject(Some("Invalid or expired service token"), trace_id))
        }
    }
}

fn reject(message: Option<&str>, trace_id: Option<String>) -> ApiError {
    match trace_id {
        Some(trace_id) => unauthorized_with_trace_id(message, trace_id),
        None => unauthorized(message),
    }
}

impl<S> FromRequestParts<S> for ServiceIdentity
where
    Arc<AppConfig>: FromRef<S>,
    S: Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ServiceIdentity>()
            .copied()
            .ok_or_else(|| unauthorized(Some("Service authentication required")))
    }
}
