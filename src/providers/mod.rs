//! # Provider Clients
//!
//! Thin HTTP clients for the two fixed external analytics APIs, plus the
//! error boundary that turns Google's heterogeneous error payloads into a
//! tagged value before any other logic inspects it. Raw provider errors never
//! escape this module's normalization.

pub mod ga4;
pub mod search_console;

use serde::Deserialize;
use thiserror::Error;

use crate::error::{ApiError, ErrorCode};

pub use ga4::Ga4Client;
pub use search_console::SearchConsoleClient;

/// The two external analytics providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    SearchConsole,
    Ga4,
}

impl Provider {
    /// Label used in logs, metrics, and error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::SearchConsole => "search-console",
            Provider::Ga4 => "ga4",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured form of Google's error envelope
/// (`{"error": {"code", "message", "status", "errors": [{"reason"}]}}`).
///
/// Parsing is total: anything that does not match the envelope degrades to an
/// empty detail rather than failing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GoogleErrorDetail {
    pub code: Option<u16>,
    pub message: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub errors: Vec<GoogleErrorItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GoogleErrorItem {
    pub reason: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorEnvelope {
    error: GoogleErrorDetail,
}

impl GoogleErrorDetail {
    /// Parse an error response body; unknown shapes yield an empty detail
    pub fn from_body(body: &str) -> Self {
        serde_json::from_str::<GoogleErrorEnvelope>(body)
            .map(|envelope| envelope.error)
            .unwrap_or_default()
    }

    /// Google reports some quota exhaustion as 403 with a rate-limit reason
    /// rather than 429
    pub fn is_quota_error(&self) -> bool {
        const QUOTA_REASONS: &[&str] = &[
            "ratelimitexceeded",
            "userratelimitexceeded",
            "quotaexceeded",
            "dailylimitexceeded",
        ];

        if self
            .status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("RESOURCE_EXHAUSTED"))
        {
            return true;
        }

        self.errors.iter().any(|item| {
            item.reason
                .as_deref()
                .is_some_and(|reason| QUOTA_REASONS.contains(&reason.to_lowercase().as_str()))
        })
    }
}

/// Error from a single provider call, classified at the HTTP boundary
#[derive(Debug, Error)]
pub enum ProviderCallError {
    #[error("{provider} returned status {status}")]
    Http {
        provider: Provider,
        status: u16,
        detail: GoogleErrorDetail,
        retry_after: Option<u64>,
    },
    #[error("network error calling {provider}: {source}")]
    Network {
        provider: Provider,
        source: reqwest::Error,
    },
}

impl ProviderCallError {
    /// Whether a retry could plausibly succeed: rate limits, server errors,
    /// and transient transport failures. Other 4xx are client/config errors
    /// and retrying them only burns quota.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderCallError::Http { status, .. } => *status == 429 || *status >= 500,
            ProviderCallError::Network { source, .. } => {
                source.is_timeout() || source.is_connect()
            }
        }
    }

    /// Retry-After hint from the provider, when one was sent
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            ProviderCallError::Http { retry_after, .. } => *retry_after,
            ProviderCallError::Network { .. } => None,
        }
    }

    /// Map this provider failure onto the internal error taxonomy.
    ///
    /// Total by construction: every input maps to exactly one code, with
    /// `PROVIDER_ERROR` as the catch-all. The raw provider error never
    /// crosses this boundary.
    pub fn normalize(self) -> ApiError {
        match self {
            ProviderCallError::Http {
                provider,
                status,
                detail,
                retry_after,
            } => {
                let provider_message = detail
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("status {}", status));

                match status {
                    401 => ErrorCode::ReauthorizationRequired.with_message(format!(
                        "{} rejected the access token: {}",
                        provider, provider_message
                    )),
                    403 if detail.is_quota_error() => ErrorCode::RateLimited
                        .with_message(format!("{} quota exhausted: {}", provider, provider_message))
                        .with_retry_after(retry_after.unwrap_or(60)),
                    403 => ErrorCode::InsufficientScope.with_message(format!(
                        "{} denied access: {}",
                        provider, provider_message
                    )),
                    429 => ErrorCode::RateLimited
                        .with_message(format!("{} rate limited: {}", provider, provider_message))
                        .with_retry_after(retry_after.unwrap_or(60)),
                    _ => ErrorCode::ProviderError.with_message(format!(
                        "{} returned status {}: {}",
                        provider, status, provider_message
                    )),
                }
            }
            ProviderCallError::Network { provider, source } => ErrorCode::ProviderError
                .with_message(format!("{} request failed: {}", provider, source)),
        }
    }
}

/// Convert a non-success response into a classified error, consuming the body
pub(crate) async fn error_from_response(
    provider: Provider,
    response: reqwest::Response,
) -> ProviderCallError {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok());
    let body = response.text().await.unwrap_or_default();

    ProviderCallError::Http {
        provider,
        status,
        detail: GoogleErrorDetail::from_body(&body),
        retry_after,
    }
}

/// Send a request and decode the JSON body, classifying every failure
pub(crate) async fn execute_request<T: serde::de::DeserializeOwned>(
    provider: Provider,
    request: reqwest::RequestBuilder,
) -> Result<T, ProviderCallError> {
    let response = request
        .send()
        .await
        .map_err(|source| ProviderCallError::Network { provider, source })?;

    if !response.status().is_success() {
        return Err(error_from_response(provider, response).await);
    }

    response
        .json::<T>()
        .await
        .map_err(|source| ProviderCallError::Network { provider, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_error(status: u16, body: &str) -> ProviderCallError {
        ProviderCallError::Http {
            provider: Provider::SearchConsole,
            status,
            detail: GoogleErrorDetail::from_body(body),
            retry_after: None,
        }
    }

    #[test]
    fn parses_google_error_envelope() {
        let body = r#"{"error":{"code":403,"message":"User does not have sufficient permission","status":"PERMISSION_DENIED","errors":[{"reason":"insufficientPermissions","message":"nope"}]}}"#;
        let detail = GoogleErrorDetail::from_body(body);

        assert_eq!(detail.code, Some(403));
        assert_eq!(detail.status.as_deref(), Some("PERMISSION_DENIED"));
        assert_eq!(detail.errors.len(), 1);
        assert!(!detail.is_quota_error());
    }

    #[test]
    fn unknown_body_shapes_degrade_to_empty_detail() {
        for body in ["", "not json", r#"{"weird":"shape"}"#, "<html>502</html>"] {
            let detail = GoogleErrorDetail::from_body(body);
            assert!(detail.message.is_none());
            assert!(detail.errors.is_empty());
        }
    }

    #[test]
    fn retryability_classification() {
        assert!(http_error(429, "").is_retryable());
        assert!(http_error(500, "").is_retryable());
        assert!(http_error(503, "").is_retryable());
        assert!(!http_error(400, "").is_retryable());
        assert!(!http_error(403, "").is_retryable());
        assert!(!http_error(404, "").is_retryable());
    }

    #[test]
    fn unauthorized_normalizes_to_reauthorization() {
        let error = http_error(401, r#"{"error":{"message":"Invalid Credentials"}}"#).normalize();
        assert_eq!(error.code.as_ref(), "REAUTHORIZATION_REQUIRED");
    }

    #[test]
    fn permission_denied_normalizes_to_insufficient_scope() {
        let error = http_error(
            403,
            r#"{"error":{"message":"Request had insufficient authentication scopes","status":"PERMISSION_DENIED"}}"#,
        )
        .normalize();
        assert_eq!(error.code.as_ref(), "INSUFFICIENT_SCOPE");
    }

    #[test]
    fn quota_403_normalizes_to_rate_limited() {
        let error = http_error(
            403,
            r#"{"error":{"message":"Quota exceeded","errors":[{"reason":"quotaExceeded"}]}}"#,
        )
        .normalize();
        assert_eq!(error.code.as_ref(), "RATE_LIMITED");
        assert_eq!(error.retry_after, Some(60));
    }

    #[test]
    fn resource_exhausted_status_counts_as_quota() {
        let detail = GoogleErrorDetail::from_body(
            r#"{"error":{"message":"exhausted","status":"RESOURCE_EXHAUSTED"}}"#,
        );
        assert!(detail.is_quota_error());
    }

    #[test]
    fn rate_limit_normalizes_with_retry_after() {
        let error = ProviderCallError::Http {
            provider: Provider::Ga4,
            status: 429,
            detail: GoogleErrorDetail::default(),
            retry_after: Some(120),
        }
        .normalize();

        assert_eq!(error.code.as_ref(), "RATE_LIMITED");
        assert_eq!(error.retry_after, Some(120));
    }

    #[test]
    fn unmapped_statuses_fall_through_to_provider_error() {
        for status in [400, 404, 409, 500, 502, 503] {
            let error = http_error(status, "").normalize();
            assert_eq!(error.code.as_ref(), "PROVIDER_ERROR", "status {}", status);
        }
    }
}
