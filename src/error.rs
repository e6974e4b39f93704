//! # Error Handling
//!
//! Unified error handling for the Analytics Connector API. Every failure
//! surfaced to a caller is a problem+json response carrying a stable error
//! code from the internal taxonomy, independent of provider-specific wording.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::telemetry;

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Suggested retry delay in seconds (optional)
    pub retry_after: Option<u64>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            retry_after: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Set retry after delay
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Extract current trace ID from the active request context (falls back to a generated correlation ID)
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

/// Internal error taxonomy with predefined status codes.
///
/// The connector-specific codes mirror the token lifecycle: a tenant either
/// has no grant, needs re-consent, lacks a scope, or has not picked a
/// provider resource yet. Provider failures that survive retry normalization
/// collapse into `RateLimited` or `ProviderError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorCode {
    #[error("No connection exists for this website")]
    NotConnected,
    #[error("Google authorization is no longer valid; the user must re-connect")]
    ReauthorizationRequired,
    #[error("Granted scopes do not permit this operation")]
    InsufficientScope,
    #[error("Provider rate limit exceeded")]
    RateLimited,
    #[error("Requested property is not accessible to the connected account")]
    InvalidProperty,
    #[error("No property has been selected for this website")]
    NoProperty,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("OAuth state token is invalid or expired")]
    InvalidState,
    #[error("Authorization code exchange failed")]
    TokenExchangeFailed,
    #[error("Authorization completed without the required token material")]
    IncompleteGrant,
    #[error("Provider returned an error")]
    ProviderError,
    #[error("Bad Request")]
    ValidationFailed,
    #[error("Not Found")]
    NotFound,
    #[error("Internal Server Error")]
    InternalServerError,
    #[error("Service Unavailable")]
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the appropriate HTTP status code for this error code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::NotConnected => StatusCode::NOT_FOUND,
            ErrorCode::ReauthorizationRequired => StatusCode::UNAUTHORIZED,
            ErrorCode::InsufficientScope => StatusCode::FORBIDDEN,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::InvalidProperty => StatusCode::BAD_REQUEST,
            ErrorCode::NoProperty => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::InvalidState => StatusCode::BAD_REQUEST,
            ErrorCode::TokenExchangeFailed => StatusCode::BAD_GATEWAY,
            ErrorCode::IncompleteGrant => StatusCode::BAD_GATEWAY,
            ErrorCode::ProviderError => StatusCode::BAD_GATEWAY,
            ErrorCode::ValidationFailed => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Get the stable error code string (SCREAMING_SNAKE_CASE on the wire)
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotConnected => "NOT_CONNECTED",
            ErrorCode::ReauthorizationRequired => "REAUTHORIZATION_REQUIRED",
            ErrorCode::InsufficientScope => "INSUFFICIENT_SCOPE",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::InvalidProperty => "INVALID_PROPERTY",
            ErrorCode::NoProperty => "NO_PROPERTY",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::InvalidState => "INVALID_STATE",
            ErrorCode::TokenExchangeFailed => "TOKEN_EXCHANGE_FAILED",
            ErrorCode::IncompleteGrant => "INCOMPLETE_GRANT",
            ErrorCode::ProviderError => "PROVIDER_ERROR",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InternalServerError => "INTERNAL_SERVER_ERROR",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }

    /// Build an [`ApiError`] with a custom message
    pub fn with_message<S: Into<String>>(self, message: S) -> ApiError {
        ApiError::new(self.status_code(), self.as_str().to_string(), message.into())
    }
}

impl From<ErrorCode> for ApiError {
    fn from(code: ErrorCode) -> Self {
        code.with_message(code.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        if let Some(retry_after) = self.retry_after {
            if let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string()) {
                headers.insert("retry-after", header_value);
            }
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

// Error mappers for common sources

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        match error {
            sea_orm::DbErr::RecordNotFound(record) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("Record not found: {}", record),
            ),
            sea_orm::DbErr::Conn(connection_err) => {
                tracing::error!("Database connection error: {:?}", connection_err);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            _ => {
                tracing::error!("Database error: {:?}", error);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create an unauthorized error (401) with explicit trace_id
pub fn unauthorized_with_trace_id(message: Option<&str>, trace_id: String) -> ApiError {
    let mut error = unauthorized(message);
    error.trace_id = Some(trace_id.into_boxed_str());
    error
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_api_error_basic() {
        let error = ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", "Test message");

        assert_eq!(error.code, Box::from("VALIDATION_FAILED"));
        assert_eq!(error.message, Box::from("Test message"));
        assert_eq!(error.details, None);
        assert_eq!(error.retry_after, None);
        assert!(error.trace_id.is_some());
    }

    #[test]
    fn test_taxonomy_status_mapping() {
        let cases = [
            (ErrorCode::NotConnected, StatusCode::NOT_FOUND, "NOT_CONNECTED"),
            (
                ErrorCode::ReauthorizationRequired,
                StatusCode::UNAUTHORIZED,
                "REAUTHORIZATION_REQUIRED",
            ),
            (
                ErrorCode::InsufficientScope,
                StatusCode::FORBIDDEN,
                "INSUFFICIENT_SCOPE",
            ),
            (
                ErrorCode::RateLimited,
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
            ),
            (
                ErrorCode::InvalidProperty,
                StatusCode::BAD_REQUEST,
                "INVALID_PROPERTY",
            ),
            (ErrorCode::NoProperty, StatusCode::BAD_REQUEST, "NO_PROPERTY"),
            (ErrorCode::Unauthorized, StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            (ErrorCode::InvalidState, StatusCode::BAD_REQUEST, "INVALID_STATE"),
            (
                ErrorCode::TokenExchangeFailed,
                StatusCode::BAD_GATEWAY,
                "TOKEN_EXCHANGE_FAILED",
            ),
            (
                ErrorCode::IncompleteGrant,
                StatusCode::BAD_GATEWAY,
                "INCOMPLETE_GRANT",
            ),
            (ErrorCode::ProviderError, StatusCode::BAD_GATEWAY, "PROVIDER_ERROR"),
        ];

        for (code, status, wire) in cases {
            let error: ApiError = code.into();
            assert_eq!(error.status, status, "status for {:?}", code);
            assert_eq!(error.code.as_ref(), wire, "wire code for {:?}", code);
        }
    }

    #[test]
    fn test_with_message_overrides_default() {
        let error = ErrorCode::InvalidProperty.with_message("sc-domain:example.com not accessible");
        assert_eq!(error.code.as_ref(), "INVALID_PROPERTY");
        assert!(error.message.contains("example.com"));
    }

    #[test]
    fn test_invalid_property_carries_accessible_list() {
        let error = ApiError::from(ErrorCode::InvalidProperty)
            .with_details(json!({ "accessible_sites": ["https://example.com/"] }));

        let details = error.details.expect("details attached");
        assert!(details["accessible_sites"].is_array());
    }

    #[test]
    fn test_retry_after_header() {
        let error = ApiError::from(ErrorCode::RateLimited).with_retry_after(60);
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("retry-after").unwrap(), "60");
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
    }

    #[test]
    fn test_from_anyhow() {
        let api_error: ApiError = anyhow::anyhow!("boom").into();
        assert_eq!(api_error.code, Box::from("INTERNAL_SERVER_ERROR"));
        assert_eq!(api_error.message, Box::from("An internal error occurred"));
    }

    #[test]
    fn test_database_error_mapping() {
        let db_error = sea_orm::DbErr::RecordNotFound("connections".to_string());
        let api_error: ApiError = db_error.into();

        assert_eq!(api_error.status, StatusCode::NOT_FOUND);
        assert!(api_error.message.contains("connections"));
    }

    #[test]
    fn test_trace_id_fallback_format() {
        let error: ApiError = ErrorCode::ProviderError.into();
        let trace_id = error.trace_id.expect("trace id generated");
        assert!(trace_id.starts_with("corr-"));
        assert_eq!(trace_id.len(), 13);
    }
}
