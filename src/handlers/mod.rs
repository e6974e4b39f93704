//! # API Handlers
//!
//! HTTP endpoint handlers. These are thin pass-through layers: request
//! validation happens before any network call, the executor and grant
//! manager do the real work, and responses are direct data shaping.

pub mod metrics;
pub mod oauth;
pub mod properties;

use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{ApiError, ErrorCode};
use crate::models::{ServiceInfo, connection};
use crate::server::AppState;

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

/// Health check response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Overall service status
    pub status: String,
    /// Database connectivity status
    pub database: String,
}

/// Liveness and database connectivity check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Database unavailable", body = ApiError)
    ),
    tag = "health"
)]
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    if let Err(e) = crate::db::health_check(&state.db).await {
        tracing::error!(error = %e, "Health check failed");
        return Err(ErrorCode::ServiceUnavailable.with_message("Database unavailable"));
    }

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        database: "ok".to_string(),
    }))
}

/// Load the connection for a website or fail with `NOT_CONNECTED`
pub(crate) async fn require_connection(
    state: &AppState,
    website_id: &str,
) -> Result<connection::Model, ApiError> {
    state
        .connections
        .find_by_website_id(website_id)
        .await?
        .ok_or_else(|| ApiError::from(ErrorCode::NotConnected))
}
