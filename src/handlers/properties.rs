//! # Property Selection Handlers
//!
//! A property is only persisted after access is proven against the live
//! provider: Search Console by exact match against the account's site list,
//! GA4 by a one-row probe report. Nothing is ever stored speculatively from
//! client input alone.

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::ServiceIdentity;
use crate::error::{ApiError, ErrorCode, validation_error};
use crate::executor::execute_with_policy;
use crate::handlers::require_connection;
use crate::providers::{
    Ga4Client, Provider, ProviderCallError, SearchConsoleClient, ga4::RunReportRequest,
};
use crate::server::AppState;

/// Request body for selecting a Search Console property
#[derive(Debug, Deserialize, ToSchema)]
pub struct SetScPropertyRequest {
    /// Site URL exactly as Search Console reports it
    /// (e.g. `https://example.com/` or `sc-domain:example.com`)
    pub property: String,
}

/// Request body for selecting a GA4 property
#[derive(Debug, Deserialize, ToSchema)]
pub struct SetGa4PropertyRequest {
    /// Numeric GA4 property ID
    #[serde(rename = "propertyId")]
    pub property_id: String,
}

/// Confirmation of a persisted property selection
#[derive(Debug, Serialize, ToSchema)]
pub struct PropertySelectionResponse {
    pub website_id: String,
    pub property: String,
}

/// Select the Search Console property for a website
#[utoipa::path(
    post,
    path = "/api/websites/{website_id}/search-console/property",
    security(("service_auth" = [])),
    params(("website_id" = String, Path, description = "Website tenant identifier")),
    request_body = SetScPropertyRequest,
    responses(
        (status = 200, description = "Property validated and persisted", body = PropertySelectionResponse),
        (status = 400, description = "Property not accessible; accessible sites listed in details", body = ApiError),
        (status = 404, description = "Website is not connected", body = ApiError)
    ),
    tag = "properties"
)]
pub async fn set_search_console_property(
    State(state): State<AppState>,
    _service: ServiceIdentity,
    Path(website_id): Path<String>,
    Json(body): Json<SetScPropertyRequest>,
) -> Result<Json<PropertySelectionResponse>, ApiError> {
    let property = body.property.trim().to_string();
    if property.is_empty() {
        return Err(validation_error(
            "Missing property",
            serde_json::json!({ "property": "Required field is missing or empty" }),
        ));
    }

    require_connection(&state, &website_id).await?;

    let sites = state
        .executor
        .execute(&website_id, Provider::SearchConsole, |token| {
            let http = state.http.clone();
            let base = state.config.search_console_api_base.clone();
            async move { SearchConsoleClient::new(http, base, token).list_sites().await }
        })
        .await?;

    let accessible: Vec<String> = sites.iter().map(|s| s.site_url.clone()).collect();
    if !accessible.iter().any(|site_url| site_url == &property) {
        return Err(ErrorCode::InvalidProperty
            .with_message(format!(
                "Property '{}' is not in the account's Search Console site list",
                property
            ))
            .with_details(serde_json::json!({ "accessible_sites": accessible })));
    }

    state.connections.set_sc_property(&website_id, &property).await?;
    tracing::info!(website_id = %website_id, property = %property, "Search Console property selected");

    Ok(Json(PropertySelectionResponse {
        website_id,
        property,
    }))
}

/// Select the GA4 property for a website
#[utoipa::path(
    post,
    path = "/api/websites/{website_id}/ga4/property",
    security(("service_auth" = [])),
    params(("website_id" = String, Path, description = "Website tenant identifier")),
    request_body = SetGa4PropertyRequest,
    responses(
        (status = 200, description = "Property validated and persisted", body = PropertySelectionResponse),
        (status = 400, description = "Property not accessible", body = ApiError),
        (status = 404, description = "Website is not connected", body = ApiError)
    ),
    tag = "properties"
)]
pub async fn set_ga4_property(
    State(state): State<AppState>,
    _service: ServiceIdentity,
    Path(website_id): Path<String>,
    Json(body): Json<SetGa4PropertyRequest>,
) -> Result<Json<PropertySelectionResponse>, ApiError> {
    let property_id = body.property_id.trim().to_string();
    if property_id.is_empty() || !property_id.chars().all(|c| c.is_ascii_digit()) {
        return Err(validation_error(
            "Invalid propertyId",
            serde_json::json!({ "propertyId": "Must be a numeric GA4 property ID" }),
        ));
    }

    require_connection(&state, &website_id).await?;

    // The probe runs under the same retry policy as any provider call, but
    // access failures map to INVALID_PROPERTY rather than scope errors: the
    // caller asked about this specific property.
    let access_token = state.grants.ensure_fresh_access_token(&website_id).await?;
    let probe = execute_with_policy(state.executor.policy(), Provider::Ga4, || {
        let http = state.http.clone();
        let base = state.config.ga4_api_base.clone();
        let token = access_token.clone();
        let property_id = property_id.clone();
        async move {
            Ga4Client::new(http, base, token)
                .run_report(&property_id, &RunReportRequest::probe())
                .await
        }
    })
    .await;

    if let Err(error) = probe {
        return Err(match error {
            ProviderCallError::Http {
                status: 400 | 403 | 404,
                ..
            } => ErrorCode::InvalidProperty.with_message(format!(
                "GA4 property '{}' is not accessible to the connected account",
                property_id
            )),
            other => other.normalize(),
        });
    }

    state
        .connections
        .set_ga4_property(&website_id, &property_id)
        .await?;
    tracing::info!(website_id = %website_id, property_id = %property_id, "GA4 property selected");

    Ok(Json(PropertySelectionResponse {
        website_id,
        property: property_id,
    }))
}
