//! # Status and Metrics Handlers
//!
//! Read-side endpoints: connection status plus the Search Console and GA4
//! report endpoints. All provider access goes through the call executor, so
//! every response here is either shaped provider data or a normalized error
//! code.

use axum::{
    extract::{Path, State},
    response::Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use utoipa::ToSchema;

use crate::auth::ServiceIdentity;
use crate::error::{ApiError, ErrorCode};
use crate::handlers::require_connection;
use crate::providers::{
    Ga4Client, Provider, SearchConsoleClient,
    ga4::{DateRange, DimensionSpec, MetricSpec, RunReportRequest, RunReportResponse},
    search_console::{SearchAnalyticsQuery, SearchAnalyticsResponse},
};
use crate::server::AppState;

/// Reporting window shared by the summary and top endpoints
const REPORT_WINDOW_DAYS: i64 = 28;
const TOP_ROW_LIMIT: u32 = 10;

/// Connection status for a website
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_user_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sc_property: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ga4_property_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Connection status for a website
#[utoipa::path(
    get,
    path = "/api/websites/{website_id}/status",
    security(("service_auth" = [])),
    params(("website_id" = String, Path, description = "Website tenant identifier")),
    responses(
        (status = 200, description = "Connection status", body = StatusResponse)
    ),
    tag = "status"
)]
pub async fn website_status(
    State(state): State<AppState>,
    _service: ServiceIdentity,
    Path(website_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let status = match state.connections.find_by_website_id(&website_id).await? {
        Some(connection) => StatusResponse {
            connected: true,
            google_user_email: connection.google_user_email,
            scopes: connection.scopes,
            sc_property: connection.sc_property,
            ga4_property_id: connection.ga4_property_id,
            expires_at: Some(connection.expires_at.with_timezone(&Utc)),
        },
        None => StatusResponse {
            connected: false,
            google_user_email: None,
            scopes: None,
            sc_property: None,
            ga4_property_id: None,
            expires_at: None,
        },
    };

    Ok(Json(status))
}

fn sc_window() -> (String, String) {
    let today = Utc::now().date_naive();
    let start = today - Duration::days(REPORT_WINDOW_DAYS);
    (
        start.format("%Y-%m-%d").to_string(),
        today.format("%Y-%m-%d").to_string(),
    )
}

async fn run_sc_query(
    state: &AppState,
    website_id: &str,
    query: SearchAnalyticsQuery,
) -> Result<(String, SearchAnalyticsResponse), ApiError> {
    let connection = require_connection(state, website_id).await?;
    let property = connection.sc_property.ok_or_else(|| {
        ErrorCode::NoProperty.with_message("No Search Console property selected for this website")
    })?;

    let response = state
        .executor
        .execute(website_id, Provider::SearchConsole, |token| {
            let http = state.http.clone();
            let base = state.config.search_console_api_base.clone();
            let property = property.clone();
            let query = query.clone();
            async move {
                SearchConsoleClient::new(http, base, token)
                    .query(&property, &query)
                    .await
            }
        })
        .await?;

    Ok((property, response))
}

async fn run_ga4_report(
    state: &AppState,
    website_id: &str,
    request: RunReportRequest,
) -> Result<(String, RunReportResponse), ApiError> {
    let connection = require_connection(state, website_id).await?;
    let property_id = connection.ga4_property_id.ok_or_else(|| {
        ErrorCode::NoProperty.with_message("No GA4 property selected for this website")
    })?;

    let response = state
        .executor
        .execute(website_id, Provider::Ga4, |token| {
            let http = state.http.clone();
            let base = state.config.ga4_api_base.clone();
            let property_id = property_id.clone();
            let request = request.clone();
            async move {
                Ga4Client::new(http, base, token)
                    .run_report(&property_id, &request)
                    .await
            }
        })
        .await?;

    Ok((property_id, response))
}

async fn sc_summary_value(state: &AppState, website_id: &str) -> Result<Value, ApiError> {
    let (start_date, end_date) = sc_window();
    let query = SearchAnalyticsQuery {
        start_date: start_date.clone(),
        end_date: end_date.clone(),
        dimensions: Vec::new(),
        row_limit: None,
    };

    let (property, response) = run_sc_query(state, website_id, query).await?;

    // Without dimensions the API returns a single totals row; an empty result
    // means no traffic in the window.
    let totals = response.rows.first();
    Ok(json!({
        "property": property,
        "startDate": start_date,
        "endDate": end_date,
        "clicks": totals.map_or(0.0, |r| r.clicks),
        "impressions": totals.map_or(0.0, |r| r.impressions),
        "ctr": totals.map_or(0.0, |r| r.ctr),
        "position": totals.map_or(0.0, |r| r.position),
    }))
}

async fn ga4_summary_value(state: &AppState, website_id: &str) -> Result<Value, ApiError> {
    let request = RunReportRequest {
        date_ranges: vec![DateRange {
            start_date: format!("{}daysAgo", REPORT_WINDOW_DAYS),
            end_date: "today".to_string(),
        }],
        metrics: vec![
            MetricSpec {
                name: "activeUsers".to_string(),
            },
            MetricSpec {
                name: "sessions".to_string(),
            },
            MetricSpec {
                name: "screenPageViews".to_string(),
            },
        ],
        dimensions: Vec::new(),
        limit: None,
    };

    let (property_id, response) = run_ga4_report(state, website_id, request).await?;

    let totals = response.rows.first();
    let metric = |index: usize| -> f64 {
        totals
            .and_then(|row| row.metric_values.get(index))
            .and_then(|v| v.value.parse::<f64>().ok())
            .unwrap_or(0.0)
    };

    Ok(json!({
        "propertyId": property_id,
        "activeUsers": metric(0),
        "sessions": metric(1),
        "pageViews": metric(2),
    }))
}

/// Search performance summary over the last 28 days
#[utoipa::path(
    get,
    path = "/api/websites/{website_id}/search-console/summary",
    security(("service_auth" = [])),
    params(("website_id" = String, Path, description = "Website tenant identifier")),
    responses(
        (status = 200, description = "Clicks, impressions, CTR, and position totals"),
        (status = 400, description = "No property selected", body = ApiError),
        (status = 404, description = "Website is not connected", body = ApiError)
    ),
    tag = "metrics"
)]
pub async fn search_console_summary(
    State(state): State<AppState>,
    _service: ServiceIdentity,
    Path(website_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(sc_summary_value(&state, &website_id).await?))
}

/// Top queries by clicks over the last 28 days
#[utoipa::path(
    get,
    path = "/api/websites/{website_id}/search-console/top",
    security(("service_auth" = [])),
    params(("website_id" = String, Path, description = "Website tenant identifier")),
    responses(
        (status = 200, description = "Top queries with per-query metrics"),
        (status = 400, description = "No property selected", body = ApiError),
        (status = 404, description = "Website is not connected", body = ApiError)
    ),
    tag = "metrics"
)]
pub async fn search_console_top(
    State(state): State<AppState>,
    _service: ServiceIdentity,
    Path(website_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (start_date, end_date) = sc_window();
    let query = SearchAnalyticsQuery {
        start_date: start_date.clone(),
        end_date: end_date.clone(),
        dimensions: vec!["query".to_string()],
        row_limit: Some(TOP_ROW_LIMIT),
    };

    let (property, response) = run_sc_query(&state, &website_id, query).await?;

    let rows: Vec<Value> = response
        .rows
        .iter()
        .map(|row| {
            json!({
                "query": row.keys.first().cloned().unwrap_or_default(),
                "clicks": row.clicks,
                "impressions": row.impressions,
                "ctr": row.ctr,
                "position": row.position,
            })
        })
        .collect();

    Ok(Json(json!({
        "property": property,
        "startDate": start_date,
        "endDate": end_date,
        "rows": rows,
    })))
}

/// Web analytics summary over the last 28 days
#[utoipa::path(
    get,
    path = "/api/websites/{website_id}/ga4/summary",
    security(("service_auth" = [])),
    params(("website_id" = String, Path, description = "Website tenant identifier")),
    responses(
        (status = 200, description = "Active users, sessions, and page views"),
        (status = 400, description = "No property selected", body = ApiError),
        (status = 404, description = "Website is not connected", body = ApiError)
    ),
    tag = "metrics"
)]
pub async fn ga4_summary(
    State(state): State<AppState>,
    _service: ServiceIdentity,
    Path(website_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(ga4_summary_value(&state, &website_id).await?))
}

/// Top landing pages by sessions over the last 28 days
#[utoipa::path(
    get,
    path = "/api/websites/{website_id}/ga4/top-landing-pages",
    security(("service_auth" = [])),
    params(("website_id" = String, Path, description = "Website tenant identifier")),
    responses(
        (status = 200, description = "Top landing pages with session counts"),
        (status = 400, description = "No property selected", body = ApiError),
        (status = 404, description = "Website is not connected", body = ApiError)
    ),
    tag = "metrics"
)]
pub async fn ga4_top_landing_pages(
    State(state): State<AppState>,
    _service: ServiceIdentity,
    Path(website_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let request = RunReportRequest {
        date_ranges: vec![DateRange {
            start_date: format!("{}daysAgo", REPORT_WINDOW_DAYS),
            end_date: "today".to_string(),
        }],
        metrics: vec![MetricSpec {
            name: "sessions".to_string(),
        }],
        dimensions: vec![DimensionSpec {
            name: "landingPage".to_string(),
        }],
        limit: Some(TOP_ROW_LIMIT.to_string()),
    };

    let (property_id, response) = run_ga4_report(&state, &website_id, request).await?;

    let rows: Vec<Value> = response
        .rows
        .iter()
        .map(|row| {
            json!({
                "landingPage": row
                    .dimension_values
                    .first()
                    .map(|v| v.value.clone())
                    .unwrap_or_default(),
                "sessions": row
                    .metric_values
                    .first()
                    .and_then(|v| v.value.parse::<f64>().ok())
                    .unwrap_or(0.0),
            })
        })
        .collect();

    Ok(Json(json!({
        "propertyId": property_id,
        "rows": rows,
    })))
}

/// Combined metrics across both providers
///
/// Each provider section degrades independently: a failure on one side is
/// reported as its normalized error code while the other side still returns
/// data.
#[utoipa::path(
    get,
    path = "/api/websites/{website_id}/metrics",
    security(("service_auth" = [])),
    params(("website_id" = String, Path, description = "Website tenant identifier")),
    responses(
        (status = 200, description = "Combined summaries, with per-provider errors inline"),
        (status = 404, description = "Website is not connected", body = ApiError)
    ),
    tag = "metrics"
)]
pub async fn combined_metrics(
    State(state): State<AppState>,
    _service: ServiceIdentity,
    Path(website_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    // A tenant with no grant at all is an error; a missing property on one
    // side is reported inline below.
    require_connection(&state, &website_id).await?;

    let (search_console, ga4) = tokio::join!(
        sc_summary_value(&state, &website_id),
        ga4_summary_value(&state, &website_id),
    );

    Ok(Json(json!({
        "websiteId": website_id,
        "searchConsole": section(search_console),
        "ga4": section(ga4),
    })))
}

fn section(result: Result<Value, ApiError>) -> Value {
    match result {
        Ok(value) => value,
        Err(error) => json!({
            "error": {
                "code": error.code,
                "message": error.message,
            }
        }),
    }
}
