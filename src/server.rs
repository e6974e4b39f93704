//! # Server Configuration
//!
//! Application state wiring and the Axum router. Public routes (service info,
//! health, and the OAuth flow) are mounted beside the `/api/*` routes, which
//! all sit behind the service-identity middleware.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use axum::{
    Router, middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::crypto::CryptoKey;
use crate::executor::{CallExecutor, RetryPolicy};
use crate::handlers;
use crate::oauth::GrantManager;
use crate::repositories::ConnectionRepository;
use crate::telemetry;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub connections: Arc<ConnectionRepository>,
    pub grants: Arc<GrantManager>,
    pub executor: Arc<CallExecutor>,
    pub http: reqwest::Client,
}

impl AppState {
    /// Wire up the component graph from configuration and a database pool
    pub fn new(config: Arc<AppConfig>, db: Arc<DatabaseConnection>) -> Result<Self> {
        let crypto_key = CryptoKey::new(
            config
                .crypto_key
                .clone()
                .ok_or_else(|| anyhow!("crypto key is not configured"))?,
        )
        .map_err(|e| anyhow!("invalid crypto key: {}", e))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_seconds))
            .build()
            .context("failed to build HTTP client")?;

        let connections = Arc::new(ConnectionRepository::new(Arc::clone(&db), crypto_key));
        let grants = Arc::new(GrantManager::new(
            Arc::clone(&config),
            Arc::clone(&connections),
            http.clone(),
        ));
        let executor = Arc::new(CallExecutor::new(
            Arc::clone(&grants),
            RetryPolicy::from_config(&config.retry),
        ));

        Ok(Self {
            config,
            db,
            connections,
            grants,
            executor,
            http,
        })
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/api/websites/{website_id}/status",
            get(handlers::metrics::website_status),
        )
        .route(
            "/api/websites/{website_id}/search-console/property",
            post(handlers::properties::set_search_console_property),
        )
        .route(
            "/api/websites/{website_id}/ga4/property",
            post(handlers::properties::set_ga4_property),
        )
        .route(
            "/api/websites/{website_id}/search-console/summary",
            get(handlers::metrics::search_console_summary),
        )
        .route(
            "/api/websites/{website_id}/search-console/top",
            get(handlers::metrics::search_console_top),
        )
        .route(
            "/api/websites/{website_id}/ga4/summary",
            get(handlers::metrics::ga4_summary),
        )
        .route(
            "/api/websites/{website_id}/ga4/top-landing-pages",
            get(handlers::metrics::ga4_top_landing_pages),
        )
        .route(
            "/api/websites/{website_id}/metrics",
            get(handlers::metrics::combined_metrics),
        )
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/auth/start", get(handlers::oauth::auth_start))
        .route("/auth/callback", get(handlers::oauth::auth_callback))
        .merge(protected)
        .layer(middleware::from_fn(telemetry::trace_context_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Starts the server with the given configuration
pub async fn run_server(
    config: AppConfig,
    db: DatabaseConnection,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config
        .bind_addr()
        .map_err(|e| format!("Invalid server address: {}", e))?;
    let profile = config.profile.clone();

    let state = AppState::new(Arc::new(config), Arc::new(db))?;
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, %profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install shutdown signal handler");
    }
    tracing::info!("Shutdown signal received");
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};

        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "service_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health,
        crate::handlers::oauth::auth_start,
        crate::handlers::oauth::auth_callback,
        crate::handlers::metrics::website_status,
        crate::handlers::properties::set_search_console_property,
        crate::handlers::properties::set_ga4_property,
        crate::handlers::metrics::search_console_summary,
        crate::handlers::metrics::search_console_top,
        crate::handlers::metrics::ga4_summary,
        crate::handlers::metrics::ga4_top_landing_pages,
        crate::handlers::metrics::combined_metrics,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::handlers::HealthResponse,
            crate::handlers::oauth::GrantCompletedResponse,
            crate::handlers::properties::SetScPropertyRequest,
            crate::handlers::properties::SetGa4PropertyRequest,
            crate::handlers::properties::PropertySelectionResponse,
            crate::handlers::metrics::StatusResponse,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "Analytics Connector API",
        description = "Internal API brokering OAuth access to Search Console and GA4 per website",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
