//! Shared helpers for integration tests: a migrated SQLite database, a
//! config pointing every Google endpoint at a local mock server, and seeding
//! for connections.

use std::sync::Arc;

use analytics_connector::config::{AppConfig, RetryConfig};
use analytics_connector::crypto::CryptoKey;
use analytics_connector::repositories::ConnectionRepository;
use chrono::{DateTime, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use tempfile::TempDir;

pub const TEST_SERVICE_SECRET: &str = "test-shared-secret";
pub const TEST_CRYPTO_KEY: [u8; 32] = [7u8; 32];

/// Create a migrated file-backed SQLite database. The TempDir must be kept
/// alive for the lifetime of the connection.
pub async fn setup_test_db() -> anyhow::Result<(DatabaseConnection, TempDir)> {
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("connector_test.db");
    let url = format!("sqlite:{}?mode=rwc", db_path.display());

    let db = Database::connect(url).await?;
    Migrator::up(&db, None).await?;

    Ok((db, dir))
}

/// Config with all provider endpoints pointed at the mock server and retry
/// delays small enough for tests.
pub fn test_config(mock_base: &str) -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        service_shared_secret: Some(TEST_SERVICE_SECRET.to_string()),
        crypto_key: Some(TEST_CRYPTO_KEY.to_vec()),
        google_client_id: Some("test-client-id".to_string()),
        google_client_secret: Some("test-client-secret".to_string()),
        google_redirect_uri: Some("http://localhost:8080/auth/callback".to_string()),
        google_token_url: format!("{}/token", mock_base),
        google_userinfo_url: format!("{}/userinfo", mock_base),
        search_console_api_base: format!("{}/webmasters/v3", mock_base),
        ga4_api_base: format!("{}/v1beta", mock_base),
        retry: RetryConfig {
            max_attempts: 4,
            base_delay_ms: 5,
            max_delay_ms: 20,
            jitter_factor: 0.0,
        },
        ..Default::default()
    }
}

pub fn test_repository(db: &DatabaseConnection) -> Arc<ConnectionRepository> {
    let crypto_key = CryptoKey::new(TEST_CRYPTO_KEY.to_vec()).expect("valid test key");
    Arc::new(ConnectionRepository::new(Arc::new(db.clone()), crypto_key))
}

/// Seed a complete grant for a website with the given expiry
pub async fn seed_connection(
    repo: &ConnectionRepository,
    website_id: &str,
    expires_at: DateTime<Utc>,
) -> anyhow::Result<()> {
    repo.upsert_grant(
        website_id,
        "ya29.seeded-access-token",
        "1//seeded-refresh-token",
        expires_at,
        vec![
            "https://www.googleapis.com/auth/webmasters.readonly".to_string(),
            "https://www.googleapis.com/auth/analytics.readonly".to_string(),
        ],
        Some("owner@example.com".to_string()),
    )
    .await?;
    Ok(())
}
