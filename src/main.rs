//! # Analytics Connector Main Entry Point

use analytics_connector::{config::ConfigLoader, db, server::run_server, telemetry};
use migration::{Migrator, MigratorTrait};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration from layered env files and variables
    let config = ConfigLoader::new().load()?;
    config.validate()?;

    telemetry::init_tracing(&config)?;
    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let db = db::init_pool(&config).await?;
    Migrator::up(&db, None).await?;

    run_server(config, db).await
}
