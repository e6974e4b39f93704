//! # Data Models
//!
//! SeaORM entities and shared response models for the Analytics Connector.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod connection;

pub use connection::Entity as Connection;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "analytics-connector".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
