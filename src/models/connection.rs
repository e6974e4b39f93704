//! Connection entity model
//!
//! One row per website tenant holding the Google OAuth grant and the selected
//! analytics properties. Token columns are NOT NULL: a connection either has
//! a complete grant or the row does not exist.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

/// Connection entity representing a website's Google authorization
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "connections")]
pub struct Model {
    /// Website tenant identifier (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub website_id: String,

    /// Encrypted short-lived bearer token
    pub access_token_ciphertext: Vec<u8>,

    /// Encrypted long-lived refresh token; only replaced when Google rotates
    /// it or a new authorization flow completes
    pub refresh_token_ciphertext: Vec<u8>,

    /// Absolute expiry of the access token
    pub expires_at: DateTimeWithTimeZone,

    /// Granted OAuth scopes (stored as JSON array)
    #[sea_orm(column_type = "JsonBinary")]
    pub scopes: Option<JsonValue>,

    /// Selected Search Console site URL (null until configured)
    pub sc_property: Option<String>,

    /// Selected GA4 property ID (null until configured)
    pub ga4_property_id: Option<String>,

    /// Email of the consenting Google account, informational only
    pub google_user_email: Option<String>,

    /// Timestamp when the connection was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the connection was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
