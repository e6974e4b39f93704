//! Connection repository for database operations
//!
//! Encapsulates SeaORM operations for the connections table. All token
//! material passes through the crypto layer on the way in and out; callers
//! never see ciphertexts. Mutations are upsert-by-primary-key, so concurrent
//! writers race only on last-write-wins, never on partial state.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use std::sync::Arc;

use crate::crypto::{CryptoKey, decrypt_token, encrypt_token};
use crate::models::connection::{self, Entity as Connection};

/// Repository for connection database operations
#[derive(Debug, Clone)]
pub struct ConnectionRepository {
    db: Arc<DatabaseConnection>,
    crypto_key: CryptoKey,
}

impl ConnectionRepository {
    /// Creates a new ConnectionRepository instance
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    /// Finds the connection for a website, if one exists
    pub async fn find_by_website_id(&self, website_id: &str) -> Result<Option<connection::Model>> {
        Ok(Connection::find_by_id(website_id.to_owned())
            .one(&*self.db)
            .await?)
    }

    /// Persists a completed grant, replacing any existing connection for the
    /// website (upsert, never a second row).
    ///
    /// All three pieces of token material are required by signature, so a
    /// partially-completed grant cannot reach the store.
    pub async fn upsert_grant(
        &self,
        website_id: &str,
        access_token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
        scopes: Vec<String>,
        google_user_email: Option<String>,
    ) -> Result<connection::Model> {
        let access_cipher = encrypt_token(&self.crypto_key, website_id, access_token)
            .map_err(|e| anyhow!("Token encryption failed: {}", e))?;
        let refresh_cipher = encrypt_token(&self.crypto_key, website_id, refresh_token)
            .map_err(|e| anyhow!("Token encryption failed: {}", e))?;

        let now = Utc::now();
        let scopes_json = serde_json::json!(scopes);

        match self.find_by_website_id(website_id).await? {
            Some(existing) => {
                let mut model: connection::ActiveModel = existing.into();
                model.access_token_ciphertext = Set(access_cipher);
                model.refresh_token_ciphertext = Set(refresh_cipher);
                model.expires_at = Set(expires_at.into());
                model.scopes = Set(Some(scopes_json));
                model.google_user_email = Set(google_user_email);
                model.updated_at = Set(now.into());
                Ok(model.update(&*self.db).await?)
            }
            None => {
                let model = connection::ActiveModel {
                    website_id: Set(website_id.to_owned()),
                    access_token_ciphertext: Set(access_cipher),
                    refresh_token_ciphertext: Set(refresh_cipher),
                    expires_at: Set(expires_at.into()),
                    scopes: Set(Some(scopes_json)),
                    sc_property: Set(None),
                    ga4_property_id: Set(None),
                    google_user_email: Set(google_user_email),
                    created_at: Set(now.into()),
                    updated_at: Set(now.into()),
                };
                model.insert(&*self.db).await?;

                let fetched = self.find_by_website_id(website_id).await?;
                fetched.ok_or_else(|| anyhow!("connection not persisted"))
            }
        }
    }

    /// Updates token material after a refresh. The refresh token is only
    /// replaced when Google rotated it and supplied a new one.
    pub async fn update_tokens(
        &self,
        website_id: &str,
        access_token: &str,
        rotated_refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<connection::Model> {
        let existing = self
            .find_by_website_id(website_id)
            .await?
            .ok_or_else(|| anyhow!("Connection for website '{}' not found", website_id))?;

        let access_cipher = encrypt_token(&self.crypto_key, website_id, access_token)
            .map_err(|e| anyhow!("Token encryption failed: {}", e))?;

        let mut model: connection::ActiveModel = existing.into();
        model.access_token_ciphertext = Set(access_cipher);
        if let Some(refresh_token) = rotated_refresh_token {
            let refresh_cipher = encrypt_token(&self.crypto_key, website_id, refresh_token)
                .map_err(|e| anyhow!("Token encryption failed: {}", e))?;
            model.refresh_token_ciphertext = Set(refresh_cipher);
        }
        model.expires_at = Set(expires_at.into());
        model.updated_at = Set(Utc::now().into());

        Ok(model.update(&*self.db).await?)
    }

    /// Persists the validated Search Console property selection
    pub async fn set_sc_property(
        &self,
        website_id: &str,
        property: &str,
    ) -> Result<connection::Model> {
        let existing = self
            .find_by_website_id(website_id)
            .await?
            .ok_or_else(|| anyhow!("Connection for website '{}' not found", website_id))?;

        let mut model: connection::ActiveModel = existing.into();
        model.sc_property = Set(Some(property.to_owned()));
        model.updated_at = Set(Utc::now().into());

        Ok(model.update(&*self.db).await?)
    }

    /// Persists the validated GA4 property selection
    pub async fn set_ga4_property(
        &self,
        website_id: &str,
        property_id: &str,
    ) -> Result<connection::Model> {
        let existing = self
            .find_by_website_id(website_id)
            .await?
            .ok_or_else(|| anyhow!("Connection for website '{}' not found", website_id))?;

        let mut model: connection::ActiveModel = existing.into();
        model.ga4_property_id = Set(Some(property_id.to_owned()));
        model.updated_at = Set(Utc::now().into());

        Ok(model.update(&*self.db).await?)
    }

    /// Decrypts the token pair stored on a connection
    pub fn decrypt_tokens(&self, connection: &connection::Model) -> Result<(String, String)> {
        let access = decrypt_token(
            &self.crypto_key,
            &connection.website_id,
            &connection.access_token_ciphertext,
        )
        .map_err(|e| {
            tracing::error!(
                website_id = %connection.website_id,
                "Access token decryption failed"
            );
            anyhow!("Token decryption failed: {}", e)
        })?;

        let refresh = decrypt_token(
            &self.crypto_key,
            &connection.website_id,
            &connection.refresh_token_ciphertext,
        )
        .map_err(|e| {
            tracing::error!(
                website_id = %connection.website_id,
                "Refresh token decryption failed"
            );
            anyhow!("Token decryption failed: {}", e)
        })?;

        Ok((access, refresh))
    }
}
