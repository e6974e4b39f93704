//! # OAuth Grant Manager
//!
//! Drives the authorization-code exchange with Google and keeps each
//! website's access token fresh. The grant state machine is
//! `NoGrant -> PendingAuthorization -> Granted`; pending authorizations live
//! entirely in the signed correlation token (see [`state`]), never in server
//! memory.

pub mod state;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::Deserialize;
use tokio::sync::Mutex;
use url::Url;

use crate::config::AppConfig;
use crate::error::{ApiError, ErrorCode};
use crate::models::connection;
use crate::repositories::ConnectionRepository;

/// Scopes requested for every grant: Search Console read, GA4 read, and the
/// account email for display. Fixed and minimal; nothing else is ever asked
/// for.
pub const OAUTH_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/webmasters.readonly",
    "https://www.googleapis.com/auth/analytics.readonly",
    "https://www.googleapis.com/auth/userinfo.email",
];

/// Google OAuth token endpoint response
#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    scope: Option<String>,
}

/// Google userinfo response
#[derive(Debug, Deserialize)]
struct GoogleUserinfo {
    email: String,
}

/// Manages the OAuth grant lifecycle for all website tenants.
pub struct GrantManager {
    config: Arc<AppConfig>,
    connections: Arc<ConnectionRepository>,
    http: reqwest::Client,
    /// Per-website refresh serialization: two concurrent calls that both find
    /// a stale token take this lock in turn, and the loser re-reads the row
    /// instead of issuing a second refresh.
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl GrantManager {
    /// Create a new grant manager
    pub fn new(
        config: Arc<AppConfig>,
        connections: Arc<ConnectionRepository>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            config,
            connections,
            http,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    fn client_credentials(&self) -> Result<(&str, &str, &str), ApiError> {
        let client_id = self.config.google_client_id.as_deref().ok_or_else(|| {
            ErrorCode::InternalServerError.with_message("Google client ID is not configured")
        })?;
        let client_secret = self.config.google_client_secret.as_deref().ok_or_else(|| {
            ErrorCode::InternalServerError.with_message("Google client secret is not configured")
        })?;
        let redirect_uri = self.config.google_redirect_uri.as_deref().ok_or_else(|| {
            ErrorCode::InternalServerError.with_message("Google redirect URI is not configured")
        })?;
        Ok((client_id, client_secret, redirect_uri))
    }

    fn state_secret(&self) -> Result<&str, ApiError> {
        self.config
            .service_shared_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ErrorCode::InternalServerError
                    .with_message("service shared secret is not configured")
            })
    }

    /// Build the Google consent URL for a website.
    ///
    /// `access_type=offline` makes Google issue a refresh token, and
    /// `prompt=consent` forces re-consent so the refresh token is returned
    /// even when the user previously granted access.
    pub fn begin_authorization(&self, website_id: &str) -> Result<Url, ApiError> {
        if website_id.is_empty() {
            return Err(crate::error::validation_error(
                "Missing website_id",
                serde_json::json!({ "website_id": "Required parameter is missing" }),
            ));
        }

        let (client_id, _, redirect_uri) = self.client_credentials()?;

        let correlation_token = state::issue_correlation_token(
            self.state_secret()?,
            website_id,
            self.config.token_refresh.state_ttl_seconds,
        )
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to sign correlation token");
            ErrorCode::InternalServerError.with_message("Failed to create authorization state")
        })?;

        let mut url = Url::parse(&self.config.google_auth_url).map_err(|e| {
            ErrorCode::InternalServerError
                .with_message(format!("Invalid Google auth URL configured: {}", e))
        })?;

        url.query_pairs_mut()
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &OAUTH_SCOPES.join(" "))
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("state", &correlation_token);

        tracing::info!(website_id = %website_id, "Authorization flow initiated");

        Ok(url)
    }

    /// Complete an authorization flow: verify the correlation token, exchange
    /// the code, enrich with the account email, and upsert the connection.
    pub async fn complete_authorization(
        &self,
        code: &str,
        correlation_token: &str,
    ) -> Result<connection::Model, ApiError> {
        let website_id =
            state::verify_correlation_token(self.state_secret()?, correlation_token).map_err(
                |e| {
                    tracing::warn!(error = %e, "Rejected OAuth callback state");
                    ErrorCode::InvalidState.with_message(e.to_string())
                },
            )?;

        let (client_id, client_secret, redirect_uri) = self.client_credentials()?;

        let mut params = HashMap::new();
        params.insert("client_id", client_id);
        params.insert("client_secret", client_secret);
        params.insert("code", code);
        params.insert("grant_type", "authorization_code");
        params.insert("redirect_uri", redirect_uri);

        let response = self
            .http
            .post(&self.config.google_token_url)
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                ErrorCode::TokenExchangeFailed
                    .with_message(format!("Token request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                website_id = %website_id,
                status = status.as_u16(),
                "Authorization code exchange rejected"
            );
            counter!("oauth_grant_exchange_failure_total").increment(1);
            return Err(ErrorCode::TokenExchangeFailed.with_message(format!(
                "Token exchange failed with status {}: {}",
                status,
                truncate(&body, 200)
            )));
        }

        let tokens: TokenEndpointResponse = response.json().await.map_err(|e| {
            ErrorCode::TokenExchangeFailed
                .with_message(format!("Failed to parse token response: {}", e))
        })?;

        // The grant is all-or-nothing: without any one of these the
        // connection would be unusable, so nothing is persisted.
        let (access_token, refresh_token, expires_in) =
            match (tokens.access_token, tokens.refresh_token, tokens.expires_in) {
                (Some(access), Some(refresh), Some(expires_in)) => (access, refresh, expires_in),
                _ => {
                    counter!("oauth_grant_incomplete_total").increment(1);
                    return Err(ErrorCode::IncompleteGrant.with_message(
                        "Token exchange response is missing the access token, refresh token, or expiry",
                    ));
                }
            };

        let expires_at = Utc::now() + Duration::seconds(expires_in);
        let scopes = parse_scope_list(tokens.scope.as_deref());

        // Email is informational; a failed lookup degrades to an empty value
        // rather than aborting the grant.
        let email = match self.fetch_user_email(&access_token).await {
            Ok(email) => Some(email),
            Err(e) => {
                tracing::warn!(
                    website_id = %website_id,
                    error = %e,
                    "Userinfo lookup failed, storing grant without email"
                );
                None
            }
        };

        let model = self
            .connections
            .upsert_grant(
                &website_id,
                &access_token,
                &refresh_token,
                expires_at,
                scopes,
                email,
            )
            .await?;

        counter!("oauth_grant_completed_total").increment(1);
        tracing::info!(website_id = %website_id, "Authorization completed");

        Ok(model)
    }

    /// Return an access token guaranteed to be valid for at least the
    /// configured buffer.
    ///
    /// Tokens within the buffer of expiry are refreshed proactively: a call
    /// that starts with a token expiring mid-flight would fail
    /// non-deterministically, so the buffer converts that race into a
    /// deterministic precondition.
    pub async fn ensure_fresh_access_token(&self, website_id: &str) -> Result<String, ApiError> {
        let connection = self
            .connections
            .find_by_website_id(website_id)
            .await?
            .ok_or_else(|| ApiError::from(ErrorCode::NotConnected))?;

        if !self.needs_refresh(&connection) {
            let (access, _) = self.connections.decrypt_tokens(&connection)?;
            return Ok(access);
        }

        let lock = {
            let mut locks = self.refresh_locks.lock().await;
            locks
                .entry(website_id.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        // Another in-flight refresh may have completed while we waited.
        let connection = self
            .connections
            .find_by_website_id(website_id)
            .await?
            .ok_or_else(|| ApiError::from(ErrorCode::NotConnected))?;

        if !self.needs_refresh(&connection) {
            let (access, _) = self.connections.decrypt_tokens(&connection)?;
            return Ok(access);
        }

        self.refresh_connection(&connection).await
    }

    fn needs_refresh(&self, connection: &connection::Model) -> bool {
        expires_within(
            connection.expires_at.with_timezone(&Utc),
            self.config.token_refresh.expiry_buffer_seconds,
        )
    }

    /// Exchange the refresh token for a new access token and persist it.
    ///
    /// A rejected refresh is terminal: it cannot self-heal without user
    /// interaction, so it is never retried here.
    async fn refresh_connection(
        &self,
        connection: &connection::Model,
    ) -> Result<String, ApiError> {
        let website_id = connection.website_id.as_str();
        let (client_id, client_secret, _) = self.client_credentials()?;
        let (_, refresh_token) = self.connections.decrypt_tokens(connection)?;

        let mut params = HashMap::new();
        params.insert("client_id", client_id);
        params.insert("client_secret", client_secret);
        params.insert("refresh_token", refresh_token.as_str());
        params.insert("grant_type", "refresh_token");

        let response = self
            .http
            .post(&self.config.google_token_url)
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                counter!("token_refresh_failure_total").increment(1);
                ErrorCode::ProviderError
                    .with_message(format!("Token refresh request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                website_id = %website_id,
                status = status.as_u16(),
                "Token refresh rejected, re-authorization required"
            );
            counter!("token_refresh_failure_total").increment(1);
            return Err(ErrorCode::ReauthorizationRequired.with_message(format!(
                "Token refresh failed with status {}: {}",
                status,
                truncate(&body, 200)
            )));
        }

        let tokens: TokenEndpointResponse = response.json().await.map_err(|e| {
            ErrorCode::ProviderError.with_message(format!("Failed to parse refresh response: {}", e))
        })?;

        let access_token = tokens.access_token.ok_or_else(|| {
            ErrorCode::ProviderError.with_message("Refresh response is missing the access token")
        })?;
        let expires_in = tokens.expires_in.unwrap_or(3600);
        let expires_at = Utc::now() + Duration::seconds(expires_in);

        self.connections
            .update_tokens(
                website_id,
                &access_token,
                tokens.refresh_token.as_deref(),
                expires_at,
            )
            .await?;

        counter!("token_refresh_success_total").increment(1);
        tracing::info!(
            website_id = %website_id,
            expires_at = %expires_at,
            rotated_refresh_token = tokens.refresh_token.is_some(),
            "Access token refreshed"
        );

        Ok(access_token)
    }

    async fn fetch_user_email(&self, access_token: &str) -> Result<String, String> {
        let response = self
            .http
            .get(&self.config.google_userinfo_url)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await
            .map_err(|e| format!("userinfo request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!(
                "userinfo request failed with status {}",
                response.status()
            ));
        }

        let userinfo: GoogleUserinfo = response
            .json()
            .await
            .map_err(|e| format!("failed to parse userinfo response: {}", e))?;

        Ok(userinfo.email)
    }
}

/// Split the space-delimited scope string Google returns; fall back to the
/// requested set when the field is absent.
fn parse_scope_list(scope: Option<&str>) -> Vec<String> {
    match scope {
        Some(value) if !value.trim().is_empty() => value
            .split_whitespace()
            .map(|s| s.to_string())
            .collect(),
        _ => OAUTH_SCOPES.iter().map(|s| s.to_string()).collect(),
    }
}

fn truncate(body: &str, max_chars: usize) -> String {
    if body.chars().count() > max_chars {
        let truncated: String = body.chars().take(max_chars).collect();
        format!("{}...", truncated)
    } else {
        body.to_string()
    }
}

/// Expiry comparison used by `ensure_fresh_access_token`, exposed for tests
pub fn expires_within(expires_at: DateTime<Utc>, buffer_seconds: u64) -> bool {
    expires_at - Utc::now() <= Duration::seconds(buffer_seconds as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_string_is_split_on_whitespace() {
        let scopes = parse_scope_list(Some(
            "https://www.googleapis.com/auth/webmasters.readonly https://www.googleapis.com/auth/userinfo.email",
        ));
        assert_eq!(scopes.len(), 2);
        assert!(scopes[0].contains("webmasters.readonly"));
    }

    #[test]
    fn missing_scope_falls_back_to_requested_set() {
        assert_eq!(parse_scope_list(None).len(), OAUTH_SCOPES.len());
        assert_eq!(parse_scope_list(Some("  ")).len(), OAUTH_SCOPES.len());
    }

    #[test]
    fn expiry_buffer_comparison() {
        assert!(expires_within(Utc::now() + Duration::seconds(60), 300));
        assert!(expires_within(Utc::now() - Duration::seconds(60), 300));
        assert!(!expires_within(Utc::now() + Duration::seconds(600), 300));
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = "x".repeat(500);
        let result = truncate(&body, 200);
        assert_eq!(result.chars().count(), 203);
        assert!(result.ends_with("..."));
    }
}
