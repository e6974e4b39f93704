//! Configuration loading for the Analytics Connector.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `ANALYTICS_`, producing a typed [`AppConfig`]. Secrets are carried on the
//! config value and injected into the components that need them at
//! construction; nothing reads the environment ambiently after startup.

use std::{env, net::SocketAddr, path::PathBuf};

use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Application configuration derived from `ANALYTICS_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    /// Shared secret authenticating internal service callers. Absence makes
    /// the Service-Identity verifier fail closed at request time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_shared_secret: Option<String>,
    /// 32-byte AES-256-GCM key for token storage, base64 in the environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_key: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_redirect_uri: Option<String>,
    /// Google consent screen base (overridable for tests)
    #[serde(default = "default_google_auth_url")]
    pub google_auth_url: String,
    /// Google OAuth token endpoint (overridable for tests)
    #[serde(default = "default_google_token_url")]
    pub google_token_url: String,
    /// Google userinfo endpoint used for email enrichment
    #[serde(default = "default_google_userinfo_url")]
    pub google_userinfo_url: String,
    /// Search Console API base (overridable for tests)
    #[serde(default = "default_search_console_api_base")]
    pub search_console_api_base: String,
    /// GA4 Data API base (overridable for tests)
    #[serde(default = "default_ga4_api_base")]
    pub ga4_api_base: String,
    /// Where to send the browser after a completed grant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_grant_redirect: Option<String>,
    /// Bounded timeout applied to every outbound provider call
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub token_refresh: TokenRefreshConfig,
}

/// Retry policy configuration for outbound provider calls.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RetryConfig {
    /// Maximum attempts per provider call, first try included (default: 4)
    ///
    /// Environment variable: `ANALYTICS_RETRY_MAX_ATTEMPTS`
    #[serde(default = "default_retry_max_attempts")]
    #[schema(example = 4)]
    pub max_attempts: u32,

    /// Starting backoff delay in milliseconds (default: 500)
    ///
    /// Subsequent attempts use exponential backoff: base_delay_ms * 2^(attempt - 1).
    ///
    /// Environment variable: `ANALYTICS_RETRY_BASE_DELAY_MS`
    #[serde(default = "default_retry_base_delay_ms")]
    #[schema(example = 500)]
    pub base_delay_ms: u64,

    /// Upper bound for a single backoff delay in milliseconds (default: 8000)
    ///
    /// Environment variable: `ANALYTICS_RETRY_MAX_DELAY_MS`
    #[serde(default = "default_retry_max_delay_ms")]
    #[schema(example = 8000)]
    pub max_delay_ms: u64,

    /// Random variation applied to each delay (default: 0.25, range 0.0-1.0)
    ///
    /// Keeps tenants sharing a provider quota from retrying in lockstep.
    ///
    /// Environment variable: `ANALYTICS_RETRY_JITTER_FACTOR`
    #[serde(default = "default_retry_jitter_factor")]
    #[schema(example = 0.25, minimum = 0.0, maximum = 1.0)]
    pub jitter_factor: f64,
}

impl RetryConfig {
    /// Validate retry configuration bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 || self.max_attempts > 10 {
            return Err(ConfigError::InvalidRetryMaxAttempts {
                value: self.max_attempts,
            });
        }

        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::InvalidRetryBounds {
                base: self.base_delay_ms,
                max: self.max_delay_ms,
            });
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::InvalidRetryJitter {
                value: self.jitter_factor,
            });
        }

        Ok(())
    }
}

/// Token refresh configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TokenRefreshConfig {
    /// Refresh when the access token expires within this window (default: 300)
    ///
    /// Environment variable: `ANALYTICS_TOKEN_REFRESH_EXPIRY_BUFFER_SECONDS`
    #[serde(default = "default_token_expiry_buffer_seconds")]
    pub expiry_buffer_seconds: u64,

    /// Lifetime of the OAuth correlation state token (default: 300)
    ///
    /// Environment variable: `ANALYTICS_TOKEN_REFRESH_STATE_TTL_SECONDS`
    #[serde(default = "default_state_ttl_seconds")]
    pub state_ttl_seconds: u64,
}

impl TokenRefreshConfig {
    /// Validate token refresh configuration bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.expiry_buffer_seconds < 60 || self.expiry_buffer_seconds > 3600 {
            return Err(ConfigError::InvalidTokenExpiryBuffer {
                value: self.expiry_buffer_seconds,
            });
        }

        if self.state_ttl_seconds < 60 || self.state_ttl_seconds > 3600 {
            return Err(ConfigError::InvalidStateTtl {
                value: self.state_ttl_seconds,
            });
        }

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            service_shared_secret: None,
            crypto_key: None,
            google_client_id: None,
            google_client_secret: None,
            google_redirect_uri: None,
            google_auth_url: default_google_auth_url(),
            google_token_url: default_google_token_url(),
            google_userinfo_url: default_google_userinfo_url(),
            search_console_api_base: default_search_console_api_base(),
            ga4_api_base: default_ga4_api_base(),
            post_grant_redirect: None,
            http_timeout_seconds: default_http_timeout_seconds(),
            retry: RetryConfig::default(),
            token_refresh: TokenRefreshConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            base_delay_ms: default_retry_base_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
            jitter_factor: default_retry_jitter_factor(),
        }
    }
}

impl Default for TokenRefreshConfig {
    fn default() -> Self {
        Self {
            expiry_buffer_seconds: default_token_expiry_buffer_seconds(),
            state_ttl_seconds: default_state_ttl_seconds(),
        }
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.service_shared_secret.is_some() {
            config.service_shared_secret = Some("[REDACTED]".to_string());
        }
        if config.crypto_key.is_some() {
            config.crypto_key = Some(b"[REDACTED]".to_vec());
        }
        if config.google_client_id.is_some() {
            config.google_client_id = Some("[REDACTED]".to_string());
        }
        if config.google_client_secret.is_some() {
            config.google_client_secret = Some("[REDACTED]".to_string());
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.crypto_key {
            Some(ref key) if key.len() != 32 => {
                return Err(ConfigError::InvalidCryptoKeyLength { length: key.len() });
            }
            Some(_) => {}
            None => return Err(ConfigError::MissingCryptoKey),
        }

        // Outside local/test the service cannot run without its secrets.
        if !matches!(self.profile.as_str(), "local" | "test") {
            if self
                .service_shared_secret
                .as_deref()
                .is_none_or(|s| s.is_empty())
            {
                return Err(ConfigError::MissingServiceSharedSecret);
            }
            if self.google_client_id.is_none() {
                return Err(ConfigError::MissingGoogleClientId);
            }
            if self.google_client_secret.is_none() {
                return Err(ConfigError::MissingGoogleClientSecret);
            }
            if self.google_redirect_uri.is_none() {
                return Err(ConfigError::MissingGoogleRedirectUri);
            }
        }

        if self.http_timeout_seconds == 0 {
            return Err(ConfigError::InvalidHttpTimeout {
                value: self.http_timeout_seconds,
            });
        }

        self.retry.validate()?;
        self.token_refresh.validate()?;

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "postgresql://localhost:5432/analytics_connector".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_google_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".to_string()
}

fn default_google_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_google_userinfo_url() -> String {
    "https://www.googleapis.com/oauth2/v2/userinfo".to_string()
}

fn default_search_console_api_base() -> String {
    "https://www.googleapis.com/webmasters/v3".to_string()
}

fn default_ga4_api_base() -> String {
    "https://analyticsdata.googleapis.com/v1beta".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_retry_max_attempts() -> u32 {
    4
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_retry_max_delay_ms() -> u64 {
    8000
}

fn default_retry_jitter_factor() -> f64 {
    0.25
}

fn default_token_expiry_buffer_seconds() -> u64 {
    300 // 5 minutes
}

fn default_state_ttl_seconds() -> u64 {
    300 // 5 minutes
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("service shared secret is missing; set ANALYTICS_SERVICE_SHARED_SECRET")]
    MissingServiceSharedSecret,
    #[error("crypto key is missing; set ANALYTICS_CRYPTO_KEY environment variable")]
    MissingCryptoKey,
    #[error("crypto key is invalid base64: {error}")]
    InvalidCryptoKeyBase64 { error: String },
    #[error("crypto key must decode to exactly 32 bytes, got {length} bytes")]
    InvalidCryptoKeyLength { length: usize },
    #[error("Google client ID is missing; set ANALYTICS_GOOGLE_CLIENT_ID environment variable")]
    MissingGoogleClientId,
    #[error(
        "Google client secret is missing; set ANALYTICS_GOOGLE_CLIENT_SECRET environment variable"
    )]
    MissingGoogleClientSecret,
    #[error(
        "Google redirect URI is missing; set ANALYTICS_GOOGLE_REDIRECT_URI environment variable"
    )]
    MissingGoogleRedirectUri,
    #[error("http timeout must be positive, got {value}")]
    InvalidHttpTimeout { value: u64 },
    #[error("retry max attempts must be between 1 and 10, got {value}")]
    InvalidRetryMaxAttempts { value: u32 },
    #[error("retry base delay ({base}ms) cannot be greater than max delay ({max}ms)")]
    InvalidRetryBounds { base: u64, max: u64 },
    #[error("retry jitter factor must be between 0.0 and 1.0, got {value}")]
    InvalidRetryJitter { value: f64 },
    #[error("token expiry buffer must be between 60 and 3600 seconds, got {value}")]
    InvalidTokenExpiryBuffer { value: u64 },
    #[error("state token TTL must be between 60 and 3600 seconds, got {value}")]
    InvalidStateTtl { value: u64 },
}

/// Loads configuration using layered `.env` files and `ANALYTICS_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads configuration from `.env`, `.env.<profile>` and the process
    /// environment, later layers winning.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut layered = std::collections::BTreeMap::new();

        self.load_env_file(&self.base_dir.join(".env"), &mut layered)?;

        let profile = env::var("ANALYTICS_PROFILE")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| layered.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.load_env_file(&self.base_dir.join(format!(".env.{}", profile)), &mut layered)?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix("ANALYTICS_") {
                layered.insert(stripped.to_string(), value);
            }
        }
        layered.insert("PROFILE".to_string(), profile);

        Self::build(layered)
    }

    fn load_env_file(
        &self,
        path: &PathBuf,
        layered: &mut std::collections::BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        if !path.exists() {
            return Ok(());
        }

        let iter = dotenvy::from_path_iter(path).map_err(|source| ConfigError::EnvFile {
            path: path.clone(),
            source,
        })?;

        for item in iter {
            let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                path: path.clone(),
                source,
            })?;
            if let Some(stripped) = key.strip_prefix("ANALYTICS_") {
                layered.insert(stripped.to_string(), value);
            }
        }

        Ok(())
    }

    fn build(
        mut layered: std::collections::BTreeMap<String, String>,
    ) -> Result<AppConfig, ConfigError> {
        let mut take = |key: &str| layered.remove(key).filter(|v| !v.is_empty());

        let crypto_key = match take("CRYPTO_KEY") {
            Some(encoded) => Some(general_purpose::STANDARD.decode(encoded.trim()).map_err(
                |e| ConfigError::InvalidCryptoKeyBase64 {
                    error: e.to_string(),
                },
            )?),
            None => None,
        };

        let config = AppConfig {
            profile: take("PROFILE").unwrap_or_else(default_profile),
            api_bind_addr: take("API_BIND_ADDR").unwrap_or_else(default_api_bind_addr),
            log_level: take("LOG_LEVEL").unwrap_or_else(default_log_level),
            log_format: take("LOG_FORMAT").unwrap_or_else(default_log_format),
            database_url: take("DATABASE_URL").unwrap_or_else(default_database_url),
            db_max_connections: take("DB_MAX_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_db_max_connections),
            db_acquire_timeout_ms: take("DB_ACQUIRE_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_db_acquire_timeout_ms),
            service_shared_secret: take("SERVICE_SHARED_SECRET"),
            crypto_key,
            google_client_id: take("GOOGLE_CLIENT_ID"),
            google_client_secret: take("GOOGLE_CLIENT_SECRET"),
            google_redirect_uri: take("GOOGLE_REDIRECT_URI"),
            google_auth_url: take("GOOGLE_AUTH_URL").unwrap_or_else(default_google_auth_url),
            google_token_url: take("GOOGLE_TOKEN_URL").unwrap_or_else(default_google_token_url),
            google_userinfo_url: take("GOOGLE_USERINFO_URL")
                .unwrap_or_else(default_google_userinfo_url),
            search_console_api_base: take("SEARCH_CONSOLE_API_BASE")
                .unwrap_or_else(default_search_console_api_base),
            ga4_api_base: take("GA4_API_BASE").unwrap_or_else(default_ga4_api_base),
            post_grant_redirect: take("POST_GRANT_REDIRECT"),
            http_timeout_seconds: take("HTTP_TIMEOUT_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_http_timeout_seconds),
            retry: RetryConfig {
                max_attempts: take("RETRY_MAX_ATTEMPTS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(default_retry_max_attempts),
                base_delay_ms: take("RETRY_BASE_DELAY_MS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(default_retry_base_delay_ms),
                max_delay_ms: take("RETRY_MAX_DELAY_MS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(default_retry_max_delay_ms),
                jitter_factor: take("RETRY_JITTER_FACTOR")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(default_retry_jitter_factor),
            },
            token_refresh: TokenRefreshConfig {
                expiry_buffer_seconds: take("TOKEN_REFRESH_EXPIRY_BUFFER_SECONDS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(default_token_expiry_buffer_seconds),
                state_ttl_seconds: take("TOKEN_REFRESH_STATE_TTL_SECONDS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(default_state_ttl_seconds),
            },
        };

        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_key() -> AppConfig {
        AppConfig {
            crypto_key: Some(vec![0u8; 32]),
            ..Default::default()
        }
    }

    #[test]
    fn default_config_validates_in_local_profile() {
        let config = config_with_key();
        assert_eq!(config.profile, "local");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_crypto_key_rejected() {
        let config = AppConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCryptoKey)
        ));
    }

    #[test]
    fn short_crypto_key_rejected() {
        let config = AppConfig {
            crypto_key: Some(vec![0u8; 16]),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidCryptoKeyLength { length: 16 })
        ));
    }

    #[test]
    fn production_profile_requires_secrets() {
        let config = AppConfig {
            profile: "production".to_string(),
            crypto_key: Some(vec![0u8; 32]),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingServiceSharedSecret)
        ));

        let config = AppConfig {
            profile: "production".to_string(),
            crypto_key: Some(vec![0u8; 32]),
            service_shared_secret: Some("secret".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingGoogleClientId)
        ));
    }

    #[test]
    fn retry_bounds_validated() {
        let mut config = config_with_key();
        config.retry.base_delay_ms = 10_000;
        config.retry.max_delay_ms = 1_000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRetryBounds { .. })
        ));

        let mut config = config_with_key();
        config.retry.jitter_factor = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRetryJitter { .. })
        ));

        let mut config = config_with_key();
        config.retry.max_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRetryMaxAttempts { .. })
        ));
    }

    #[test]
    fn expiry_buffer_bounds_validated() {
        let mut config = config_with_key();
        config.token_refresh.expiry_buffer_seconds = 10;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTokenExpiryBuffer { .. })
        ));
    }

    #[test]
    fn redacted_json_hides_secrets() {
        let config = AppConfig {
            service_shared_secret: Some("super-secret".to_string()),
            crypto_key: Some(vec![0u8; 32]),
            google_client_secret: Some("client-secret".to_string()),
            ..Default::default()
        };

        let json = config.redacted_json().expect("serializes");
        assert!(!json.contains("super-secret"));
        assert!(!json.contains("client-secret"));
        assert!(json.contains("[REDACTED]"));
    }

    #[test]
    fn loader_builds_from_layered_map() {
        let mut layered = std::collections::BTreeMap::new();
        layered.insert("PROFILE".to_string(), "test".to_string());
        layered.insert("API_BIND_ADDR".to_string(), "127.0.0.1:9999".to_string());
        layered.insert("RETRY_MAX_ATTEMPTS".to_string(), "2".to_string());
        layered.insert(
            "SERVICE_SHARED_SECRET".to_string(),
            "shh".to_string(),
        );

        let config = ConfigLoader::build(layered).expect("builds");
        assert_eq!(config.profile, "test");
        assert_eq!(config.api_bind_addr, "127.0.0.1:9999");
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.service_shared_secret.as_deref(), Some("shh"));
        // Untouched values fall back to defaults
        assert_eq!(config.retry.base_delay_ms, 500);
    }

    #[test]
    fn loader_rejects_bad_crypto_key_base64() {
        let mut layered = std::collections::BTreeMap::new();
        layered.insert("CRYPTO_KEY".to_string(), "!!not-base64!!".to_string());

        assert!(matches!(
            ConfigLoader::build(layered),
            Err(ConfigError::InvalidCryptoKeyBase64 { .. })
        ));
    }
}
