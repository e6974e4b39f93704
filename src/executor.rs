//! # Authenticated Call Executor
//!
//! Wraps every outbound provider call: obtains a fresh access token for the
//! website, runs the call under an explicit retry policy, and normalizes any
//! failure into the internal error taxonomy. The token refresh step itself is
//! never retried here; only the provider call is.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time::sleep;

use crate::config::RetryConfig;
use crate::error::ApiError;
use crate::oauth::GrantManager;
use crate::providers::{Provider, ProviderCallError};

/// Explicit retry policy for outbound provider calls.
///
/// Each delay is recomputed from the attempt count alone; no cumulative state
/// is carried between attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_factor: config.jitter_factor,
        }
    }

    /// Delay before the attempt following `failed_attempts` failures:
    /// exponential from the base, capped, with jitter so tenants sharing a
    /// quota do not retry in lockstep.
    pub fn backoff_delay(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(16);
        let exponential = self.base_delay.as_millis().saturating_mul(1u128 << exponent);
        let capped = exponential.min(self.max_delay.as_millis()) as u64;

        if self.jitter_factor <= 0.0 {
            return Duration::from_millis(capped);
        }

        let spread = 1.0 - self.jitter_factor + rand::random::<f64>() * 2.0 * self.jitter_factor;
        Duration::from_millis((capped as f64 * spread) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Run `operation` under `policy`, retrying only failures the provider
/// boundary classified as retryable (429, 5xx, transient transport errors).
pub async fn execute_with_policy<T, F, Fut>(
    policy: &RetryPolicy,
    provider: Provider,
    operation: F,
) -> Result<T, ProviderCallError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ProviderCallError>>,
{
    let mut attempt = 1u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !error.is_retryable() || attempt >= policy.max_attempts {
                    return Err(error);
                }

                let delay = error
                    .retry_after()
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| policy.backoff_delay(attempt))
                    .min(policy.max_delay);

                tracing::warn!(
                    provider = provider.as_str(),
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Provider call failed, retrying"
                );
                counter!("provider_call_retries_total", "provider" => provider.as_str())
                    .increment(1);

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Executes provider calls on behalf of a website tenant.
pub struct CallExecutor {
    grants: Arc<GrantManager>,
    policy: RetryPolicy,
}

impl CallExecutor {
    pub fn new(grants: Arc<GrantManager>, policy: RetryPolicy) -> Self {
        Self { grants, policy }
    }

    /// The retry policy in effect, for callers composing their own calls
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Obtain a valid access token for the website and run `call` with it
    /// under the retry policy. Exhausted retries surface as `RATE_LIMITED`
    /// (repeated 429) or `PROVIDER_ERROR` (repeated 5xx), never as the raw
    /// transport error.
    pub async fn execute<T, F, Fut>(
        &self,
        website_id: &str,
        provider: Provider,
        call: F,
    ) -> Result<T, ApiError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, ProviderCallError>>,
    {
        let access_token = self.grants.ensure_fresh_access_token(website_id).await?;

        execute_with_policy(&self.policy, provider, || call(access_token.clone()))
            .await
            .map_err(|error| {
                counter!("provider_call_failure_total", "provider" => provider.as_str())
                    .increment(1);
                tracing::warn!(
                    website_id = %website_id,
                    provider = provider.as_str(),
                    error = %error,
                    "Provider call failed after retries"
                );
                error.normalize()
            })
    }
}
