//! HTTP fetch collaborator.
//!
//! The engine never talks to the network directly; everything goes through
//! the `JsonFetcher` seam so the cache and pollers can be exercised with
//! scripted responses. `HttpJsonClient` is the production implementation:
//! GET the endpoint, decode the JSON body, retry transient failures
//! (429 / 5xx / network) with exponential backoff.

use crate::{FinboardError, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for the HTTP JSON client
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
    /// User agent string
    pub user_agent: String,
    /// Retries after the first attempt, for transient failures only
    pub max_retries: u32,
    /// Base delay for exponential backoff in milliseconds
    pub base_delay_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            user_agent: "finboard/0.1".to_string(),
            max_retries: 2,
            base_delay_ms: 1_000,
        }
    }
}

impl FetchConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            timeout_ms: std::env::var("FINBOARD_FETCH_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.timeout_ms),
            user_agent: std::env::var("FINBOARD_USER_AGENT")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.user_agent),
            max_retries: std::env::var("FINBOARD_FETCH_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_retries),
            base_delay_ms: std::env::var("FINBOARD_FETCH_BASE_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.base_delay_ms),
        }
    }
}

/// Network fetch seam: takes a target URL, returns the parsed JSON body or
/// an error describing the non-2xx status / network failure / bad body.
#[async_trait]
pub trait JsonFetcher: Send + Sync {
    async fn fetch_json(&self, url: &str) -> Result<Value>;
}

/// Production fetcher backed by reqwest
pub struct HttpJsonClient {
    config: FetchConfig,
    http: Client,
}

impl HttpJsonClient {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| FinboardError::FetchError(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(FetchConfig::from_env())
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.config.base_delay_ms.saturating_mul(1u64 << attempt))
    }
}

/// `Retry-After` header in whole seconds, when the server sent one
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl JsonFetcher for HttpJsonClient {
    async fn fetch_json(&self, url: &str) -> Result<Value> {
        let mut last_error = FinboardError::FetchError(format!("No response from {url}"));

        for attempt in 0..=self.config.max_retries {
            debug!(target: "client", url = %url, attempt = attempt + 1, "Fetching JSON endpoint");

            let response = match self
                .http
                .get(url)
                .header("accept", "application/json")
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(target: "client", url = %url, error = %e, "Request failed");
                    last_error = FinboardError::FetchError(format!("Request failed: {e}"));
                    if attempt < self.config.max_retries {
                        tokio::time::sleep(self.backoff(attempt)).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                // Honor Retry-After when present, otherwise back off
                let delay = retry_after(&response).unwrap_or_else(|| self.backoff(attempt));
                last_error = FinboardError::FetchError(format!("HTTP error! status: {status}"));
                if attempt < self.config.max_retries {
                    warn!(
                        target: "client",
                        url = %url,
                        delay_ms = delay.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                break;
            }

            // Other 4xx are not retryable
            if status.is_client_error() {
                warn!(target: "client", url = %url, status = %status, "Endpoint rejected request");
                return Err(FinboardError::FetchError(format!(
                    "HTTP error! status: {status}"
                )));
            }

            if !status.is_success() {
                last_error = FinboardError::FetchError(format!("HTTP error! status: {status}"));
                if attempt < self.config.max_retries {
                    warn!(target: "client", url = %url, status = %status, "Server error, retrying");
                    tokio::time::sleep(self.backoff(attempt)).await;
                    continue;
                }
                break;
            }

            return response.json::<Value>().await.map_err(|e| {
                warn!(target: "client", url = %url, error = %e, "Failed to parse JSON body");
                FinboardError::FetchError(format!("Failed to parse JSON body: {e}"))
            });
        }

        Err(last_error)
    }
}
