//! One-shot endpoint validation for the widget-creation flow.

use crate::cache::FetchCache;
use crate::fields::extract_fields;
use crate::types::ApiResponse;
use std::sync::Arc;
use tracing::debug;

/// Validates an endpoint and reports the fields its payload exposes.
/// Purely advisory: feeds the creation flow, never touches the registry.
pub struct ConnectionTester {
    cache: Arc<FetchCache>,
}

impl ConnectionTester {
    pub fn new(cache: Arc<FetchCache>) -> Self {
        Self { cache }
    }

    /// Fetch the endpoint once, bypassing the cache, and extract its
    /// fields. Failures surface the underlying message verbatim so the
    /// creation form can display it.
    pub async fn test(&self, url: &str) -> ApiResponse {
        if url.trim().is_empty() {
            return ApiResponse::error("Invalid or empty URL provided");
        }
        if reqwest::Url::parse(url).is_err() {
            return ApiResponse::error(format!("Invalid URL: {url}"));
        }

        match self.cache.get(url, false).await {
            Ok(payload) => {
                let fields = extract_fields(&payload, "");
                debug!(
                    target: "tester",
                    url = %url,
                    fields = fields.len(),
                    "Connection test succeeded"
                );
                ApiResponse::success(payload, fields)
            }
            Err(e) => ApiResponse::error(e.to_string()),
        }
    }
}
