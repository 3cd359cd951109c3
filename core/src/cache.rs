//! Shared fetch cache keyed by endpoint URL.
//!
//! Widgets that poll the same endpoint share one entry, so a burst of
//! widgets does not become a burst of network calls. An entry is replaced
//! only by a successful fetch; TTL expiry is the sole automatic eviction.

use crate::client::JsonFetcher;
use crate::{FinboardError, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long a cached payload stays valid
pub const DEFAULT_CACHE_TTL_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entry validity window in milliseconds
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: DEFAULT_CACHE_TTL_MS,
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Self {
        Self {
            ttl_ms: std::env::var("FINBOARD_CACHE_TTL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_CACHE_TTL_MS),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Value,
    fetched_at: Instant,
}

/// Cache counters snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub refreshes: u64,
    pub errors: u64,
}

/// TTL-bounded payload cache in front of the network fetcher.
pub struct FetchCache {
    fetcher: Arc<dyn JsonFetcher>,
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    refreshes: AtomicU64,
    errors: AtomicU64,
}

impl FetchCache {
    pub fn new(fetcher: Arc<dyn JsonFetcher>, config: CacheConfig) -> Self {
        Self {
            fetcher,
            entries: DashMap::new(),
            ttl: Duration::from_millis(config.ttl_ms),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            refreshes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Fetch the payload for `url`, serving from cache when allowed.
    ///
    /// `use_cache = true` returns a live entry without touching the
    /// network; an expired or absent entry triggers a fetch. A failed
    /// fetch never falls back to a stale entry. `use_cache = false` always
    /// fetches and overwrites the entry on success.
    ///
    /// Two callers racing on the same expired URL may both fetch; the last
    /// successful write wins. Payloads are whole-value replacements, so
    /// the race cannot produce a torn entry.
    pub async fn get(&self, url: &str, use_cache: bool) -> Result<Value> {
        if url.trim().is_empty() {
            return Err(FinboardError::ConfigError(
                "Invalid or empty URL provided".to_string(),
            ));
        }

        if use_cache {
            if let Some(entry) = self.entries.get(url) {
                if entry.fetched_at.elapsed() < self.ttl {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(target: "cache", url = %url, "Cache hit");
                    return Ok(entry.payload.clone());
                }
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
        }

        match self.fetcher.fetch_json(url).await {
            Ok(payload) => {
                self.refreshes.fetch_add(1, Ordering::Relaxed);
                self.entries.insert(
                    url.to_string(),
                    CacheEntry {
                        payload: payload.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                debug!(target: "cache", url = %url, "Cache entry refreshed");
                Ok(payload)
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(target: "cache", url = %url, error = %e, "Fetch failed");
                Err(e)
            }
        }
    }

    /// Drop one entry, or all of them. The only eviction besides expiry.
    pub fn clear(&self, url: Option<&str>) {
        match url {
            Some(url) => {
                self.entries.remove(url);
            }
            None => self.entries.clear(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
