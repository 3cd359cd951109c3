//! Per-widget polling runtime.
//!
//! One tokio task per mounted widget, keyed by widget id. Each task does
//! an immediate forced fetch on activation, then re-fetches on a
//! fixed-period interval. The runtime keeps the latest payload per widget
//! and broadcasts an update on every settled tick.

use crate::cache::FetchCache;
use crate::types::Widget;
use crate::{FinboardError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Product floor on per-widget refresh intervals, in seconds
pub const DEFAULT_MIN_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Floor applied to widget refresh intervals
    pub min_interval_secs: u64,
    /// Capacity of the update broadcast channel
    pub update_capacity: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: DEFAULT_MIN_INTERVAL_SECS,
            update_capacity: 256,
        }
    }
}

impl PollerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            min_interval_secs: std::env::var("FINBOARD_MIN_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.min_interval_secs),
            update_capacity: defaults.update_capacity,
        }
    }
}

/// Latest fetched state of one widget.
#[derive(Debug, Clone, Default)]
pub struct WidgetData {
    pub payload: Option<Value>,
    pub last_updated: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Broadcast on every settled poll tick (and on configuration errors).
#[derive(Debug, Clone)]
pub struct WidgetUpdate {
    pub widget_id: String,
    pub success: bool,
    pub error: Option<String>,
}

struct PollerHandle {
    task: JoinHandle<()>,
    active: Arc<AtomicBool>,
    api_url: String,
    interval_secs: u64,
}

/// Owns every running poll task, keyed by widget id.
pub struct PollerRuntime {
    cache: Arc<FetchCache>,
    pollers: DashMap<String, PollerHandle>,
    data: Arc<DashMap<String, WidgetData>>,
    update_tx: broadcast::Sender<WidgetUpdate>,
    config: PollerConfig,
}

impl PollerRuntime {
    pub fn new(cache: Arc<FetchCache>, config: PollerConfig) -> Self {
        let (update_tx, _) = broadcast::channel(config.update_capacity);
        Self {
            cache,
            pollers: DashMap::new(),
            data: Arc::new(DashMap::new()),
            update_tx,
            config,
        }
    }

    /// Subscribe to per-tick updates.
    pub fn subscribe(&self) -> broadcast::Receiver<WidgetUpdate> {
        self.update_tx.subscribe()
    }

    /// Latest data for a widget, while it is mounted.
    pub fn data(&self, widget_id: &str) -> Option<WidgetData> {
        self.data.get(widget_id).map(|entry| entry.value().clone())
    }

    pub fn is_polling(&self, widget_id: &str) -> bool {
        self.pollers.contains_key(widget_id)
    }

    pub fn active_count(&self) -> usize {
        self.pollers.len()
    }

    /// Start polling a widget, replacing any existing poller for the id.
    ///
    /// A widget without a source URL gets no task at all: its data entry
    /// carries a persistent configuration error until the widget is
    /// corrected, and the call returns that error.
    pub fn spawn(&self, widget: &Widget) -> Result<()> {
        self.stop(&widget.id);

        if widget.api_url.trim().is_empty() {
            let message = "No API URL configured for this widget".to_string();
            self.data.insert(
                widget.id.clone(),
                WidgetData {
                    payload: None,
                    last_updated: None,
                    error: Some(message.clone()),
                },
            );
            let _ = self.update_tx.send(WidgetUpdate {
                widget_id: widget.id.clone(),
                success: false,
                error: Some(message.clone()),
            });
            warn!(target: "poller", widget_id = %widget.id, "Widget has no API URL, poller not started");
            return Err(FinboardError::ConfigError(message));
        }

        let interval_secs = widget.refresh_interval.max(self.config.min_interval_secs);
        let active = Arc::new(AtomicBool::new(true));

        let task = tokio::spawn(poll_loop(
            widget.id.clone(),
            widget.api_url.clone(),
            interval_secs,
            Arc::clone(&self.cache),
            Arc::clone(&self.data),
            self.update_tx.clone(),
            Arc::clone(&active),
        ));

        self.pollers.insert(
            widget.id.clone(),
            PollerHandle {
                task,
                active,
                api_url: widget.api_url.clone(),
                interval_secs,
            },
        );

        info!(target: "poller", widget_id = %widget.id, interval_secs, "Poller started");
        Ok(())
    }

    /// Restart the widget's poller only when its fetch inputs (url or
    /// effective interval) changed; a missing poller is started fresh.
    pub fn restart_if_changed(&self, widget: &Widget) -> Result<()> {
        let effective = widget.refresh_interval.max(self.config.min_interval_secs);
        let unchanged = self
            .pollers
            .get(&widget.id)
            .map(|handle| handle.api_url == widget.api_url && handle.interval_secs == effective)
            .unwrap_or(false);

        if unchanged {
            return Ok(());
        }
        self.spawn(widget)
    }

    /// Stop a widget's poller and drop its data. A fetch that resolves
    /// after this point is discarded, never applied.
    pub fn stop(&self, widget_id: &str) {
        if let Some((_, handle)) = self.pollers.remove(widget_id) {
            handle.active.store(false, Ordering::SeqCst);
            handle.task.abort();
            info!(target: "poller", widget_id = %widget_id, "Poller stopped");
        }
        self.data.remove(widget_id);
    }

    pub fn stop_all(&self) {
        let ids: Vec<String> = self.pollers.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.stop(&id);
        }
    }
}

async fn poll_loop(
    widget_id: String,
    url: String,
    interval_secs: u64,
    cache: Arc<FetchCache>,
    data: Arc<DashMap<String, WidgetData>>,
    update_tx: broadcast::Sender<WidgetUpdate>,
    active: Arc<AtomicBool>,
) {
    let mut ticker = time::interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // First tick completes immediately: the activation fetch.
        ticker.tick().await;

        // Polling always wants fresh data.
        let result = cache.get(&url, false).await;

        // The poller may have been stopped while the fetch was in flight;
        // a settled result for a torn-down widget must be discarded.
        if !active.load(Ordering::SeqCst) {
            debug!(target: "poller", widget_id = %widget_id, "Discarding result for stopped poller");
            break;
        }

        match result {
            Ok(payload) => {
                let mut entry = data.entry(widget_id.clone()).or_default();
                entry.payload = Some(payload);
                entry.last_updated = Some(Utc::now());
                entry.error = None;
                drop(entry);

                debug!(target: "poller", widget_id = %widget_id, "Poll tick succeeded");
                let _ = update_tx.send(WidgetUpdate {
                    widget_id: widget_id.clone(),
                    success: true,
                    error: None,
                });
            }
            Err(e) => {
                // Keep the last good payload; surface the error alongside it.
                let message = e.to_string();
                let mut entry = data.entry(widget_id.clone()).or_default();
                entry.error = Some(message.clone());
                drop(entry);

                warn!(target: "poller", widget_id = %widget_id, error = %message, "Poll tick failed");
                let _ = update_tx.send(WidgetUpdate {
                    widget_id: widget_id.clone(),
                    success: false,
                    error: Some(message),
                });
            }
        }
    }
}
