//! Engine façade: registry, cache, pollers, and tester wired together.
//!
//! Widget operations here keep the poll tasks in sync with registry
//! mutations, so callers never juggle the two by hand.

use crate::cache::{CacheConfig, FetchCache};
use crate::client::{FetchConfig, HttpJsonClient, JsonFetcher};
use crate::poller::{PollerConfig, PollerRuntime};
use crate::registry::{JsonFileStore, StateStore, WidgetDraft, WidgetPatch, WidgetRegistry};
use crate::tester::ConnectionTester;
use crate::types::{ApiResponse, Theme, Widget};
use crate::{FinboardError, Result};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Top-level engine configuration
#[derive(Debug, Clone, Default)]
pub struct DashboardConfig {
    pub fetch: FetchConfig,
    pub cache: CacheConfig,
    pub poller: PollerConfig,
}

impl DashboardConfig {
    pub fn from_env() -> Self {
        Self {
            fetch: FetchConfig::from_env(),
            cache: CacheConfig::from_env(),
            poller: PollerConfig::from_env(),
        }
    }
}

/// The dashboard data engine.
pub struct Dashboard {
    pub registry: Arc<RwLock<WidgetRegistry>>,
    pub cache: Arc<FetchCache>,
    pub pollers: Arc<PollerRuntime>,
    pub tester: ConnectionTester,
}

impl Dashboard {
    /// Build an engine from explicit collaborators (store and fetcher are
    /// injected so tests can swap in fakes).
    pub fn new(
        config: DashboardConfig,
        store: Arc<dyn StateStore>,
        fetcher: Arc<dyn JsonFetcher>,
    ) -> Self {
        let cache = Arc::new(FetchCache::new(fetcher, config.cache));
        let pollers = Arc::new(PollerRuntime::new(Arc::clone(&cache), config.poller));
        let registry = Arc::new(RwLock::new(WidgetRegistry::new(store)));
        let tester = ConnectionTester::new(Arc::clone(&cache));

        Self {
            registry,
            cache,
            pollers,
            tester,
        }
    }

    /// Build with the production HTTP client and a local JSON file store.
    pub fn open(config: DashboardConfig, state_path: impl Into<PathBuf>) -> Result<Self> {
        let fetcher: Arc<dyn JsonFetcher> = Arc::new(HttpJsonClient::new(config.fetch.clone())?);
        let store: Arc<dyn StateStore> = Arc::new(JsonFileStore::new(state_path));
        Ok(Self::new(config, store, fetcher))
    }

    /// Start a poller for every persisted widget. Misconfigured widgets
    /// surface their error through the poller data and do not block the
    /// rest.
    pub async fn start(&self) {
        let registry = self.registry.read().await;
        for widget in registry.widgets() {
            if let Err(e) = self.pollers.spawn(widget) {
                warn!(
                    target: "dashboard",
                    widget_id = %widget.id,
                    error = %e,
                    "Widget poller not started"
                );
            }
        }
        info!(
            target: "dashboard",
            widgets = registry.widgets().len(),
            "Dashboard started"
        );
    }

    pub async fn shutdown(&self) {
        self.pollers.stop_all();
        info!(target: "dashboard", "Dashboard shut down");
    }

    /// Create a widget and start its poller.
    pub async fn add_widget(&self, draft: WidgetDraft) -> Widget {
        let widget = self.registry.write().await.add(draft);
        if let Err(e) = self.pollers.spawn(&widget) {
            warn!(
                target: "dashboard",
                widget_id = %widget.id,
                error = %e,
                "Widget created without a running poller"
            );
        }
        widget
    }

    /// Stop the widget's poller, then drop it from the registry.
    pub async fn remove_widget(&self, id: &str) {
        self.pollers.stop(id);
        self.registry.write().await.remove(id);
    }

    /// Apply a partial update. The poller restarts only when its fetch
    /// inputs (url or interval) changed; a pure presentation patch leaves
    /// the running task alone.
    pub async fn update_widget(&self, id: &str, patch: WidgetPatch) {
        let mut registry = self.registry.write().await;
        registry.update(id, &patch);
        let widget = registry.get(id).cloned();
        drop(registry);

        if let Some(widget) = widget {
            if let Err(e) = self.pollers.restart_if_changed(&widget) {
                warn!(
                    target: "dashboard",
                    widget_id = %id,
                    error = %e,
                    "Poller not restarted after update"
                );
            }
        }
    }

    /// Reorder the collection; poll tasks are unaffected (same id set).
    pub async fn reorder_widgets(&self, widgets: Vec<Widget>) {
        self.registry.write().await.reorder(widgets);
    }

    pub async fn set_theme(&self, theme: Theme) {
        self.registry.write().await.set_theme(theme);
    }

    /// Wipe everything: pollers, cache, and the persisted collection.
    pub async fn reset(&self) {
        self.pollers.stop_all();
        self.cache.clear(None);
        self.registry.write().await.reset();
    }

    pub async fn export_configuration(&self) -> String {
        self.registry.read().await.export_configuration()
    }

    /// Destructive import. On success every poller is rebuilt against the
    /// imported collection; on failure nothing changes and the running
    /// pollers keep going.
    pub async fn import_configuration(&self, config_json: &str) -> bool {
        let mut registry = self.registry.write().await;
        if !registry.import_configuration(config_json) {
            return false;
        }

        self.pollers.stop_all();
        let widgets: Vec<Widget> = registry.widgets().to_vec();
        drop(registry);

        for widget in &widgets {
            if let Err(e) = self.pollers.spawn(widget) {
                warn!(
                    target: "dashboard",
                    widget_id = %widget.id,
                    error = %e,
                    "Imported widget poller not started"
                );
            }
        }
        true
    }

    /// One-shot endpoint validation for the creation flow.
    pub async fn test_connection(&self, url: &str) -> ApiResponse {
        self.tester.test(url).await
    }

    /// Manual refresh of one widget's endpoint, bypassing the cache. The
    /// refreshed payload lands in the shared cache entry, so other widgets
    /// on the same URL see it too.
    pub async fn refresh_widget(&self, id: &str) -> Result<Value> {
        let url = self
            .registry
            .read()
            .await
            .get(id)
            .map(|w| w.api_url.clone());

        match url {
            Some(url) => self.cache.get(&url, false).await,
            None => Err(FinboardError::RegistryError(format!(
                "Widget {id} not found"
            ))),
        }
    }
}
