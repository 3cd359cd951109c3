//! Widget registry: the canonical, persisted widget collection.
//!
//! Mutations apply to the in-memory model, then write the whole state
//! through the injected `StateStore` port. Pollers never hold a second
//! copy of truth; they only keep the id/url/interval they need to fetch.

use crate::types::{DashboardState, Position, Size, Theme, Widget, WidgetConfig, WidgetType};
use crate::types::ChartType;
use crate::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Version stamp written into exported configurations
pub const EXPORT_FORMAT_VERSION: &str = "1.0.0";

/// Persistence port for the dashboard state.
///
/// `load` rehydrates the whole state once on startup; `save` writes it
/// after every mutating registry operation.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<Option<DashboardState>>;
    fn save(&self, state: &DashboardState) -> Result<()>;
}

/// Volatile store for tests and throwaway dashboards.
#[derive(Default)]
pub struct InMemoryStateStore {
    state: Mutex<Option<DashboardState>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently saved state, if any.
    pub fn saved(&self) -> Option<DashboardState> {
        self.state.lock().ok().and_then(|guard| guard.clone())
    }
}

impl StateStore for InMemoryStateStore {
    fn load(&self) -> Result<Option<DashboardState>> {
        Ok(self.state.lock().ok().and_then(|guard| guard.clone()))
    }

    fn save(&self, state: &DashboardState) -> Result<()> {
        if let Ok(mut guard) = self.state.lock() {
            *guard = Some(state.clone());
        }
        Ok(())
    }
}

/// Local on-device store: one JSON document at a fixed path.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Default file name, the durable analogue of the dashboard's storage key.
    pub const DEFAULT_FILE: &'static str = "finboard-dashboard.json";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<Option<DashboardState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)?;
        let state = serde_json::from_str(&raw)?;
        Ok(Some(state))
    }

    fn save(&self, state: &DashboardState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let raw = serde_json::to_string_pretty(state)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

static WIDGET_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Issue a process-unique widget id: millisecond timestamp plus a
/// monotonically increasing suffix. Uniqueness across restarts is not
/// needed; import replaces the collection wholesale.
fn generate_widget_id() -> String {
    let seq = WIDGET_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("w{:x}-{:x}", Utc::now().timestamp_millis(), seq)
}

/// Fields the caller supplies when creating a widget. The registry assigns
/// the id, default geometry, and the first `lastUpdated` stamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetDraft {
    pub name: String,
    #[serde(rename = "type")]
    pub widget_type: WidgetType,
    pub api_url: String,
    pub refresh_interval: u64,
    pub selected_fields: Vec<String>,
    #[serde(default)]
    pub display_field: Option<String>,
    #[serde(default)]
    pub chart_type: Option<ChartType>,
    #[serde(default)]
    pub config: Option<WidgetConfig>,
}

/// Partial widget update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct WidgetPatch {
    pub name: Option<String>,
    pub widget_type: Option<WidgetType>,
    pub api_url: Option<String>,
    pub refresh_interval: Option<u64>,
    pub selected_fields: Option<Vec<String>>,
    pub display_field: Option<String>,
    pub chart_type: Option<ChartType>,
    pub config: Option<WidgetConfig>,
    pub position: Option<Position>,
    pub size: Option<Size>,
}

fn apply_patch(widget: &mut Widget, patch: &WidgetPatch) {
    if let Some(name) = &patch.name {
        widget.name = name.clone();
    }
    if let Some(widget_type) = patch.widget_type {
        widget.widget_type = widget_type;
    }
    if let Some(api_url) = &patch.api_url {
        widget.api_url = api_url.clone();
    }
    if let Some(refresh_interval) = patch.refresh_interval {
        widget.refresh_interval = refresh_interval;
    }
    if let Some(selected_fields) = &patch.selected_fields {
        widget.selected_fields = selected_fields.clone();
    }
    if let Some(display_field) = &patch.display_field {
        widget.display_field = Some(display_field.clone());
    }
    if let Some(chart_type) = patch.chart_type {
        widget.chart_type = Some(chart_type);
    }
    if let Some(config) = &patch.config {
        widget.config = Some(config.clone());
    }
    if let Some(position) = patch.position {
        widget.position = position;
    }
    if let Some(size) = patch.size {
        widget.size = size;
    }
}

/// Exported configuration: the persisted state plus export metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportedConfiguration {
    widgets: Vec<Widget>,
    layout: Vec<Widget>,
    theme: Theme,
    exported_at: String,
    version: String,
}

/// The widget collection and its operations.
pub struct WidgetRegistry {
    state: DashboardState,
    store: Arc<dyn StateStore>,
    last_error: Option<String>,
}

impl WidgetRegistry {
    /// Create a registry, rehydrating persisted state when the store has any.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        let state = match store.load() {
            Ok(Some(state)) => {
                info!(
                    target: "registry",
                    widgets = state.widgets.len(),
                    "Rehydrated dashboard state"
                );
                state
            }
            Ok(None) => DashboardState::default(),
            Err(e) => {
                warn!(
                    target: "registry",
                    error = %e,
                    "Failed to load persisted state, starting empty"
                );
                DashboardState::default()
            }
        };

        Self {
            state,
            store,
            last_error: None,
        }
    }

    pub fn widgets(&self) -> &[Widget] {
        &self.state.widgets
    }

    pub fn layout(&self) -> &[Widget] {
        &self.state.layout
    }

    pub fn theme(&self) -> Theme {
        self.state.theme
    }

    pub fn get(&self, id: &str) -> Option<&Widget> {
        self.state.widgets.iter().find(|w| w.id == id)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Add a widget, issuing a fresh id. No validation happens here;
    /// field non-emptiness and interval floors are caller preconditions.
    pub fn add(&mut self, draft: WidgetDraft) -> Widget {
        let widget = Widget {
            id: generate_widget_id(),
            name: draft.name,
            widget_type: draft.widget_type,
            api_url: draft.api_url,
            refresh_interval: draft.refresh_interval,
            selected_fields: draft.selected_fields,
            display_field: draft.display_field,
            chart_type: draft.chart_type,
            position: Position::default(),
            size: Size::default(),
            last_updated: Some(Utc::now().to_rfc3339()),
            config: draft.config,
        };

        self.state.widgets.push(widget.clone());
        self.state.layout.push(widget.clone());
        self.persist();

        debug!(target: "registry", id = %widget.id, "Widget added");
        widget
    }

    /// Remove by id; an absent id is a no-op, not an error.
    pub fn remove(&mut self, id: &str) {
        let before = self.state.widgets.len();
        self.state.widgets.retain(|w| w.id != id);
        self.state.layout.retain(|w| w.id != id);
        if self.state.widgets.len() != before {
            debug!(target: "registry", id = %id, "Widget removed");
        }
        self.persist();
    }

    /// Merge a partial patch into the widget and refresh its timestamp.
    /// No-op when the id is absent.
    pub fn update(&mut self, id: &str, patch: &WidgetPatch) {
        let stamp = Utc::now().to_rfc3339();
        let mut touched = false;

        for list in [&mut self.state.widgets, &mut self.state.layout] {
            if let Some(widget) = list.iter_mut().find(|w| w.id == id) {
                apply_patch(widget, patch);
                widget.last_updated = Some(stamp.clone());
                touched = true;
            }
        }

        if touched {
            self.persist();
        }
    }

    /// Replace the ordered collection wholesale (drag-reorder). Callers
    /// must supply the full widget set; nothing is validated here.
    pub fn reorder(&mut self, widgets: Vec<Widget>) {
        self.state.layout = widgets.clone();
        self.state.widgets = widgets;
        self.persist();
    }

    pub fn set_theme(&mut self, theme: Theme) {
        self.state.theme = theme;
        self.persist();
    }

    /// Drop every widget and reset the theme.
    pub fn reset(&mut self) {
        self.state = DashboardState::default();
        self.last_error = None;
        self.persist();
    }

    /// Serialize the full configuration plus export metadata.
    pub fn export_configuration(&self) -> String {
        let config = ExportedConfiguration {
            widgets: self.state.widgets.clone(),
            layout: self.state.layout.clone(),
            theme: self.state.theme,
            exported_at: Utc::now().to_rfc3339(),
            version: EXPORT_FORMAT_VERSION.to_string(),
        };

        match serde_json::to_string_pretty(&config) {
            Ok(json) => json,
            Err(e) => {
                warn!(target: "registry", error = %e, "Failed to serialize configuration");
                "{}".to_string()
            }
        }
    }

    /// Import a previously exported configuration.
    ///
    /// Returns `false` and records a message when the JSON is malformed or
    /// the required `widgets`/`layout` arrays are missing or wrong-typed;
    /// the current state is left untouched in that case. A successful
    /// import replaces the collection wholesale; it never merges.
    pub fn import_configuration(&mut self, config_json: &str) -> bool {
        let parsed: Value = match serde_json::from_str(config_json) {
            Ok(value) => value,
            Err(e) => {
                return self.fail_import(format!("Import failed: {e}"));
            }
        };

        if !parsed.get("widgets").map_or(false, Value::is_array) {
            return self
                .fail_import("Import failed: missing or invalid widgets array".to_string());
        }
        if !parsed.get("layout").map_or(false, Value::is_array) {
            return self.fail_import("Import failed: missing or invalid layout array".to_string());
        }

        let widgets: Vec<Widget> = match serde_json::from_value(parsed["widgets"].clone()) {
            Ok(widgets) => widgets,
            Err(e) => return self.fail_import(format!("Import failed: invalid widget record: {e}")),
        };
        let layout: Vec<Widget> = match serde_json::from_value(parsed["layout"].clone()) {
            Ok(layout) => layout,
            Err(e) => return self.fail_import(format!("Import failed: invalid layout record: {e}")),
        };
        let theme = parsed
            .get("theme")
            .and_then(|t| serde_json::from_value(t.clone()).ok())
            .unwrap_or_default();

        self.state.widgets = widgets;
        self.state.layout = layout;
        self.state.theme = theme;
        self.last_error = None;
        self.persist();

        info!(
            target: "registry",
            widgets = self.state.widgets.len(),
            "Imported dashboard configuration"
        );
        true
    }

    fn fail_import(&mut self, message: String) -> bool {
        warn!(target: "registry", message = %message, "Configuration import rejected");
        self.last_error = Some(message);
        false
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.state) {
            warn!(target: "registry", error = %e, "Failed to persist dashboard state");
        }
    }
}
