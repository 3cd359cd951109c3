//! End-to-end engine tests through the `Dashboard` façade: widget
//! lifecycle against a scripted exchange-rates endpoint, poller wiring,
//! connection testing, and import/export.

use async_trait::async_trait;
use finboard_core::{
    get_nested_value, Dashboard, DashboardConfig, FinboardError, InMemoryStateStore, JsonFetcher,
    Result, StateStore, WidgetDraft, WidgetPatch, WidgetRegistry, WidgetType,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const RATES_URL: &str = "https://api.example.test/rates";

/// Serves a fixed exchange-rates document and counts network calls.
struct RatesFetcher {
    calls: AtomicU64,
}

impl RatesFetcher {
    fn new() -> Self {
        Self {
            calls: AtomicU64::new(0),
        }
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JsonFetcher for RatesFetcher {
    async fn fetch_json(&self, _url: &str) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({
            "base": "USD",
            "rates": { "EUR": 0.92, "GBP": 0.79 }
        }))
    }
}

struct FailingFetcher;

#[async_trait]
impl JsonFetcher for FailingFetcher {
    async fn fetch_json(&self, _url: &str) -> Result<Value> {
        Err(FinboardError::FetchError(
            "HTTP error! status: 500 Internal Server Error".to_string(),
        ))
    }
}

fn rates_draft(interval: u64) -> WidgetDraft {
    WidgetDraft {
        name: "USD rates".to_string(),
        widget_type: WidgetType::Table,
        api_url: RATES_URL.to_string(),
        refresh_interval: interval,
        selected_fields: vec!["rates.EUR".to_string(), "rates.GBP".to_string()],
        display_field: None,
        chart_type: None,
        config: None,
    }
}

fn dashboard(fetcher: Arc<dyn JsonFetcher>) -> Dashboard {
    Dashboard::new(
        DashboardConfig::default(),
        Arc::new(InMemoryStateStore::new()),
        fetcher,
    )
}

// =============================================================================
// Widget lifecycle against a rates endpoint
// =============================================================================

#[tokio::test(start_paused = true)]
async fn rates_widget_polls_and_exposes_selected_fields() {
    let fetcher = Arc::new(RatesFetcher::new());
    let dashboard = dashboard(Arc::clone(&fetcher) as Arc<dyn JsonFetcher>);
    let mut updates = dashboard.pollers.subscribe();

    let widget = dashboard.add_widget(rates_draft(30)).await;
    let update = updates.recv().await.unwrap();
    assert!(update.success);
    assert_eq!(update.widget_id, widget.id);
    assert_eq!(fetcher.calls(), 1);

    // The selected paths resolve against the fetched payload.
    let data = dashboard.pollers.data(&widget.id).unwrap();
    let payload = data.payload.unwrap();
    assert_eq!(
        get_nested_value(&payload, "rates.EUR"),
        Some(&json!(0.92))
    );
    assert_eq!(
        get_nested_value(&payload, "rates.GBP"),
        Some(&json!(0.79))
    );

    // A cached read within the TTL serves the same payload with no
    // second network call.
    let cached = dashboard.cache.get(RATES_URL, true).await.unwrap();
    assert_eq!(get_nested_value(&cached, "base"), Some(&json!("USD")));
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn remove_widget_stops_its_poller() {
    let dashboard = dashboard(Arc::new(RatesFetcher::new()));
    let mut updates = dashboard.pollers.subscribe();

    let widget = dashboard.add_widget(rates_draft(30)).await;
    updates.recv().await.unwrap();
    assert!(dashboard.pollers.is_polling(&widget.id));

    dashboard.remove_widget(&widget.id).await;
    assert!(!dashboard.pollers.is_polling(&widget.id));
    assert!(dashboard.registry.read().await.get(&widget.id).is_none());
}

#[tokio::test(start_paused = true)]
async fn presentation_patch_leaves_the_running_poller_alone() {
    let fetcher = Arc::new(RatesFetcher::new());
    let dashboard = dashboard(Arc::clone(&fetcher) as Arc<dyn JsonFetcher>);
    let mut updates = dashboard.pollers.subscribe();

    let widget = dashboard.add_widget(rates_draft(30)).await;
    updates.recv().await.unwrap();
    assert_eq!(fetcher.calls(), 1);

    dashboard
        .update_widget(
            &widget.id,
            WidgetPatch {
                name: Some("EUR and GBP".to_string()),
                selected_fields: Some(vec!["rates.EUR".to_string()]),
                ..WidgetPatch::default()
            },
        )
        .await;
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    // No restart, so no second activation fetch.
    assert_eq!(fetcher.calls(), 1);

    // Changing the source URL does restart the poller.
    dashboard
        .update_widget(
            &widget.id,
            WidgetPatch {
                api_url: Some("https://api.example.test/other".to_string()),
                ..WidgetPatch::default()
            },
        )
        .await;
    updates.recv().await.unwrap();
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn refresh_widget_bypasses_the_cache() {
    let fetcher = Arc::new(RatesFetcher::new());
    let dashboard = dashboard(Arc::clone(&fetcher) as Arc<dyn JsonFetcher>);
    let mut updates = dashboard.pollers.subscribe();

    let widget = dashboard.add_widget(rates_draft(30)).await;
    updates.recv().await.unwrap();
    assert_eq!(fetcher.calls(), 1);

    let payload = dashboard.refresh_widget(&widget.id).await.unwrap();
    assert_eq!(get_nested_value(&payload, "base"), Some(&json!("USD")));
    assert_eq!(fetcher.calls(), 2);

    let err = dashboard.refresh_widget("no-such-widget").await.unwrap_err();
    assert!(matches!(err, FinboardError::RegistryError(_)));
}

// =============================================================================
// Startup and shutdown
// =============================================================================

#[tokio::test(start_paused = true)]
async fn start_spawns_pollers_for_persisted_widgets() {
    let store = Arc::new(InMemoryStateStore::new());
    {
        let mut registry = WidgetRegistry::new(Arc::clone(&store) as Arc<dyn StateStore>);
        registry.add(rates_draft(30));
        // This widget is misconfigured; it must not block the other one.
        registry.add(WidgetDraft {
            api_url: String::new(),
            ..rates_draft(30)
        });
    }

    let dashboard = Dashboard::new(
        DashboardConfig::default(),
        store,
        Arc::new(RatesFetcher::new()),
    );
    dashboard.start().await;

    assert_eq!(dashboard.pollers.active_count(), 1);
    assert_eq!(dashboard.registry.read().await.widgets().len(), 2);

    dashboard.shutdown().await;
    assert_eq!(dashboard.pollers.active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn reset_wipes_pollers_cache_and_collection() {
    let dashboard = dashboard(Arc::new(RatesFetcher::new()));
    let mut updates = dashboard.pollers.subscribe();

    dashboard.add_widget(rates_draft(30)).await;
    updates.recv().await.unwrap();
    assert_eq!(dashboard.pollers.active_count(), 1);
    assert!(!dashboard.cache.is_empty());

    dashboard.reset().await;
    assert_eq!(dashboard.pollers.active_count(), 0);
    assert!(dashboard.cache.is_empty());
    assert!(dashboard.registry.read().await.widgets().is_empty());
}

// =============================================================================
// Connection testing
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_connection_reports_fields_without_touching_the_registry() {
    let dashboard = dashboard(Arc::new(RatesFetcher::new()));

    let response = dashboard.test_connection(RATES_URL).await;
    assert!(response.is_success());
    assert!(response.fields.iter().any(|f| f.path == "rates.EUR"));
    assert!(response.fields.iter().any(|f| f.path == "base"));

    // Purely advisory: nothing was created.
    assert!(dashboard.registry.read().await.widgets().is_empty());
    assert_eq!(dashboard.pollers.active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_connection_rejects_bad_urls_before_any_fetch() {
    let dashboard = dashboard(Arc::new(RatesFetcher::new()));

    let response = dashboard.test_connection("   ").await;
    assert!(!response.is_success());
    assert_eq!(
        response.error.as_deref(),
        Some("Invalid or empty URL provided")
    );

    let response = dashboard.test_connection("not a url").await;
    assert!(!response.is_success());
    assert!(response.error.unwrap().starts_with("Invalid URL:"));
}

#[tokio::test(start_paused = true)]
async fn test_connection_surfaces_fetch_errors_verbatim() {
    let dashboard = dashboard(Arc::new(FailingFetcher));

    let response = dashboard.test_connection(RATES_URL).await;
    assert!(!response.is_success());
    assert!(response
        .error
        .unwrap()
        .contains("HTTP error! status: 500"));
}

// =============================================================================
// Import / export across engines
// =============================================================================

#[tokio::test(start_paused = true)]
async fn import_rebuilds_the_running_pollers() {
    let source = dashboard(Arc::new(RatesFetcher::new()));
    let exported_widget = source.add_widget(rates_draft(30)).await;
    let exported = source.export_configuration().await;

    let target = dashboard(Arc::new(RatesFetcher::new()));
    let mut updates = target.pollers.subscribe();
    let old_widget = target.add_widget(rates_draft(30)).await;
    updates.recv().await.unwrap();

    assert!(target.import_configuration(&exported).await);
    assert!(!target.pollers.is_polling(&old_widget.id));
    assert!(target.pollers.is_polling(&exported_widget.id));
    assert_eq!(target.pollers.active_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_import_leaves_pollers_and_state_untouched() {
    let dashboard = dashboard(Arc::new(RatesFetcher::new()));
    let mut updates = dashboard.pollers.subscribe();
    let widget = dashboard.add_widget(rates_draft(30)).await;
    updates.recv().await.unwrap();

    assert!(!dashboard.import_configuration(r#"{"widgets": {}}"#).await);
    assert!(dashboard.pollers.is_polling(&widget.id));
    assert_eq!(dashboard.registry.read().await.widgets().len(), 1);
    assert!(dashboard
        .registry
        .read()
        .await
        .last_error()
        .unwrap()
        .contains("Import failed"));
}
