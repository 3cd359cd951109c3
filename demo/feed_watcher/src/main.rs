use finboard_core::{
    get_nested_value, Dashboard, DashboardConfig, WidgetDraft, WidgetType,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

const DEFAULT_FEED_URL: &str = "https://open.er-api.com/v6/latest/USD";
const DEFAULT_STATE_FILE: &str = "finboard-dashboard.json";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logging / tracing
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info,finboard_core=info,feed_watcher=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let feed_url =
        std::env::var("FEED_URL").unwrap_or_else(|_| DEFAULT_FEED_URL.to_string());
    let state_path =
        std::env::var("FINBOARD_STATE_FILE").unwrap_or_else(|_| DEFAULT_STATE_FILE.to_string());

    info!(
        target = "feed_watcher",
        feed_url = %feed_url,
        state_path = %state_path,
        "Starting feed watcher demo"
    );

    let dashboard = Arc::new(Dashboard::open(DashboardConfig::from_env(), &state_path)?);

    // Widgets persisted by a previous run come back as-is; otherwise seed
    // one exchange-rates widget against the configured feed.
    if dashboard.registry.read().await.widgets().is_empty() {
        let widget = dashboard
            .add_widget(WidgetDraft {
                name: "USD exchange rates".to_string(),
                widget_type: WidgetType::Table,
                api_url: feed_url,
                refresh_interval: 30,
                selected_fields: vec![
                    "rates.EUR".to_string(),
                    "rates.GBP".to_string(),
                    "rates.JPY".to_string(),
                ],
                display_field: None,
                chart_type: None,
                config: None,
            })
            .await;
        info!(target = "feed_watcher", widget_id = %widget.id, "Seeded rates widget");
    }
    dashboard.start().await;

    // Log the selected field values on every poll tick.
    let mut updates = dashboard.pollers.subscribe();
    let watcher = Arc::clone(&dashboard);
    let log_task = tokio::spawn(async move {
        while let Ok(update) = updates.recv().await {
            if !update.success {
                warn!(
                    target = "feed_watcher",
                    widget_id = %update.widget_id,
                    error = update.error.as_deref().unwrap_or("unknown"),
                    "Poll tick failed"
                );
                continue;
            }

            let registry = watcher.registry.read().await;
            let Some(widget) = registry.get(&update.widget_id) else {
                continue;
            };
            let Some(data) = watcher.pollers.data(&update.widget_id) else {
                continue;
            };
            let Some(payload) = data.payload else {
                continue;
            };

            for path in &widget.selected_fields {
                match get_nested_value(&payload, path) {
                    Some(value) => {
                        info!(
                            target = "feed_watcher",
                            widget = %widget.name,
                            field = %path,
                            value = %value,
                            "Field updated"
                        );
                    }
                    None => {
                        warn!(
                            target = "feed_watcher",
                            widget = %widget.name,
                            field = %path,
                            "Selected field missing from payload"
                        );
                    }
                }
            }
        }
    });

    info!(target = "feed_watcher", "Watching. Press Ctrl-C to exit");
    signal::ctrl_c().await?;

    log_task.abort();
    dashboard.shutdown().await;
    Ok(())
}
