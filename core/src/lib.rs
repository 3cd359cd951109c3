// Finboard Core Library
// Data engine for a configurable JSON dashboard

pub mod cache;
pub mod client;
pub mod dashboard;
pub mod fields;
pub mod poller;
pub mod registry;
pub mod tester;
pub mod types;

// Export core types
pub use cache::{CacheConfig, CacheStats, FetchCache};
pub use client::{FetchConfig, HttpJsonClient, JsonFetcher};
pub use dashboard::{Dashboard, DashboardConfig};
pub use fields::{extract_fields, get_nested_value};
pub use poller::{PollerConfig, PollerRuntime, WidgetData, WidgetUpdate};
pub use registry::{
    InMemoryStateStore, JsonFileStore, StateStore, WidgetDraft, WidgetPatch, WidgetRegistry,
};
pub use tester::ConnectionTester;
pub use types::{
    ApiField, ApiResponse, ChartType, DashboardState, FetchStatus, FieldType, Position, Size,
    Theme, Widget, WidgetConfig, WidgetType,
};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FinboardError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Fetch error: {0}")]
    FetchError(String),

    #[error("Registry error: {0}")]
    RegistryError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
pub type Result<T> = std::result::Result<T, FinboardError>;
