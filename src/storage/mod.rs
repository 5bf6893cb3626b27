//! Persistent storage
//!
//! The [`Store`] trait is what request handlers read and write through.
//! [`LocalStore`] keeps configuration on disk and time series in memory.

pub mod local;
pub mod settings;

use crate::types::log::LogRecord;
use crate::types::metrics::SystemMetricsRecord;
use crate::types::model::CatalogModel;
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;

pub use local::LocalStore;

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Could not determine data directory")]
    NoDataDir,
    #[error("{0}")]
    Backend(String),
}

/// Backing store for configuration, metadata, the model catalog, metrics and logs.
///
/// Listing methods return newest entries first.
pub trait Store: Send + Sync {
    /// Backend configuration with defaults filled in for unsaved keys
    fn get_config(&self) -> Result<Value, StoreError>;
    fn save_config(&self, config: &Value) -> Result<(), StoreError>;

    fn get_meta(&self, key: &str) -> Result<Option<Value>, StoreError>;
    fn set_meta(&self, key: &str, value: &Value) -> Result<(), StoreError>;

    /// Catalog entries, most recently created first
    fn list_models(&self) -> Result<Vec<CatalogModel>, StoreError>;
    fn get_model(&self, id: &str) -> Result<Option<CatalogModel>, StoreError>;
    /// Insert, or replace the entry with the same id
    fn save_model(&self, model: &CatalogModel) -> Result<(), StoreError>;
    /// Returns false if no entry had this id
    fn delete_model(&self, id: &str) -> Result<bool, StoreError>;

    fn get_latest_metrics(&self) -> Result<Option<SystemMetricsRecord>, StoreError>;
    fn get_metrics_history(&self, limit: usize) -> Result<Vec<SystemMetricsRecord>, StoreError>;
    fn save_metrics(&self, record: &SystemMetricsRecord) -> Result<(), StoreError>;

    fn get_logs(&self, limit: usize) -> Result<Vec<LogRecord>, StoreError>;
    fn add_log(&self, record: &LogRecord) -> Result<(), StoreError>;
    /// Remove every log entry, returning how many were removed
    fn clear_logs(&self) -> Result<usize, StoreError>;
}

/// Platform data directory for this application
pub fn get_data_dir() -> Result<PathBuf, StoreError> {
    directories::ProjectDirs::from("dev", "llamadash", "llamadash")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(StoreError::NoDataDir)
}
