//! File-backed store
//!
//! Configuration, metadata and the model catalog are written to a JSON file
//! on every change.
//! Metrics and logs live in bounded in-memory ring buffers.

use crate::storage::{Store, StoreError};
use crate::types::config::ServerConfig;
use crate::types::log::LogRecord;
use crate::types::metrics::SystemMetricsRecord;
use crate::types::model::CatalogModel;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Oldest metrics are dropped past this many records
pub const MAX_METRICS: usize = 10_000;
/// Oldest logs are dropped past this many entries
pub const MAX_LOGS: usize = 1_000;

/// What goes to disk
#[derive(Debug, Default, Serialize, Deserialize)]
struct Persisted {
    #[serde(default)]
    config: Option<Value>,
    #[serde(default)]
    meta: Map<String, Value>,
    /// Insertion order
    #[serde(default)]
    models: Vec<CatalogModel>,
}

#[derive(Debug, Default)]
struct State {
    persisted: Persisted,
    metrics: VecDeque<SystemMetricsRecord>,
    logs: VecDeque<LogRecord>,
}

pub struct LocalStore {
    path: Option<PathBuf>,
    state: Mutex<State>,
}

impl LocalStore {
    /// Store that never touches the disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(State::default()),
        }
    }

    /// Open the store file at `path`, starting empty if it does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let persisted = if path.exists() {
            let json = fs::read_to_string(&path)?;
            serde_json::from_str(&json)?
        } else {
            tracing::info!("Store file {} not found, starting empty", path.display());
            Persisted::default()
        };

        Ok(Self {
            path: Some(path),
            state: Mutex::new(State {
                persisted,
                ..Default::default()
            }),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Write persisted state through a temp file so a crash never leaves half a file
    fn flush(&self, persisted: &Persisted) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(persisted)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, max: usize) {
    queue.push_back(item);
    while queue.len() > max {
        queue.pop_front();
    }
}

impl Store for LocalStore {
    fn get_config(&self) -> Result<Value, StoreError> {
        let state = self.lock();
        Ok(ServerConfig::merged_with(state.persisted.config.as_ref()))
    }

    fn save_config(&self, config: &Value) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.persisted.config = Some(config.clone());
        self.flush(&state.persisted)
    }

    fn get_meta(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.lock().persisted.meta.get(key).cloned())
    }

    fn set_meta(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.persisted.meta.insert(key.to_string(), value.clone());
        self.flush(&state.persisted)
    }

    fn list_models(&self) -> Result<Vec<CatalogModel>, StoreError> {
        let mut models: Vec<CatalogModel> = self.lock().persisted.models.iter().rev().cloned().collect();
        // Stable, so equal timestamps stay newest-inserted first
        models.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(models)
    }

    fn get_model(&self, id: &str) -> Result<Option<CatalogModel>, StoreError> {
        Ok(self.lock().persisted.models.iter().find(|m| m.id == id).cloned())
    }

    fn save_model(&self, model: &CatalogModel) -> Result<(), StoreError> {
        let mut state = self.lock();
        let models = &mut state.persisted.models;
        match models.iter_mut().find(|m| m.id == model.id) {
            Some(existing) => *existing = model.clone(),
            None => models.push(model.clone()),
        }
        self.flush(&state.persisted)
    }

    fn delete_model(&self, id: &str) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let before = state.persisted.models.len();
        state.persisted.models.retain(|m| m.id != id);
        if state.persisted.models.len() == before {
            return Ok(false);
        }
        self.flush(&state.persisted)?;
        Ok(true)
    }

    fn get_latest_metrics(&self) -> Result<Option<SystemMetricsRecord>, StoreError> {
        Ok(self.lock().metrics.back().cloned())
    }

    fn get_metrics_history(&self, limit: usize) -> Result<Vec<SystemMetricsRecord>, StoreError> {
        Ok(self.lock().metrics.iter().rev().take(limit).cloned().collect())
    }

    fn save_metrics(&self, record: &SystemMetricsRecord) -> Result<(), StoreError> {
        push_bounded(&mut self.lock().metrics, record.clone(), MAX_METRICS);
        Ok(())
    }

    fn get_logs(&self, limit: usize) -> Result<Vec<LogRecord>, StoreError> {
        Ok(self.lock().logs.iter().rev().take(limit).cloned().collect())
    }

    fn add_log(&self, record: &LogRecord) -> Result<(), StoreError> {
        push_bounded(&mut self.lock().logs, record.clone(), MAX_LOGS);
        Ok(())
    }

    fn clear_logs(&self) -> Result<usize, StoreError> {
        let mut state = self.lock();
        let count = state.logs.len();
        state.logs.clear();
        Ok(count)
    }
}
