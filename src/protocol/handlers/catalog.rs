//! Model catalog: `models:list`, `models:get`, `models:create`,
//! `models:update`, `models:delete` and `models:cleanup`
//!
//! Changes are pushed to every client as `models:created`, `models:updated`
//! and `models:deleted`.

use crate::discovery::ModelDiscoveryService;
use crate::logging::Broadcaster;
use crate::protocol::{Handler, HandlerError};
use crate::storage::{Store, StoreError};
use crate::system::clock::Clock;
use crate::types::model::{CatalogModel, DiscoveredModel};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

pub const MODEL_CREATED_EVENT: &str = "models:created";
pub const MODEL_UPDATED_EVENT: &str = "models:updated";
pub const MODEL_DELETED_EVENT: &str = "models:deleted";

fn now_secs(clock: &dyn Clock) -> u64 {
    clock.now_millis() / 1000
}

fn model_id(request: &Value) -> Result<&str, HandlerError> {
    request
        .get("modelId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| HandlerError::Validation("Model id is required".to_string()))
}

fn not_found() -> HandlerError {
    HandlerError::Failed("Not found".to_string())
}

/// Scan totals
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Files that were not in the catalog yet
    pub scanned: usize,
    /// Known files whose metadata changed
    pub updated: usize,
}

/// Record scanned files in the catalog, matching existing entries by path
pub fn upsert_discovered(
    store: &dyn Store,
    discovered: &[DiscoveredModel],
    now_secs: u64,
) -> Result<ScanOutcome, StoreError> {
    let existing = store.list_models()?;
    let mut outcome = ScanOutcome::default();

    for model in discovered {
        let known = existing
            .iter()
            .find(|entry| entry.model_path.as_deref() == Some(model.path.as_str()));
        match known {
            None => {
                let entry = CatalogModel::from_discovered(model, Uuid::new_v4().to_string(), now_secs);
                tracing::debug!("Cataloging {} as {}", model.path, entry.id);
                store.save_model(&entry)?;
                outcome.scanned += 1;
            }
            Some(entry) => {
                let mut entry = entry.clone();
                if entry.refresh_from(model) {
                    entry.updated_at = now_secs;
                    store.save_model(&entry)?;
                    outcome.updated += 1;
                }
            }
        }
    }

    Ok(outcome)
}

pub struct ModelsList {
    store: Arc<dyn Store>,
}

impl ModelsList {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Handler for ModelsList {
    fn name(&self) -> &str {
        "models:list"
    }

    async fn handle(&self, _request: Value) -> Result<Value, HandlerError> {
        let models = self.store.list_models()?;
        tracing::debug!("Listing {} catalog models", models.len());
        Ok(json!({ "models": models }))
    }
}

pub struct ModelsGet {
    store: Arc<dyn Store>,
}

impl ModelsGet {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Handler for ModelsGet {
    fn name(&self) -> &str {
        "models:get"
    }

    async fn handle(&self, request: Value) -> Result<Value, HandlerError> {
        let model = self.store.get_model(model_id(&request)?)?.ok_or_else(not_found)?;
        Ok(json!({ "model": model }))
    }
}

/// Adds `model` to the catalog; a missing `id` gets a fresh one
pub struct ModelsCreate {
    store: Arc<dyn Store>,
    broadcaster: Arc<dyn Broadcaster>,
    clock: Arc<dyn Clock>,
}

impl ModelsCreate {
    pub fn new(store: Arc<dyn Store>, broadcaster: Arc<dyn Broadcaster>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            broadcaster,
            clock,
        }
    }
}

#[async_trait]
impl Handler for ModelsCreate {
    fn name(&self) -> &str {
        "models:create"
    }

    async fn handle(&self, request: Value) -> Result<Value, HandlerError> {
        let fields = request.get("model").cloned().unwrap_or_else(|| json!({}));
        let mut model: CatalogModel = serde_json::from_value(fields)?;
        if model.name.is_empty() {
            return Err(HandlerError::Validation("Model name is required".to_string()));
        }

        let now = now_secs(self.clock.as_ref());
        if model.id.is_empty() {
            model.id = Uuid::new_v4().to_string();
        }
        if model.created_at == 0 {
            model.created_at = now;
        }
        model.updated_at = now;

        self.store.save_model(&model)?;
        tracing::info!("Model created: {} ({})", model.name, model.id);
        self.broadcaster.emit(MODEL_CREATED_EVENT, json!({ "model": model }));
        Ok(json!({ "model": model }))
    }
}

/// Applies `updates` to the entry named by `modelId`
pub struct ModelsUpdate {
    store: Arc<dyn Store>,
    broadcaster: Arc<dyn Broadcaster>,
    clock: Arc<dyn Clock>,
}

impl ModelsUpdate {
    pub fn new(store: Arc<dyn Store>, broadcaster: Arc<dyn Broadcaster>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            broadcaster,
            clock,
        }
    }
}

#[async_trait]
impl Handler for ModelsUpdate {
    fn name(&self) -> &str {
        "models:update"
    }

    async fn handle(&self, request: Value) -> Result<Value, HandlerError> {
        let id = model_id(&request)?;
        let empty = Map::new();
        let updates = request
            .get("updates")
            .and_then(Value::as_object)
            .unwrap_or(&empty);

        let current = self.store.get_model(id)?.ok_or_else(not_found)?;
        let mut model = current
            .with_updates(updates)?
            .ok_or_else(|| HandlerError::Validation("No updatable fields".to_string()))?;
        model.updated_at = now_secs(self.clock.as_ref());

        self.store.save_model(&model)?;
        self.broadcaster.emit(MODEL_UPDATED_EVENT, json!({ "model": model }));
        Ok(json!({ "model": model }))
    }
}

pub struct ModelsDelete {
    store: Arc<dyn Store>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl ModelsDelete {
    pub fn new(store: Arc<dyn Store>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self { store, broadcaster }
    }
}

#[async_trait]
impl Handler for ModelsDelete {
    fn name(&self) -> &str {
        "models:delete"
    }

    async fn handle(&self, request: Value) -> Result<Value, HandlerError> {
        let id = model_id(&request)?;
        if self.store.delete_model(id)? {
            tracing::info!("Model deleted: {}", id);
            self.broadcaster.emit(MODEL_DELETED_EVENT, json!({ "modelId": id }));
        }
        Ok(json!({ "deletedId": id }))
    }
}

/// Drops entries whose file is gone or is not a usable model
pub struct ModelsCleanup {
    store: Arc<dyn Store>,
    discovery: Arc<ModelDiscoveryService>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl ModelsCleanup {
    pub fn new(
        store: Arc<dyn Store>,
        discovery: Arc<ModelDiscoveryService>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            store,
            discovery,
            broadcaster,
        }
    }
}

#[async_trait]
impl Handler for ModelsCleanup {
    fn name(&self) -> &str {
        "models:cleanup"
    }

    async fn handle(&self, _request: Value) -> Result<Value, HandlerError> {
        let mut deleted = 0;
        for model in self.store.list_models()? {
            let keep = match model.model_path.as_deref() {
                Some(path) if !path.is_empty() => self.discovery.is_valid_model_file(Path::new(path)).await,
                _ => false,
            };
            if keep {
                continue;
            }

            tracing::info!("Removing {} from the catalog", model.name);
            if self.store.delete_model(&model.id)? {
                self.broadcaster.emit(MODEL_DELETED_EVENT, json!({ "modelId": model.id }));
                deleted += 1;
            }
        }

        Ok(json!({ "deletedCount": deleted }))
    }
}
