//! `models:scan`, `models:analyze`, `models:validate` and `models:defaults`
//!
//! The catalog handlers live in [`super::catalog`].

use crate::discovery::{default_parameters, validate_model_config, ModelDiscoveryService};
use crate::logging::Broadcaster;
use crate::protocol::handlers::catalog::upsert_discovered;
use crate::protocol::{Handler, HandlerError};
use crate::storage::Store;
use crate::system::clock::Clock;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn non_empty_str<'a>(value: Option<&'a Value>) -> Option<&'a str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

pub const MODELS_SCANNED_EVENT: &str = "models:scanned";

/// Scans `path`, or the configured models directory when none is given,
/// and records what it finds in the catalog
pub struct ModelsScan {
    discovery: Arc<ModelDiscoveryService>,
    store: Arc<dyn Store>,
    broadcaster: Arc<dyn Broadcaster>,
    clock: Arc<dyn Clock>,
}

impl ModelsScan {
    pub fn new(
        discovery: Arc<ModelDiscoveryService>,
        store: Arc<dyn Store>,
        broadcaster: Arc<dyn Broadcaster>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            discovery,
            store,
            broadcaster,
            clock,
        }
    }
}

#[async_trait]
impl Handler for ModelsScan {
    fn name(&self) -> &str {
        "models:scan"
    }

    async fn handle(&self, request: Value) -> Result<Value, HandlerError> {
        let path = match non_empty_str(request.get("path")) {
            Some(path) => PathBuf::from(path),
            None => {
                let config = self.store.get_config()?;
                non_empty_str(config.get("baseModelsPath"))
                    .map(PathBuf::from)
                    .ok_or_else(|| HandlerError::Validation("Models path is required".to_string()))?
            }
        };
        let max_depth = request
            .get("maxDepth")
            .and_then(Value::as_u64)
            .map(|depth| depth as usize);

        let models = self.discovery.discover_models(&path, max_depth).await;
        let outcome = upsert_discovered(self.store.as_ref(), &models, self.clock.now_millis() / 1000)?;
        let total = self.store.list_models()?.len();
        tracing::info!(
            "Scan of {} found {} models ({} new, {} updated)",
            path.display(),
            models.len(),
            outcome.scanned,
            outcome.updated
        );

        let summary = json!({ "scanned": outcome.scanned, "updated": outcome.updated, "total": total });
        self.broadcaster.emit(MODELS_SCANNED_EVENT, summary.clone());

        Ok(json!({
            "count": models.len(),
            "models": models,
            "scanned": outcome.scanned,
            "updated": outcome.updated,
            "total": total,
        }))
    }
}

pub struct ModelsAnalyze {
    discovery: Arc<ModelDiscoveryService>,
}

impl ModelsAnalyze {
    pub fn new(discovery: Arc<ModelDiscoveryService>) -> Self {
        Self { discovery }
    }
}

#[async_trait]
impl Handler for ModelsAnalyze {
    fn name(&self) -> &str {
        "models:analyze"
    }

    async fn handle(&self, request: Value) -> Result<Value, HandlerError> {
        let path = non_empty_str(request.get("path"))
            .ok_or_else(|| HandlerError::Validation("Model path is required".to_string()))?;

        let header = self
            .discovery
            .analyze(Path::new(path))
            .await
            .ok_or_else(|| HandlerError::Failed("Failed to parse model header".to_string()))?;

        Ok(json!({
            "quantization": header.quantization(),
            "header": header,
        }))
    }
}

pub struct ModelsValidate;

#[async_trait]
impl Handler for ModelsValidate {
    fn name(&self) -> &str {
        "models:validate"
    }

    async fn handle(&self, request: Value) -> Result<Value, HandlerError> {
        let config = request.get("config").cloned().unwrap_or(Value::Null);
        Ok(serde_json::to_value(validate_model_config(&config))?)
    }
}

pub struct ModelsDefaults;

#[async_trait]
impl Handler for ModelsDefaults {
    fn name(&self) -> &str {
        "models:defaults"
    }

    async fn handle(&self, _request: Value) -> Result<Value, HandlerError> {
        Ok(json!({ "parameters": default_parameters() }))
    }
}
