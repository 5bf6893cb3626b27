//! `config:get` and `config:update`

use crate::metrics::MetricsScraper;
use crate::protocol::{Handler, HandlerError};
use crate::storage::Store;
use crate::types::json::is_truthy;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct ConfigGet {
    store: Arc<dyn Store>,
}

impl ConfigGet {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Handler for ConfigGet {
    fn name(&self) -> &str {
        "config:get"
    }

    async fn handle(&self, _request: Value) -> Result<Value, HandlerError> {
        let config = self.store.get_config()?;
        Ok(json!({ "config": config }))
    }
}

/// Persists `config`, or `{}` when it is missing or falsy.
///
/// A saved `port` also moves the metrics scraper to that backend.
pub struct ConfigUpdate {
    store: Arc<dyn Store>,
    scraper: Option<Arc<MetricsScraper>>,
}

impl ConfigUpdate {
    pub fn new(store: Arc<dyn Store>, scraper: Option<Arc<MetricsScraper>>) -> Self {
        Self { store, scraper }
    }
}

#[async_trait]
impl Handler for ConfigUpdate {
    fn name(&self) -> &str {
        "config:update"
    }

    async fn handle(&self, request: Value) -> Result<Value, HandlerError> {
        let config = request
            .get("config")
            .filter(|v| is_truthy(v))
            .cloned()
            .unwrap_or_else(|| json!({}));

        self.store.save_config(&config)?;

        let port = config
            .get("port")
            .and_then(Value::as_u64)
            .and_then(|port| u16::try_from(port).ok());
        if let (Some(scraper), Some(port)) = (&self.scraper, port) {
            scraper.update_port(port);
        }

        Ok(json!({ "config": config }))
    }
}
