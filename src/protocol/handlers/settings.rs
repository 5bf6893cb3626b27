//! `settings:get` and `settings:update`
//!
//! User settings are one JSON object stored under a fixed meta key.

use crate::logging::Logger;
use crate::protocol::handlers::stringify;
use crate::protocol::{Handler, HandlerError};
use crate::storage::Store;
use crate::types::json::is_truthy;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub const USER_SETTINGS_KEY: &str = "user_settings";

pub struct SettingsGet {
    store: Arc<dyn Store>,
}

impl SettingsGet {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Handler for SettingsGet {
    fn name(&self) -> &str {
        "settings:get"
    }

    async fn handle(&self, _request: Value) -> Result<Value, HandlerError> {
        let settings = self
            .store
            .get_meta(USER_SETTINGS_KEY)?
            .filter(is_truthy)
            .unwrap_or_else(|| json!({}));
        Ok(json!({ "settings": settings }))
    }
}

/// Persists `settings`; a truthy `logLevel` is applied to the logger first
pub struct SettingsUpdate {
    store: Arc<dyn Store>,
    logger: Arc<Logger>,
}

impl SettingsUpdate {
    pub fn new(store: Arc<dyn Store>, logger: Arc<Logger>) -> Self {
        Self { store, logger }
    }
}

#[async_trait]
impl Handler for SettingsUpdate {
    fn name(&self) -> &str {
        "settings:update"
    }

    async fn handle(&self, request: Value) -> Result<Value, HandlerError> {
        let settings = request
            .get("settings")
            .filter(|v| is_truthy(v))
            .cloned()
            .unwrap_or_else(|| json!({}));

        if let Some(level) = settings.get("logLevel").filter(|v| is_truthy(v)) {
            self.logger.set_level(stringify(level));
        }

        self.store.set_meta(USER_SETTINGS_KEY, &settings)?;
        Ok(json!({ "settings": settings }))
    }
}
