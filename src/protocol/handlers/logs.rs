//! `logs:add`, `logs:get` and `logs:clear`

use crate::logging::Logger;
use crate::protocol::handlers::{parse_limit, stringify, DEFAULT_LIMIT};
use crate::protocol::{Handler, HandlerError};
use crate::storage::Store;
use crate::types::json::is_truthy;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

const MISSING_FIELDS: &str = "Missing required fields: level and message";

/// Writes a client-supplied entry through the logger
pub struct LogsAdd {
    logger: Arc<Logger>,
}

impl LogsAdd {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl Handler for LogsAdd {
    fn name(&self) -> &str {
        "logs:add"
    }

    async fn handle(&self, request: Value) -> Result<Value, HandlerError> {
        let data = request.get("data");
        let level = data.and_then(|d| d.get("level"));
        let message = data.and_then(|d| d.get("message"));

        // false and 0 are accepted as messages; only null and "" are missing
        let message = match message {
            Some(Value::Null) | None => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(m) => Some(m),
        };

        let (Some(level), Some(message)) = (level.filter(|l| is_truthy(l)), message) else {
            return Err(HandlerError::Validation(MISSING_FIELDS.to_string()));
        };

        let level = stringify(level);
        let message = stringify(message);
        match level.as_str() {
            "info" => self.logger.info(&message),
            "error" => self.logger.error(&message),
            "warn" => self.logger.warn(&message),
            other => self.logger.log(other, &message),
        }

        Ok(json!({ "added": true }))
    }
}

pub struct LogsGet {
    store: Arc<dyn Store>,
}

impl LogsGet {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Handler for LogsGet {
    fn name(&self) -> &str {
        "logs:get"
    }

    async fn handle(&self, request: Value) -> Result<Value, HandlerError> {
        let limit = parse_limit(request.get("limit"), DEFAULT_LIMIT);
        let logs = self.store.get_logs(limit)?;
        Ok(json!({ "logs": logs }))
    }
}

pub struct LogsClear {
    store: Arc<dyn Store>,
}

impl LogsClear {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Handler for LogsClear {
    fn name(&self) -> &str {
        "logs:clear"
    }

    async fn handle(&self, _request: Value) -> Result<Value, HandlerError> {
        let cleared = self.store.clear_logs()?;
        tracing::info!("Cleared {} log entries", cleared);
        Ok(json!({ "cleared": cleared }))
    }
}
