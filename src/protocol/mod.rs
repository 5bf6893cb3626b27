//! Request/response protocol
//!
//! Every inbound request is routed by name to a [`Handler`]. Whatever the
//! handler returns is wrapped in an [`Envelope`] carrying the request id.

pub mod handlers;

use crate::metrics::ScrapeError;
use crate::storage::StoreError;
use crate::system::clock::Clock;
use crate::types::json::is_truthy;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Error details in a failed response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

/// Response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    /// Epoch milliseconds
    pub timestamp: u64,
    pub request_id: Value,
}

impl Envelope {
    pub fn ok(data: Value, request_id: Value, timestamp: u64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp,
            request_id,
        }
    }

    pub fn error(message: impl Into<String>, request_id: Value, timestamp: u64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody {
                message: message.into(),
            }),
            timestamp,
            request_id,
        }
    }
}

/// The request's own `requestId` when truthy, otherwise the current time in ms
pub fn resolve_request_id(request: &Value, clock: &dyn Clock) -> Value {
    match request.get("requestId") {
        Some(id) if is_truthy(id) => id.clone(),
        _ => Value::from(clock.now_millis()),
    }
}

/// Handler errors; the display text becomes `error.message`
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Scrape(#[from] ScrapeError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Handler trait - one per request name
#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, request: Value) -> Result<Value, HandlerError>;
}

/// Handlers by request name
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn Handler>>,
    clock: Arc<dyn Clock>,
}

impl HandlerRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            handlers: DashMap::new(),
            clock,
        }
    }

    pub fn register(&self, handler: Arc<dyn Handler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).map(|h| h.clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn count(&self) -> usize {
        self.handlers.len()
    }

    /// Run the handler for `name` and wrap its outcome
    pub async fn dispatch(&self, name: &str, request: Value) -> Envelope {
        let request_id = resolve_request_id(&request, self.clock.as_ref());

        let Some(handler) = self.get(name) else {
            tracing::warn!("Unknown request: {}", name);
            return Envelope::error(
                format!("Unknown request: {}", name),
                request_id,
                self.clock.now_millis(),
            );
        };

        match handler.handle(request).await {
            Ok(data) => Envelope::ok(data, request_id, self.clock.now_millis()),
            Err(e) => {
                tracing::warn!("{} failed: {}", name, e);
                Envelope::error(e.to_string(), request_id, self.clock.now_millis())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::clock::tests::ManualClock;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        fn name(&self) -> &str {
            "test:echo"
        }

        async fn handle(&self, request: Value) -> Result<Value, HandlerError> {
            match request.get("fail").and_then(Value::as_str) {
                Some(message) => Err(HandlerError::Validation(message.to_string())),
                None => Ok(json!({ "echo": request })),
            }
        }
    }

    fn registry() -> HandlerRegistry {
        let registry = HandlerRegistry::new(Arc::new(ManualClock::at(1_700_000_000_000)));
        registry.register(Arc::new(Echo));
        registry
    }

    #[test]
    fn test_truthy_request_id_is_echoed() {
        let clock = ManualClock::at(42);
        assert_eq!(resolve_request_id(&json!({"requestId": 7}), &clock), json!(7));
        assert_eq!(resolve_request_id(&json!({"requestId": "abc"}), &clock), json!("abc"));
    }

    #[test]
    fn test_falsy_request_id_uses_clock() {
        let clock = ManualClock::at(42);
        for request in [
            json!({}),
            json!({"requestId": null}),
            json!({"requestId": 0}),
            json!({"requestId": false}),
            json!({"requestId": ""}),
            json!(null),
        ] {
            assert_eq!(resolve_request_id(&request, &clock), json!(42), "{}", request);
        }
    }

    #[tokio::test]
    async fn test_dispatch_success_envelope() {
        let envelope = registry().dispatch("test:echo", json!({"requestId": 5, "x": 1})).await;
        assert!(envelope.success);
        assert_eq!(envelope.request_id, json!(5));
        assert_eq!(envelope.timestamp, 1_700_000_000_000);
        assert_eq!(envelope.data.expect("data")["echo"]["x"], 1);
        assert!(envelope.error.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_error_envelope() {
        let envelope = registry().dispatch("test:echo", json!({"fail": "nope"})).await;
        assert!(!envelope.success);
        assert_eq!(envelope.error.map(|e| e.message), Some("nope".to_string()));
        assert_eq!(envelope.request_id, json!(1_700_000_000_000u64));
        assert!(envelope.data.is_none());
    }

    #[tokio::test]
    async fn test_unknown_request() {
        let envelope = registry().dispatch("nope:missing", json!({"requestId": 9})).await;
        assert!(!envelope.success);
        assert_eq!(
            envelope.error.map(|e| e.message),
            Some("Unknown request: nope:missing".to_string())
        );
        assert_eq!(envelope.request_id, json!(9));
    }

    #[test]
    fn test_envelope_wire_shape() {
        let ok = serde_json::to_value(Envelope::ok(json!({"a": 1}), json!(3), 10)).expect("json");
        assert_eq!(ok, json!({"success": true, "data": {"a": 1}, "timestamp": 10, "requestId": 3}));

        let err = serde_json::to_value(Envelope::error("bad", json!(3), 10)).expect("json");
        assert_eq!(
            err,
            json!({"success": false, "error": {"message": "bad"}, "timestamp": 10, "requestId": 3})
        );
    }

    #[test]
    fn test_store_error_message_passes_through() {
        let err = HandlerError::from(StoreError::Backend("database is locked".to_string()));
        assert_eq!(err.to_string(), "database is locked");
    }
}
