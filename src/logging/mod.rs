//! Client-visible log stream
//!
//! [`Logger`] writes formatted lines to a local sink and, once a
//! [`Broadcaster`] is attached, pushes each entry to connected clients.
//! Internal diagnostics go through `tracing` instead.

use crate::storage::Store;
use crate::types::log::{LogRecord, SERVER_SOURCE};
use serde::Serialize;
use serde_json::{json, Value};
use std::io::{self, Write};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;

/// Event name for pushed log entries
pub const LOG_ENTRY_EVENT: &str = "logs:entry";

/// Fan-out of server-initiated events
pub trait Broadcaster: Send + Sync {
    fn emit(&self, event: &str, payload: Value);
}

/// Drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBroadcaster;

impl Broadcaster for NoopBroadcaster {
    fn emit(&self, _event: &str, _payload: Value) {}
}

/// A pushed event as written to the wire
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BroadcastFrame {
    pub event: String,
    pub payload: Value,
}

/// Broadcaster over a tokio broadcast channel; each connection subscribes
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    tx: broadcast::Sender<BroadcastFrame>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastFrame> {
        self.tx.subscribe()
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn emit(&self, event: &str, payload: Value) {
        // No subscribers is not an error
        let _ = self.tx.send(BroadcastFrame {
            event: event.to_string(),
            payload,
        });
    }
}

pub struct Logger {
    broadcaster: RwLock<Arc<dyn Broadcaster>>,
    store: RwLock<Option<Arc<dyn Store>>>,
    level: RwLock<String>,
    sink: Mutex<Box<dyn Write + Send>>,
}

impl Logger {
    /// Logger writing to stdout
    pub fn new() -> Self {
        Self::with_sink(Box::new(io::stdout()))
    }

    pub fn with_sink(sink: Box<dyn Write + Send>) -> Self {
        Self {
            broadcaster: RwLock::new(Arc::new(NoopBroadcaster)),
            store: RwLock::new(None),
            level: RwLock::new("info".to_string()),
            sink: Mutex::new(sink),
        }
    }

    /// Attach the broadcaster, replacing any previous one
    pub fn set_io(&self, broadcaster: Arc<dyn Broadcaster>) {
        *self.broadcaster.write().unwrap_or_else(|e| e.into_inner()) = broadcaster;
    }

    /// Also append every entry to `store`
    pub fn set_store(&self, store: Arc<dyn Store>) {
        *self.store.write().unwrap_or_else(|e| e.into_inner()) = Some(store);
    }

    pub fn set_level(&self, level: impl Into<String>) {
        let level = level.into();
        tracing::debug!("Log level set to {}", level);
        *self.level.write().unwrap_or_else(|e| e.into_inner()) = level;
    }

    pub fn level(&self) -> String {
        self.level.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn log(&self, level: &str, message: &str) {
        let record = LogRecord::new(level, message);

        let line = format!(
            "[{}] [{}] [{}] {}",
            chrono::Local::now().format("%H:%M:%S"),
            level.to_uppercase(),
            SERVER_SOURCE,
            message
        );
        {
            let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = writeln!(sink, "{}", line).and_then(|_| sink.flush()) {
                tracing::warn!("Failed to write log line: {}", e);
            }
        }

        let store = self.store.read().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(store) = store {
            if let Err(e) = store.add_log(&record) {
                tracing::warn!("Failed to persist log entry: {}", e);
            }
        }

        let broadcaster = self.broadcaster.read().unwrap_or_else(|e| e.into_inner()).clone();
        broadcaster.emit(
            LOG_ENTRY_EVENT,
            json!({
                "type": "broadcast",
                "data": { "entry": record },
            }),
        );
    }

    pub fn info(&self, message: &str) {
        self.log("info", message);
    }

    pub fn warn(&self, message: &str) {
        self.log("warn", message);
    }

    pub fn error(&self, message: &str) {
        self.log("error", message);
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}
