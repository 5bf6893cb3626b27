//! Log types
//!
//! Log entries as broadcast to clients and persisted by the store.

use serde::{Deserialize, Serialize};

/// Source tag stamped on every entry produced by this process
pub const SERVER_SOURCE: &str = "server";

/// A single log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: String,
    pub message: String,
    pub source: String,
    /// Epoch milliseconds
    pub timestamp: u64,
}

impl LogRecord {
    /// Create an entry stamped with the current time
    pub fn new(level: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            message: message.into(),
            source: SERVER_SOURCE.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis().max(0) as u64,
        }
    }
}
