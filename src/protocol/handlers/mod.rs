//! Request handlers, one struct per request name

pub mod catalog;
pub mod config;
pub mod logs;
pub mod metrics;
pub mod models;
pub mod settings;
pub mod subscription;

use serde_json::Value;

/// Limit applied when a request carries none
pub const DEFAULT_LIMIT: usize = 100;

/// Read a `limit` field.
///
/// An explicit 0 is kept. Falsy or malformed values fall back to `default`.
pub fn parse_limit(value: Option<&Value>, default: usize) -> usize {
    match value {
        Some(Value::Number(n)) => match n.as_u64() {
            Some(limit) => limit as usize,
            None => match n.as_f64() {
                Some(f) if f >= 0.0 && f.fract() == 0.0 && f.is_finite() => f as usize,
                _ => default,
            },
        },
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

/// Text form of a JSON value; strings are used as-is
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
