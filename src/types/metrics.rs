//! Metrics types
//!
//! Backend scrape results, system metric records and GPU devices.

use serde::{Deserialize, Serialize};

/// One scrape of a backend's metrics endpoint.
///
/// Every field stays at 0 when its source line is missing from the scraped text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Prompt processing throughput (tokens/s)
    pub prompt_tokens_per_second: f64,
    /// Generation throughput (tokens/s)
    pub predicted_tokens_per_second: f64,
    pub prompt_tokens_total: u64,
    pub predicted_tokens_total: u64,
    pub prompt_seconds_total: f64,
    pub predicted_seconds_total: f64,
    pub decode_total: u64,
    pub busy_slots_per_decode: f64,
    pub tokens_max: u64,
    /// Requests currently being processed
    pub active_requests: u32,
    /// Requests deferred while all slots are busy
    pub queue_size: u32,
    pub vram_total_bytes: u64,
    pub vram_used_bytes: u64,
    pub context_size: u32,
    pub parallel_slots: u32,
    pub thread_count: u32,
    pub total_requests: u64,
}

/// One row of the store's system metrics time series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetricsRecord {
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub memory_usage: f64,
    #[serde(default)]
    pub swap_usage: f64,
    #[serde(default)]
    pub disk_usage: f64,
    #[serde(default)]
    pub gpu_usage: f64,
    #[serde(default)]
    pub gpu_memory_used: f64,
    #[serde(default)]
    pub gpu_memory_total: f64,
    #[serde(default)]
    pub uptime: f64,
    /// Capture time in epoch milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

/// A GPU as reported by the telemetry source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuDevice {
    pub name: String,
    #[serde(default)]
    pub usage_percent: f64,
    #[serde(default)]
    pub memory_used_bytes: u64,
    #[serde(default)]
    pub memory_total_bytes: u64,
}
