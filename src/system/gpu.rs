//! GPU detection and the shared device registry
//!
//! Devices are queried with `nvidia-smi` and published to a registry that
//! handlers read from.

use crate::types::metrics::GpuDevice;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tokio::process::Command;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Last known GPU list.
///
/// Writes replace the whole list, so readers never see a partial update.
#[derive(Debug, Default)]
pub struct GpuRegistry {
    devices: RwLock<Arc<Vec<GpuDevice>>>,
}

impl GpuRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new device list; `None` clears it
    pub fn update(&self, devices: Option<Vec<GpuDevice>>) {
        let devices = Arc::new(devices.unwrap_or_default());
        let mut guard = self.devices.write().unwrap_or_else(|e| e.into_inner());
        *guard = devices;
    }

    /// Store a device list received as JSON.
    ///
    /// Anything other than an array clears the list. Array elements that do not
    /// describe a device are dropped.
    pub fn update_from_value(&self, value: &Value) {
        let devices = match value {
            Value::Array(items) => items
                .iter()
                .filter_map(|item| serde_json::from_value::<GpuDevice>(item.clone()).ok())
                .collect(),
            _ => Vec::new(),
        };
        self.update(Some(devices));
    }

    pub fn list(&self) -> Vec<GpuDevice> {
        self.snapshot().as_ref().clone()
    }

    /// First device, used for the single-GPU summary fields
    pub fn primary(&self) -> Option<GpuDevice> {
        self.snapshot().first().cloned()
    }

    fn snapshot(&self) -> Arc<Vec<GpuDevice>> {
        self.devices.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

// =============================================================================
// nvidia-smi query
// =============================================================================

/// Query all NVIDIA GPUs (empty when nvidia-smi is missing or fails)
pub async fn detect_gpus() -> Vec<GpuDevice> {
    let output = match Command::new("nvidia-smi")
        .args([
            "--query-gpu=index,name,utilization.gpu,memory.used,memory.total",
            "--format=csv,noheader,nounits",
        ])
        .output()
        .await
    {
        Ok(output) => output,
        Err(e) => {
            tracing::debug!("nvidia-smi not available: {}", e);
            return Vec::new();
        }
    };

    if !output.status.success() {
        tracing::debug!("nvidia-smi exited with {}", output.status);
        return Vec::new();
    }

    parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
}

/// Parse `index, name, utilization, used MB, total MB` rows
pub fn parse_nvidia_smi(stdout: &str) -> Vec<GpuDevice> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(parse_nvidia_smi_row)
        .collect()
}

fn parse_nvidia_smi_row(line: &str) -> Option<GpuDevice> {
    let parts: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
    if parts.len() < 5 {
        return None;
    }

    // Names may contain commas; the numeric columns are always last
    let n = parts.len();
    let name = parts[1..n - 3].join(", ");
    let usage_percent = parts[n - 3].parse::<f64>().unwrap_or(0.0);
    let memory_used_mb = parts[n - 2].parse::<u64>().ok()?;
    let memory_total_mb = parts[n - 1].parse::<u64>().ok()?;

    Some(GpuDevice {
        name,
        usage_percent,
        memory_used_bytes: memory_used_mb * BYTES_PER_MB,
        memory_total_bytes: memory_total_mb * BYTES_PER_MB,
    })
}

/// Probe once and publish the result
pub async fn refresh(registry: &GpuRegistry) -> usize {
    let devices = detect_gpus().await;
    let count = devices.len();
    registry.update(Some(devices));
    count
}
