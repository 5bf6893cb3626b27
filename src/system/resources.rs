//! System resource sampling
//!
//! Reads CPU, memory, swap and disk figures for the metrics time series.
//! Sources are Linux `/proc` files and `df`; anything unavailable reads as 0.
//! Uptime is this process's own, not the host's.

use crate::system::gpu::GpuRegistry;
use crate::types::metrics::SystemMetricsRecord;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;
use tokio::process::Command;

/// Aggregate CPU jiffies from the first line of `/proc/stat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

/// Memory and swap usage in percent
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemoryUsage {
    pub memory_percent: f64,
    pub swap_percent: f64,
}

pub fn parse_proc_stat(text: &str) -> Option<CpuTimes> {
    let line = text.lines().find(|l| l.starts_with("cpu "))?;
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|v| v.parse().ok())
        .collect();
    if values.len() < 4 {
        return None;
    }
    // idle + iowait
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    Some(CpuTimes {
        idle,
        total: values.iter().sum(),
    })
}

/// Busy share between two readings
pub fn cpu_usage_percent(prev: CpuTimes, next: CpuTimes) -> f64 {
    let total = next.total.saturating_sub(prev.total);
    if total == 0 {
        return 0.0;
    }
    let idle = next.idle.saturating_sub(prev.idle).min(total);
    (total - idle) as f64 / total as f64 * 100.0
}

pub fn parse_meminfo(text: &str) -> MemoryUsage {
    let field = |name: &str| -> Option<u64> {
        text.lines()
            .find(|l| l.starts_with(name) && l[name.len()..].starts_with(':'))
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|v| v.parse().ok())
    };

    let percent = |total: Option<u64>, free: Option<u64>| match (total, free) {
        (Some(total), Some(free)) if total > 0 => {
            total.saturating_sub(free) as f64 / total as f64 * 100.0
        }
        _ => 0.0,
    };

    let available = field("MemAvailable").or_else(|| field("MemFree"));
    MemoryUsage {
        memory_percent: percent(field("MemTotal"), available),
        swap_percent: percent(field("SwapTotal"), field("SwapFree")),
    }
}

/// Capacity column of `df -Pk` output
pub fn parse_df(stdout: &str) -> f64 {
    stdout
        .lines()
        .nth(1)
        .and_then(|line| line.split_whitespace().nth(4))
        .and_then(|capacity| capacity.trim_end_matches('%').parse().ok())
        .unwrap_or(0.0)
}

/// Produces one [`SystemMetricsRecord`] per call.
///
/// CPU usage needs two readings, so the first sample reports 0.
pub struct ResourceSampler {
    disk_path: PathBuf,
    last_cpu: Mutex<Option<CpuTimes>>,
    started: Instant,
}

impl ResourceSampler {
    /// Uptime counts from construction unless [`started_at`](Self::started_at) says otherwise
    pub fn new(disk_path: impl Into<PathBuf>) -> Self {
        Self {
            disk_path: disk_path.into(),
            last_cpu: Mutex::new(None),
            started: Instant::now(),
        }
    }

    /// When the process started
    pub fn started_at(mut self, started: Instant) -> Self {
        self.started = started;
        self
    }

    pub async fn sample(&self, gpus: &GpuRegistry, now_millis: u64) -> SystemMetricsRecord {
        let cpu_usage = match read_proc("/proc/stat").await.as_deref().and_then(parse_proc_stat) {
            Some(next) => self.cpu_delta(next),
            None => 0.0,
        };
        let memory = read_proc("/proc/meminfo")
            .await
            .map(|text| parse_meminfo(&text))
            .unwrap_or_default();
        let uptime = self.started.elapsed().as_secs_f64();
        let disk_usage = self.disk_usage().await;
        let gpu = gpus.primary().unwrap_or_default();

        SystemMetricsRecord {
            cpu_usage,
            memory_usage: memory.memory_percent,
            swap_usage: memory.swap_percent,
            disk_usage,
            gpu_usage: gpu.usage_percent,
            gpu_memory_used: gpu.memory_used_bytes as f64,
            gpu_memory_total: gpu.memory_total_bytes as f64,
            uptime,
            timestamp: Some(now_millis),
        }
    }

    fn cpu_delta(&self, next: CpuTimes) -> f64 {
        let mut last = self.last_cpu.lock().unwrap_or_else(|e| e.into_inner());
        let usage = last.map(|prev| cpu_usage_percent(prev, next)).unwrap_or(0.0);
        *last = Some(next);
        usage
    }

    async fn disk_usage(&self) -> f64 {
        match Command::new("df").arg("-Pk").arg(&self.disk_path).output().await {
            Ok(output) if output.status.success() => parse_df(&String::from_utf8_lossy(&output.stdout)),
            Ok(_) => 0.0,
            Err(e) => {
                tracing::debug!("df not available: {}", e);
                0.0
            }
        }
    }
}

async fn read_proc(path: &str) -> Option<String> {
    tokio::fs::read_to_string(path).await.ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROC_STAT: &str = "cpu  100 0 100 700 100 0 0 0 0 0\ncpu0 50 0 50 350 50 0 0 0 0 0\nintr 1 2 3\n";

    #[test]
    fn test_parse_proc_stat() {
        let times = parse_proc_stat(PROC_STAT).expect("should parse");
        assert_eq!(times.idle, 800);
        assert_eq!(times.total, 1000);
        assert!(parse_proc_stat("intr 1 2 3").is_none());
    }

    #[test]
    fn test_cpu_usage_percent() {
        let prev = CpuTimes { idle: 800, total: 1000 };
        let next = CpuTimes { idle: 850, total: 1200 };
        assert_eq!(cpu_usage_percent(prev, next), 75.0);
        assert_eq!(cpu_usage_percent(next, next), 0.0);
    }

    #[test]
    fn test_parse_meminfo() {
        let text = "MemTotal:       16000 kB\nMemFree:         2000 kB\nMemAvailable:    4000 kB\nSwapTotal:       1000 kB\nSwapFree:         750 kB\n";
        let usage = parse_meminfo(text);
        assert_eq!(usage.memory_percent, 75.0);
        assert_eq!(usage.swap_percent, 25.0);
    }

    #[test]
    fn test_parse_meminfo_without_swap() {
        let text = "MemTotal: 1000 kB\nMemFree: 500 kB\nSwapTotal: 0 kB\nSwapFree: 0 kB\n";
        let usage = parse_meminfo(text);
        assert_eq!(usage.memory_percent, 50.0);
        assert_eq!(usage.swap_percent, 0.0);
    }

    #[test]
    fn test_parse_df() {
        let df = "Filesystem 1024-blocks Used Available Capacity Mounted on\n/dev/sda1 1000 420 580 42% /\n";
        assert_eq!(parse_df(df), 42.0);
        assert_eq!(parse_df("garbage"), 0.0);
    }

    #[tokio::test]
    async fn test_sample_uses_primary_gpu() {
        let gpus = GpuRegistry::new();
        gpus.update(Some(vec![crate::types::metrics::GpuDevice {
            name: "gpu".to_string(),
            usage_percent: 33.0,
            memory_used_bytes: 100,
            memory_total_bytes: 200,
        }]));
        let sampler = ResourceSampler::new(std::env::temp_dir());
        let record = sampler.sample(&gpus, 42).await;
        assert_eq!(record.gpu_usage, 33.0);
        assert_eq!(record.gpu_memory_total, 200.0);
        assert_eq!(record.timestamp, Some(42));
        assert_eq!(record.cpu_usage, 0.0);
    }

    #[tokio::test]
    async fn test_uptime_counts_from_process_start() {
        let started = Instant::now()
            .checked_sub(std::time::Duration::from_secs(90))
            .expect("clock far enough from boot");
        let sampler = ResourceSampler::new(std::env::temp_dir()).started_at(started);

        let first = sampler.sample(&GpuRegistry::new(), 1).await.uptime;
        assert!((90.0..120.0).contains(&first), "uptime {}", first);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let second = sampler.sample(&GpuRegistry::new(), 2).await.uptime;
        assert!(second > first);

        let fresh = ResourceSampler::new(std::env::temp_dir());
        assert!(fresh.sample(&GpuRegistry::new(), 3).await.uptime < 30.0);
    }
}
