//! `metrics:get`, `metrics:history` and `llama:metrics`

use crate::logging::Logger;
use crate::metrics::MetricsScraper;
use crate::protocol::handlers::{parse_limit, DEFAULT_LIMIT};
use crate::protocol::{Handler, HandlerError};
use crate::storage::Store;
use crate::system::gpu::GpuRegistry;
use crate::types::metrics::{GpuDevice, SystemMetricsRecord};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Nested client shape of one metrics record; zeros when there is none
pub fn metrics_view(record: Option<&SystemMetricsRecord>, gpus: &[GpuDevice]) -> Value {
    let record = record.cloned().unwrap_or_default();
    json!({
        "cpu": { "usage": record.cpu_usage },
        "memory": { "used": record.memory_usage },
        "swap": { "used": record.swap_usage },
        "disk": { "used": record.disk_usage },
        "gpu": {
            "usage": record.gpu_usage,
            "memoryUsed": record.gpu_memory_used,
            "memoryTotal": record.gpu_memory_total,
            "list": gpus,
        },
        "uptime": record.uptime,
    })
}

/// Latest system metrics plus, when a backend is attached, its scrape
pub struct MetricsGet {
    store: Arc<dyn Store>,
    gpus: Arc<GpuRegistry>,
    scraper: Option<Arc<MetricsScraper>>,
    logger: Arc<Logger>,
}

impl MetricsGet {
    pub fn new(
        store: Arc<dyn Store>,
        gpus: Arc<GpuRegistry>,
        scraper: Option<Arc<MetricsScraper>>,
        logger: Arc<Logger>,
    ) -> Self {
        Self {
            store,
            gpus,
            scraper,
            logger,
        }
    }
}

#[async_trait]
impl Handler for MetricsGet {
    fn name(&self) -> &str {
        "metrics:get"
    }

    async fn handle(&self, _request: Value) -> Result<Value, HandlerError> {
        let latest = self.store.get_latest_metrics()?;
        let mut data = json!({ "metrics": metrics_view(latest.as_ref(), &self.gpus.list()) });

        if let Some(scraper) = &self.scraper {
            match scraper.get_metrics().await {
                Ok(snapshot) => data["llama"] = serde_json::to_value(snapshot)?,
                Err(e) => self
                    .logger
                    .warn(&format!("Failed to scrape llama-server metrics: {}", e)),
            }
        }

        Ok(data)
    }
}

pub struct MetricsHistory {
    store: Arc<dyn Store>,
    gpus: Arc<GpuRegistry>,
}

impl MetricsHistory {
    pub fn new(store: Arc<dyn Store>, gpus: Arc<GpuRegistry>) -> Self {
        Self { store, gpus }
    }
}

#[async_trait]
impl Handler for MetricsHistory {
    fn name(&self) -> &str {
        "metrics:history"
    }

    async fn handle(&self, request: Value) -> Result<Value, HandlerError> {
        let limit = parse_limit(request.get("limit"), DEFAULT_LIMIT);
        let records = self.store.get_metrics_history(limit)?;
        // Device list as of now, not as of capture
        let gpus = self.gpus.list();

        let history: Vec<Value> = records
            .iter()
            .map(|record| {
                let mut item = metrics_view(Some(record), &gpus);
                item["timestamp"] = json!(record.timestamp.unwrap_or(0));
                item
            })
            .collect();

        Ok(json!({ "history": history }))
    }
}

/// Forces a scrape of the backend; failures become error responses
pub struct LlamaMetrics {
    scraper: Arc<MetricsScraper>,
}

impl LlamaMetrics {
    pub fn new(scraper: Arc<MetricsScraper>) -> Self {
        Self { scraper }
    }
}

#[async_trait]
impl Handler for LlamaMetrics {
    fn name(&self) -> &str {
        "llama:metrics"
    }

    async fn handle(&self, _request: Value) -> Result<Value, HandlerError> {
        let metrics = self.scraper.get_metrics().await?;
        Ok(json!({ "metrics": metrics }))
    }
}
