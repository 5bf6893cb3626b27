//! `metrics:subscribe`, `metrics:update-interval` and `metrics:unsubscribe`
//!
//! Each connection owns one [`MetricsSubscription`]. While it is active, a
//! task pushes `metrics:update` frames to that connection only.

use crate::logging::Broadcaster;
use crate::metrics::MetricsScraper;
use crate::protocol::handlers::metrics::metrics_view;
use crate::protocol::{Handler, HandlerError};
use crate::storage::Store;
use crate::system::clock::Clock;
use crate::system::gpu::GpuRegistry;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub const METRICS_UPDATE_EVENT: &str = "metrics:update";

pub const DEFAULT_INTERVAL_MS: u64 = 2_000;
pub const MIN_INTERVAL_MS: u64 = 1_000;
pub const MAX_INTERVAL_MS: u64 = 60_000;

/// Push interval for a requested value.
///
/// Anything missing, unparsable or below the minimum gets the default;
/// larger values are capped at the maximum. Fractions are truncated.
pub fn clamp_interval(requested: Option<&Value>) -> u64 {
    let millis = match requested {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)),
        Some(Value::String(s)) => {
            let digits: String = s.trim().chars().take_while(char::is_ascii_digit).collect();
            digits.parse().ok()
        }
        _ => None,
    };

    match millis {
        Some(ms) if ms >= MIN_INTERVAL_MS => ms.min(MAX_INTERVAL_MS),
        _ => DEFAULT_INTERVAL_MS,
    }
}

/// Builds the payload of each pushed update
pub struct MetricsFeed {
    store: Arc<dyn Store>,
    gpus: Arc<GpuRegistry>,
    scraper: Option<Arc<MetricsScraper>>,
    clock: Arc<dyn Clock>,
}

impl MetricsFeed {
    pub fn new(
        store: Arc<dyn Store>,
        gpus: Arc<GpuRegistry>,
        scraper: Option<Arc<MetricsScraper>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            gpus,
            scraper,
            clock,
        }
    }

    /// Latest stored sample, plus the backend scrape when one succeeds
    pub async fn update_payload(&self) -> Value {
        let latest = self.store.get_latest_metrics().unwrap_or_else(|e| {
            tracing::warn!("Failed to read latest metrics: {}", e);
            None
        });
        let mut data = json!({ "metrics": metrics_view(latest.as_ref(), &self.gpus.list()) });

        if let Some(scraper) = &self.scraper {
            match scraper.get_metrics().await {
                Ok(snapshot) => {
                    if let Ok(llama) = serde_json::to_value(snapshot) {
                        data["llama"] = llama;
                    }
                }
                Err(e) => tracing::debug!("Skipping llama-server metrics: {}", e),
            }
        }

        json!({
            "type": "broadcast",
            "timestamp": self.clock.now_millis(),
            "data": data,
        })
    }
}

struct Running {
    interval_ms: u64,
    task: JoinHandle<()>,
}

/// Periodic metrics push for one connection
pub struct MetricsSubscription {
    feed: Arc<MetricsFeed>,
    sink: Arc<dyn Broadcaster>,
    running: Mutex<Option<Running>>,
}

impl MetricsSubscription {
    pub fn new(feed: Arc<MetricsFeed>, sink: Arc<dyn Broadcaster>) -> Self {
        Self {
            feed,
            sink,
            running: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start pushing every `interval_ms`, replacing any running push.
    ///
    /// The first update goes out immediately.
    pub fn start(&self, interval_ms: u64) {
        let feed = self.feed.clone();
        let sink = self.sink.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                sink.emit(METRICS_UPDATE_EVENT, feed.update_payload().await);
            }
        });

        if let Some(old) = self.lock().replace(Running { interval_ms, task }) {
            old.task.abort();
        }
    }

    /// Current interval, `None` when not subscribed
    pub fn interval_ms(&self) -> Option<u64> {
        self.lock().as_ref().map(|running| running.interval_ms)
    }

    /// Stop pushing. Returns false if nothing was running.
    pub fn stop(&self) -> bool {
        match self.lock().take() {
            Some(running) => {
                running.task.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for MetricsSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct MetricsSubscribe {
    subscription: Arc<MetricsSubscription>,
}

impl MetricsSubscribe {
    pub fn new(subscription: Arc<MetricsSubscription>) -> Self {
        Self { subscription }
    }
}

#[async_trait]
impl Handler for MetricsSubscribe {
    fn name(&self) -> &str {
        "metrics:subscribe"
    }

    async fn handle(&self, request: Value) -> Result<Value, HandlerError> {
        let interval = clamp_interval(request.get("interval"));
        self.subscription.start(interval);
        tracing::info!("Metrics subscription started at {}ms", interval);
        Ok(json!({
            "interval": interval,
            "message": format!("Subscribed to metrics with {}ms interval", interval),
        }))
    }
}

pub struct MetricsUpdateInterval {
    subscription: Arc<MetricsSubscription>,
}

impl MetricsUpdateInterval {
    pub fn new(subscription: Arc<MetricsSubscription>) -> Self {
        Self { subscription }
    }
}

#[async_trait]
impl Handler for MetricsUpdateInterval {
    fn name(&self) -> &str {
        "metrics:update-interval"
    }

    async fn handle(&self, request: Value) -> Result<Value, HandlerError> {
        if self.subscription.interval_ms().is_none() {
            return Err(HandlerError::Failed("Not subscribed to metrics".to_string()));
        }
        let interval = clamp_interval(request.get("interval"));
        self.subscription.start(interval);
        tracing::info!("Metrics interval changed to {}ms", interval);
        Ok(json!({ "interval": interval }))
    }
}

pub struct MetricsUnsubscribe {
    subscription: Arc<MetricsSubscription>,
}

impl MetricsUnsubscribe {
    pub fn new(subscription: Arc<MetricsSubscription>) -> Self {
        Self { subscription }
    }
}

#[async_trait]
impl Handler for MetricsUnsubscribe {
    fn name(&self) -> &str {
        "metrics:unsubscribe"
    }

    async fn handle(&self, _request: Value) -> Result<Value, HandlerError> {
        if self.subscription.stop() {
            tracing::info!("Metrics subscription stopped");
        }
        Ok(json!({ "message": "Unsubscribed from metrics" }))
    }
}
