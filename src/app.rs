//! Composition root
//!
//! [`ControlPlane`] owns the process-wide state (store, logger, GPU registry,
//! scraper, discovery) and hands each connection a freshly built registry
//! along with its own metrics subscription.

use crate::discovery::ModelDiscoveryService;
use crate::logging::{Broadcaster, ChannelBroadcaster, Logger};
use crate::metrics::MetricsScraper;
use crate::protocol::handlers::catalog::{
    ModelsCleanup, ModelsCreate, ModelsDelete, ModelsGet, ModelsList, ModelsUpdate,
};
use crate::protocol::handlers::config::{ConfigGet, ConfigUpdate};
use crate::protocol::handlers::logs::{LogsAdd, LogsClear, LogsGet};
use crate::protocol::handlers::metrics::{LlamaMetrics, MetricsGet, MetricsHistory};
use crate::protocol::handlers::models::{ModelsAnalyze, ModelsDefaults, ModelsScan, ModelsValidate};
use crate::protocol::handlers::settings::{SettingsGet, SettingsUpdate};
use crate::protocol::handlers::subscription::{
    MetricsFeed, MetricsSubscribe, MetricsSubscription, MetricsUnsubscribe, MetricsUpdateInterval,
};
use crate::protocol::HandlerRegistry;
use crate::storage::{Store, StoreError};
use crate::system::clock::Clock;
use crate::system::gpu::{self, GpuRegistry};
use crate::system::resources::ResourceSampler;
use crate::types::metrics::SystemMetricsRecord;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Pending broadcast frames per subscriber before it starts lagging
const BROADCAST_CAPACITY: usize = 256;

/// Shared state behind every connection
pub struct ControlPlane {
    pub store: Arc<dyn Store>,
    pub logger: Arc<Logger>,
    pub gpus: Arc<GpuRegistry>,
    pub scraper: Option<Arc<MetricsScraper>>,
    pub discovery: Arc<ModelDiscoveryService>,
    pub clock: Arc<dyn Clock>,
    pub broadcaster: Arc<ChannelBroadcaster>,
}

impl ControlPlane {
    /// Wire the logger to the store and to the broadcast channel
    pub fn new(
        store: Arc<dyn Store>,
        logger: Arc<Logger>,
        scraper: Option<Arc<MetricsScraper>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let broadcaster = Arc::new(ChannelBroadcaster::new(BROADCAST_CAPACITY));
        logger.set_io(broadcaster.clone());
        logger.set_store(store.clone());

        Self {
            store,
            logger,
            gpus: Arc::new(GpuRegistry::new()),
            scraper,
            discovery: Arc::new(ModelDiscoveryService::default()),
            clock,
            broadcaster,
        }
    }

    /// Metrics push for one connection, delivering through `sink`
    pub fn metrics_subscription(&self, sink: Arc<dyn Broadcaster>) -> Arc<MetricsSubscription> {
        let feed = MetricsFeed::new(
            self.store.clone(),
            self.gpus.clone(),
            self.scraper.clone(),
            self.clock.clone(),
        );
        Arc::new(MetricsSubscription::new(Arc::new(feed), sink))
    }

    /// Registry for one connection
    ///
    /// `llama:metrics` is only registered when a scraper is attached.
    pub fn build_registry(&self, subscription: Arc<MetricsSubscription>) -> HandlerRegistry {
        let registry = HandlerRegistry::new(self.clock.clone());

        registry.register(Arc::new(ConfigGet::new(self.store.clone())));
        registry.register(Arc::new(ConfigUpdate::new(
            self.store.clone(),
            self.scraper.clone(),
        )));
        registry.register(Arc::new(SettingsGet::new(self.store.clone())));
        registry.register(Arc::new(SettingsUpdate::new(
            self.store.clone(),
            self.logger.clone(),
        )));

        registry.register(Arc::new(LogsAdd::new(self.logger.clone())));
        registry.register(Arc::new(LogsGet::new(self.store.clone())));
        registry.register(Arc::new(LogsClear::new(self.store.clone())));

        registry.register(Arc::new(MetricsGet::new(
            self.store.clone(),
            self.gpus.clone(),
            self.scraper.clone(),
            self.logger.clone(),
        )));
        registry.register(Arc::new(MetricsHistory::new(
            self.store.clone(),
            self.gpus.clone(),
        )));
        if let Some(scraper) = &self.scraper {
            registry.register(Arc::new(LlamaMetrics::new(scraper.clone())));
        }
        registry.register(Arc::new(MetricsSubscribe::new(subscription.clone())));
        registry.register(Arc::new(MetricsUpdateInterval::new(subscription.clone())));
        registry.register(Arc::new(MetricsUnsubscribe::new(subscription)));

        registry.register(Arc::new(ModelsScan::new(
            self.discovery.clone(),
            self.store.clone(),
            self.broadcaster.clone(),
            self.clock.clone(),
        )));
        registry.register(Arc::new(ModelsAnalyze::new(self.discovery.clone())));
        registry.register(Arc::new(ModelsValidate));
        registry.register(Arc::new(ModelsDefaults));

        registry.register(Arc::new(ModelsList::new(self.store.clone())));
        registry.register(Arc::new(ModelsGet::new(self.store.clone())));
        registry.register(Arc::new(ModelsCreate::new(
            self.store.clone(),
            self.broadcaster.clone(),
            self.clock.clone(),
        )));
        registry.register(Arc::new(ModelsUpdate::new(
            self.store.clone(),
            self.broadcaster.clone(),
            self.clock.clone(),
        )));
        registry.register(Arc::new(ModelsDelete::new(
            self.store.clone(),
            self.broadcaster.clone(),
        )));
        registry.register(Arc::new(ModelsCleanup::new(
            self.store.clone(),
            self.discovery.clone(),
            self.broadcaster.clone(),
        )));

        tracing::debug!("Built registry with {} handlers", registry.count());
        registry
    }

    /// Take one resource sample and append it to the store
    pub async fn record_sample(
        &self,
        sampler: &ResourceSampler,
    ) -> Result<SystemMetricsRecord, StoreError> {
        let record = sampler.sample(&self.gpus, self.clock.now_millis()).await;
        self.store.save_metrics(&record)?;
        Ok(record)
    }

    /// Refresh GPUs and record a sample every `interval`, forever
    pub fn spawn_poller(self: &Arc<Self>, interval: Duration, sampler: ResourceSampler) -> JoinHandle<()> {
        let plane = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let count = gpu::refresh(&plane.gpus).await;
                tracing::trace!("Detected {} GPUs", count);

                if let Err(e) = plane.record_sample(&sampler).await {
                    tracing::warn!("Failed to store system metrics: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::tests::buffered_logger;
    use crate::logging::tests::RecordingBroadcaster;
    use crate::logging::{NoopBroadcaster, LOG_ENTRY_EVENT};
    use crate::metrics::scraper::tests::FakeFetcher;
    use crate::metrics::ScraperConfig;
    use crate::storage::LocalStore;
    use crate::system::clock::tests::ManualClock;
    use crate::types::metrics::GpuDevice;
    use serde_json::json;

    fn plane(scraper: Option<Arc<MetricsScraper>>) -> ControlPlane {
        let (logger, _) = buffered_logger();
        ControlPlane::new(
            Arc::new(LocalStore::in_memory()),
            Arc::new(logger),
            scraper,
            Arc::new(ManualClock::at(1_000)),
        )
    }

    fn registry(plane: &ControlPlane) -> HandlerRegistry {
        plane.build_registry(plane.metrics_subscription(Arc::new(NoopBroadcaster)))
    }

    #[test]
    fn test_registry_without_scraper() {
        let names = registry(&plane(None)).names();
        assert_eq!(
            names,
            vec![
                "config:get",
                "config:update",
                "logs:add",
                "logs:clear",
                "logs:get",
                "metrics:get",
                "metrics:history",
                "metrics:subscribe",
                "metrics:unsubscribe",
                "metrics:update-interval",
                "models:analyze",
                "models:cleanup",
                "models:create",
                "models:defaults",
                "models:delete",
                "models:get",
                "models:list",
                "models:scan",
                "models:update",
                "models:validate",
                "settings:get",
                "settings:update",
            ]
        );
    }

    #[test]
    fn test_registry_with_scraper_adds_llama_metrics() {
        let scraper = Arc::new(MetricsScraper::new(
            ScraperConfig::default(),
            Arc::new(FakeFetcher::serving("")),
            Arc::new(ManualClock::at(0)),
        ));
        let registry = registry(&plane(Some(scraper)));
        assert_eq!(registry.count(), 23);
        assert!(registry.get("llama:metrics").is_some());
    }

    #[tokio::test]
    async fn test_logs_add_is_persisted_and_broadcast() {
        let plane = plane(None);
        let mut events = plane.broadcaster.subscribe();
        let registry = registry(&plane);

        let envelope = registry
            .dispatch("logs:add", json!({"requestId": 3, "data": {"level": "warn", "message": "disk low"}}))
            .await;
        assert!(envelope.success);

        let frame = events.try_recv().expect("broadcast");
        assert_eq!(frame.event, LOG_ENTRY_EVENT);
        assert_eq!(frame.payload["data"]["entry"]["message"], "disk low");

        let logs = plane.store.get_logs(10).expect("logs");
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, "warn");
    }

    #[tokio::test]
    async fn test_record_sample_feeds_metrics_get() {
        let plane = plane(None);
        plane.gpus.update(Some(vec![GpuDevice {
            name: "RTX 3090".to_string(),
            usage_percent: 55.0,
            memory_used_bytes: 2048,
            memory_total_bytes: 8192,
        }]));

        let dir = tempfile::tempdir().expect("tempdir");
        let sampler = ResourceSampler::new(dir.path());
        let record = plane.record_sample(&sampler).await.expect("sample");
        assert_eq!(record.timestamp, Some(1_000));
        assert_eq!(record.gpu_usage, 55.0);

        let envelope = registry(&plane).dispatch("metrics:get", json!({})).await;
        let data = envelope.data.expect("data");
        assert_eq!(data["metrics"]["gpu"]["usage"], 55.0);
        assert_eq!(data["metrics"]["gpu"]["memoryTotal"], 8192.0);
        assert_eq!(data["metrics"]["gpu"]["list"][0]["name"], "RTX 3090");
    }

    #[tokio::test]
    async fn test_catalog_changes_reach_every_client() {
        let plane = plane(None);
        let mut events = plane.broadcaster.subscribe();
        let registry = registry(&plane);

        let envelope = registry
            .dispatch("models:create", json!({"model": {"id": "m1", "name": "shared"}}))
            .await;
        assert!(envelope.success);

        let frame = events.try_recv().expect("broadcast");
        assert_eq!(frame.event, "models:created");
        assert_eq!(frame.payload["model"]["name"], "shared");
        assert_eq!(plane.store.get_model("m1").expect("get").map(|m| m.name), Some("shared".to_string()));
    }

    #[tokio::test]
    async fn test_subscription_pushes_to_its_own_sink() {
        let plane = plane(None);
        let sink = Arc::new(RecordingBroadcaster::default());
        let subscription = plane.metrics_subscription(sink.clone());
        let registry = plane.build_registry(subscription.clone());

        let envelope = registry
            .dispatch("metrics:subscribe", json!({"interval": 1_000}))
            .await;
        assert_eq!(envelope.data.expect("data")["interval"], 1_000);
        assert_eq!(subscription.interval_ms(), Some(1_000));

        drop(registry);
        assert!(subscription.stop());
        assert!(!subscription.stop());
    }
}
