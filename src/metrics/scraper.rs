//! Backend metrics scraper with a short-lived cache

use crate::metrics::parse::parse_prometheus_metrics;
use crate::system::clock::Clock;
use crate::types::metrics::MetricsSnapshot;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_TTL_MS: u64 = 5000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
}

/// Fetches the raw text of a metrics endpoint
#[async_trait]
pub trait MetricsFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String, ScrapeError>;
}

/// [`MetricsFetcher`] over HTTP
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, ScrapeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("llamadash/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ScrapeError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MetricsFetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, ScrapeError> {
        let request_error = |e: reqwest::Error| ScrapeError::Request {
            url: url.to_string(),
            message: e.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(request_error)?;
        if !response.status().is_success() {
            return Err(ScrapeError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        response.text().await.map_err(request_error)
    }
}

/// Where the backend lives and how long a scrape stays fresh
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub host: String,
    pub port: u16,
    pub ttl_ms: u64,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            ttl_ms: DEFAULT_TTL_MS,
        }
    }
}

#[derive(Debug, Clone)]
struct Endpoint {
    port: u16,
    base_url: String,
}

#[derive(Debug, Clone)]
struct CachedSnapshot {
    data: MetricsSnapshot,
    captured_at_millis: u64,
}

/// Scrapes `{base_url}/metrics` and caches the result per base URL
pub struct MetricsScraper {
    host: String,
    ttl_ms: u64,
    endpoint: RwLock<Endpoint>,
    cache: DashMap<String, CachedSnapshot>,
    fetcher: Arc<dyn MetricsFetcher>,
    clock: Arc<dyn Clock>,
}

fn base_url_for(host: &str, port: u16) -> String {
    format!("http://{}:{}", host, port)
}

impl MetricsScraper {
    pub fn new(config: ScraperConfig, fetcher: Arc<dyn MetricsFetcher>, clock: Arc<dyn Clock>) -> Self {
        let endpoint = Endpoint {
            port: config.port,
            base_url: base_url_for(&config.host, config.port),
        };
        Self {
            host: config.host,
            ttl_ms: config.ttl_ms,
            endpoint: RwLock::new(endpoint),
            cache: DashMap::new(),
            fetcher,
            clock,
        }
    }

    pub fn base_url(&self) -> String {
        self.endpoint().base_url
    }

    pub fn port(&self) -> u16 {
        self.endpoint().port
    }

    /// Point the scraper at a new port. Returns false if nothing changed.
    pub fn update_port(&self, port: u16) -> bool {
        let mut endpoint = self.endpoint.write().unwrap_or_else(|e| e.into_inner());
        if endpoint.port == port {
            return false;
        }
        *endpoint = Endpoint {
            port,
            base_url: base_url_for(&self.host, port),
        };
        tracing::info!("Metrics endpoint moved to {}", endpoint.base_url);
        true
    }

    /// Latest snapshot, from cache while it is younger than the TTL.
    ///
    /// Failed scrapes are returned to the caller and never cached.
    pub async fn get_metrics(&self) -> Result<MetricsSnapshot, ScrapeError> {
        let base_url = self.base_url();
        let now = self.clock.now_millis();

        if let Some(cached) = self.cache.get(&base_url) {
            if now.saturating_sub(cached.captured_at_millis) < self.ttl_ms {
                return Ok(cached.data.clone());
            }
        }

        let text = self.fetcher.fetch_text(&format!("{}/metrics", base_url)).await?;
        let data = parse_prometheus_metrics(&text);
        self.cache.insert(
            base_url,
            CachedSnapshot {
                data: data.clone(),
                captured_at_millis: self.clock.now_millis(),
            },
        );
        Ok(data)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    fn endpoint(&self) -> Endpoint {
        self.endpoint.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
