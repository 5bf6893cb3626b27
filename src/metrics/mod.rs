//! llama-server metrics
//!
//! Parses the Prometheus text format and scrapes it from a running backend.

pub mod parse;
pub mod scraper;

pub use parse::parse_prometheus_metrics;
pub use scraper::{HttpFetcher, MetricsFetcher, MetricsScraper, ScrapeError, ScraperConfig};
