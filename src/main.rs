//! llamadash - local control plane for llama-server backends

use llamadash::app::ControlPlane;
use llamadash::logging::Logger;
use llamadash::metrics::{HttpFetcher, MetricsScraper, ScraperConfig};
use llamadash::server;
use llamadash::storage::settings::{get_settings_path, load_settings};
use llamadash::storage::{LocalStore, Store};
use llamadash::system::resources::ResourceSampler;
use llamadash::system::SystemClock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let started = Instant::now();

    // Optional settings file path as the only argument
    let settings_path = match std::env::args_os().nth(1) {
        Some(path) => PathBuf::from(path),
        None => get_settings_path()?,
    };
    let settings = load_settings(&settings_path);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| settings.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting llamadash v{}", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn Store> = match settings.store_path().and_then(LocalStore::open) {
        Ok(store) => {
            tracing::info!("Using store at {}", store.path().map(|p| p.display().to_string()).unwrap_or_default());
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!("Failed to open store, keeping state in memory: {}", e);
            Arc::new(LocalStore::in_memory())
        }
    };

    let clock = Arc::new(SystemClock);
    let fetcher = HttpFetcher::new(Duration::from_secs(settings.scrape_timeout_secs))?;
    let scraper = MetricsScraper::new(
        ScraperConfig {
            host: settings.llama_host.clone(),
            port: settings.llama_port,
            ttl_ms: settings.metrics_ttl_ms,
        },
        Arc::new(fetcher),
        clock.clone(),
    );

    let logger = Arc::new(Logger::new());
    logger.set_level(settings.log_level.clone());

    let plane = Arc::new(ControlPlane::new(
        store,
        logger.clone(),
        Some(Arc::new(scraper)),
        clock,
    ));

    let poller = plane.spawn_poller(
        Duration::from_secs(settings.gpu_poll_secs),
        ResourceSampler::new(settings.models_directory.clone()).started_at(started),
    );

    let listener = TcpListener::bind(&settings.listen_addr).await?;
    logger.info(&format!("Control plane listening on {}", settings.listen_addr));

    tokio::select! {
        result = server::serve(listener, plane) => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
    }

    poller.abort();
    Ok(())
}
