//! Daemon settings
//!
//! Manages persistence of the control plane's own startup settings.

use crate::metrics::scraper::{DEFAULT_PORT, DEFAULT_TIMEOUT_SECS, DEFAULT_TTL_MS};
use crate::storage::{get_data_dir, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Daemon settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonSettings {
    /// Address the control plane listens on
    pub listen_addr: String,
    /// Directory scanned for models when requests name none
    pub models_directory: PathBuf,
    /// llama-server host to scrape
    pub llama_host: String,
    /// llama-server port to scrape
    pub llama_port: u16,
    /// How long a scraped snapshot is served from cache (ms)
    #[serde(default = "default_metrics_ttl_ms")]
    pub metrics_ttl_ms: u64,
    /// Timeout for a single scrape (seconds)
    #[serde(default = "default_scrape_timeout_secs")]
    pub scrape_timeout_secs: u64,
    /// Interval between GPU and system samples (seconds)
    #[serde(default = "default_gpu_poll_secs")]
    pub gpu_poll_secs: u64,
    /// Initial log level: trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Store file; defaults to `store.json` in the data directory
    #[serde(default)]
    pub store_file: Option<PathBuf>,
}

fn default_metrics_ttl_ms() -> u64 {
    DEFAULT_TTL_MS
}

fn default_scrape_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_gpu_poll_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:3100".to_string(),
            models_directory: directories::BaseDirs::new()
                .map(|dirs| dirs.home_dir().join("models"))
                .unwrap_or_else(|| PathBuf::from("./models")),
            llama_host: "localhost".to_string(),
            llama_port: DEFAULT_PORT,
            metrics_ttl_ms: default_metrics_ttl_ms(),
            scrape_timeout_secs: default_scrape_timeout_secs(),
            gpu_poll_secs: default_gpu_poll_secs(),
            log_level: default_log_level(),
            store_file: None,
        }
    }
}

impl DaemonSettings {
    /// Validate settings values
    ///
    /// Clamps intervals into usable ranges and resets unknown values.
    pub fn validate(&mut self) {
        self.metrics_ttl_ms = self.metrics_ttl_ms.clamp(100, 60_000);
        self.scrape_timeout_secs = self.scrape_timeout_secs.clamp(1, 120);
        self.gpu_poll_secs = self.gpu_poll_secs.clamp(1, 3600);

        if self.llama_port == 0 {
            self.llama_port = DEFAULT_PORT;
        }

        if self.listen_addr.trim().is_empty() {
            self.listen_addr = "127.0.0.1:3100".to_string();
        }

        self.log_level = self.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            tracing::warn!("Unknown log level {:?}, using info", self.log_level);
            self.log_level = default_log_level();
        }
    }

    /// Store file, falling back to the data directory
    pub fn store_path(&self) -> Result<PathBuf, StoreError> {
        match &self.store_file {
            Some(path) => Ok(path.clone()),
            None => Ok(get_data_dir()?.join("store.json")),
        }
    }
}

/// Get the settings file path
pub fn get_settings_path() -> Result<PathBuf, StoreError> {
    Ok(get_data_dir()?.join("settings.json"))
}

/// Load settings from `path`
///
/// Returns default settings if the file doesn't exist or is corrupted
pub fn load_settings(path: &Path) -> DaemonSettings {
    match load_settings_internal(path) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            DaemonSettings::default()
        }
    }
}

fn load_settings_internal(path: &Path) -> Result<DaemonSettings, StoreError> {
    if !path.exists() {
        tracing::info!("Settings file not found, using defaults");
        return Ok(DaemonSettings::default());
    }

    let json = fs::read_to_string(path)?;
    let mut settings: DaemonSettings = serde_json::from_str(&json)?;
    settings.validate();

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Save settings to `path`
pub fn save_settings(path: &Path, settings: &DaemonSettings) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;

    tracing::debug!("Saved settings to {}", path.display());
    Ok(())
}
