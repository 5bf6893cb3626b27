//! Configuration types
//!
//! Backend configuration served to clients through `config:get`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// llama-server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the llama-server binary
    #[serde(rename = "serverPath")]
    pub server_path: String,
    pub host: String,
    pub port: u16,
    /// Directory scanned by `models:scan` when no path is given
    #[serde(rename = "baseModelsPath")]
    pub base_models_path: String,
    pub ctx_size: u32,
    pub batch_size: u32,
    pub threads: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let base_models_path = directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join("models"))
            .unwrap_or_else(|| PathBuf::from("./models"));

        Self {
            server_path: "/usr/local/bin/llama-server".to_string(),
            host: "localhost".to_string(),
            port: 8080,
            base_models_path: base_models_path.display().to_string(),
            ctx_size: 2048,
            batch_size: 512,
            threads: 4,
        }
    }
}

impl ServerConfig {
    /// Defaults with the saved keys shallow-merged on top.
    ///
    /// Keys unknown to [`ServerConfig`] are kept as-is.
    pub fn merged_with(saved: Option<&Value>) -> Value {
        let mut merged = match serde_json::to_value(Self::default()) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        if let Some(Value::Object(saved)) = saved {
            for (key, value) in saved {
                merged.insert(key.clone(), value.clone());
            }
        }
        Value::Object(merged)
    }
}
