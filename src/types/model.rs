//! Model types
//!
//! Defines header metadata, catalog entries and generation parameter structures.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata decoded from a GGUF file header.
///
/// Absent keys never surface as `null`: numbers fall back to 0 and strings to empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelHeader {
    /// Container format version from the preamble
    pub version: u32,
    /// Number of tensors declared in the preamble
    pub tensor_count: u64,
    /// `general.architecture`, e.g. "llama"
    pub architecture: String,
    pub context_length: u32,
    pub embedding_length: u32,
    pub block_count: u32,
    pub head_count: u32,
    pub head_count_kv: u32,
    pub feed_forward_length: u32,
    /// `general.file_type`, see [`file_type_label`]
    pub file_type: u32,
    /// `general.size_label`, e.g. "7B"
    pub size_label: String,
}

impl ModelHeader {
    /// Quantization label for this header's file type (empty if unknown)
    pub fn quantization(&self) -> &'static str {
        file_type_label(self.file_type).unwrap_or("")
    }

    /// Whether the weights are stored in a quantized format
    pub fn is_quantized(&self) -> bool {
        matches!(file_type_label(self.file_type), Some(label) if label != "F32" && label != "F16")
    }
}

/// Map a GGUF `general.file_type` value to its quantization label
pub const fn file_type_label(file_type: u32) -> Option<&'static str> {
    match file_type {
        0 => Some("F32"),
        1 => Some("F16"),
        2 => Some("Q4_0"),
        3 => Some("Q4_1"),
        6 => Some("Q5_0"),
        7 => Some("Q5_1"),
        8 => Some("Q8_0"),
        9 => Some("Q8_1"),
        10 => Some("Q2_K"),
        11 => Some("Q3_K_S"),
        12 => Some("Q3_K_M"),
        13 => Some("Q3_K_L"),
        14 => Some("Q4_K_S"),
        15 => Some("Q4_K_M"),
        16 => Some("Q5_K_S"),
        17 => Some("Q5_K_M"),
        18 => Some("Q6_K"),
        19 => Some("Q8_K"),
        _ => None,
    }
}

/// On-disk format of a discovered model file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    /// Legacy llama `.bin` weights
    Llama,
    /// GGUF container with a readable header, or quantized `.quant.bin` weights
    Gguf,
    /// Recognized by extension but the contents could not be identified
    Unknown,
}

/// Labels guessed from a file name when the header is unreadable
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelHints {
    /// Model family, "LLM" when nothing matched
    pub architecture: String,
    /// Parameter count label such as "7B", empty if unknown
    pub params: String,
    pub quantization: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_length: Option<u32>,
}

/// One model file produced by discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredModel {
    /// File name without the recognized extension
    pub name: String,
    /// Absolute path to the model file
    pub path: String,
    pub size_bytes: u64,
    pub format: ModelFormat,
    pub quantized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Parsed header, GGUF files only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<ModelHeader>,
    /// Filename fallback, set whenever `header` is not
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hints: Option<ModelHints>,
}

/// Context size given to catalog entries that do not declare one
pub const DEFAULT_CTX_SIZE: u32 = 4096;

/// Fields a `models:update` request may change
pub const UPDATABLE_FIELDS: &[&str] = &[
    "name",
    "type",
    "status",
    "parameters",
    "model_path",
    "file_size",
    "params",
    "quantization",
    "ctx_size",
    "batch_size",
    "threads",
    "embedding_size",
    "block_count",
    "head_count",
    "head_count_kv",
    "ffn_dim",
    "file_type",
];

/// A model known to the control plane, persisted by the store.
///
/// Field names stay snake_case on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogModel {
    pub id: String,
    pub name: String,
    /// Architecture, "llama" unless known
    #[serde(rename = "type")]
    pub model_type: String,
    pub status: String,
    /// Free-form launch parameters
    pub parameters: Value,
    pub model_path: Option<String>,
    pub file_size: Option<u64>,
    pub params: Option<String>,
    pub quantization: Option<String>,
    pub ctx_size: u32,
    pub batch_size: u32,
    pub threads: u32,
    pub embedding_size: u32,
    pub block_count: u32,
    pub head_count: u32,
    pub head_count_kv: u32,
    pub ffn_dim: u32,
    pub file_type: u32,
    /// Epoch seconds
    pub created_at: u64,
    /// Epoch seconds
    pub updated_at: u64,
}

impl Default for CatalogModel {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            model_type: "llama".to_string(),
            status: "idle".to_string(),
            parameters: Value::Object(Map::new()),
            model_path: None,
            file_size: None,
            params: None,
            quantization: None,
            ctx_size: DEFAULT_CTX_SIZE,
            batch_size: 512,
            threads: 4,
            embedding_size: 0,
            block_count: 0,
            head_count: 0,
            head_count_kv: 0,
            ffn_dim: 0,
            file_type: 0,
            created_at: 0,
            updated_at: 0,
        }
    }
}

/// What a file's header (or failing that, its name) says about it
#[derive(Debug, Default)]
struct FileMetadata {
    architecture: Option<String>,
    params: Option<String>,
    quantization: Option<String>,
    ctx_size: Option<u32>,
    header: Option<ModelHeader>,
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

impl FileMetadata {
    fn of(model: &DiscoveredModel) -> Self {
        match (&model.header, &model.hints) {
            (Some(header), _) => Self {
                architecture: non_empty(&header.architecture),
                params: non_empty(&header.size_label),
                quantization: non_empty(header.quantization()),
                ctx_size: (header.context_length > 0).then_some(header.context_length),
                header: Some(header.clone()),
            },
            (None, Some(hints)) => Self {
                architecture: non_empty(&hints.architecture),
                params: non_empty(&hints.params),
                quantization: non_empty(&hints.quantization),
                ctx_size: hints.context_length.filter(|&n| n > 0),
                header: None,
            },
            (None, None) => Self::default(),
        }
    }
}

impl CatalogModel {
    /// New entry for a scanned file
    pub fn from_discovered(model: &DiscoveredModel, id: String, now_secs: u64) -> Self {
        let meta = FileMetadata::of(model);
        let header = meta.header.unwrap_or_default();
        Self {
            id,
            name: model.name.clone(),
            model_type: meta.architecture.unwrap_or_else(|| "llama".to_string()),
            status: "unloaded".to_string(),
            model_path: Some(model.path.clone()),
            file_size: Some(model.size_bytes),
            params: meta.params,
            quantization: meta.quantization,
            ctx_size: meta.ctx_size.unwrap_or(DEFAULT_CTX_SIZE),
            embedding_size: header.embedding_length,
            block_count: header.block_count,
            head_count: header.head_count,
            head_count_kv: header.head_count_kv,
            ffn_dim: header.feed_forward_length,
            file_type: header.file_type,
            created_at: now_secs,
            updated_at: now_secs,
            ..Self::default()
        }
    }

    /// Refresh file-derived fields from a rescan.
    ///
    /// Only values the file actually declares overwrite what is stored; name,
    /// status and launch settings are left alone. Returns true if anything changed.
    pub fn refresh_from(&mut self, model: &DiscoveredModel) -> bool {
        let meta = FileMetadata::of(model);
        let before = self.clone();

        self.file_size = Some(model.size_bytes);
        if let Some(architecture) = meta.architecture {
            self.model_type = architecture;
        }
        if meta.params.is_some() {
            self.params = meta.params;
        }
        if meta.quantization.is_some() {
            self.quantization = meta.quantization;
        }
        if let Some(ctx_size) = meta.ctx_size {
            self.ctx_size = ctx_size;
        }
        if let Some(header) = meta.header {
            self.embedding_size = header.embedding_length;
            self.block_count = header.block_count;
            self.head_count = header.head_count;
            self.head_count_kv = header.head_count_kv;
            self.ffn_dim = header.feed_forward_length;
            self.file_type = header.file_type;
        }

        *self != before
    }

    /// Copy with the [`UPDATABLE_FIELDS`] found in `updates` applied.
    ///
    /// `None` when `updates` names none of them; unknown keys are ignored.
    pub fn with_updates(&self, updates: &Map<String, Value>) -> Result<Option<Self>, serde_json::Error> {
        let mut fields = match serde_json::to_value(self)? {
            Value::Object(fields) => fields,
            _ => Map::new(),
        };

        let mut touched = false;
        for (key, value) in updates {
            if UPDATABLE_FIELDS.contains(&key.as_str()) {
                fields.insert(key.clone(), value.clone());
                touched = true;
            }
        }
        if !touched {
            return Ok(None);
        }
        serde_json::from_value(Value::Object(fields)).map(Some)
    }
}

/// Default generation parameters handed to newly configured models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    pub temperature: f32,
    pub top_p: f32,
    pub repeat_penalty: f32,
    pub max_tokens: u32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            repeat_penalty: 1.1,
            max_tokens: 2048,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
        }
    }
}

/// Outcome of validating a model configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}
