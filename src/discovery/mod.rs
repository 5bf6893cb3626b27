//! Model discovery
//!
//! Walks a directory tree looking for model weights and builds catalog entries.
//! Filesystem access goes through [`ModelFs`] so the walk can run against fakes.

use crate::gguf;
use crate::types::json::is_truthy_opt;
use crate::types::model::{
    DiscoveredModel, GenerationParameters, ModelFormat, ModelHeader, ValidationResult,
};
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

/// One directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEntry {
    pub path: PathBuf,
    pub is_dir: bool,
}

/// Filesystem operations used by discovery
#[async_trait]
pub trait ModelFs: Send + Sync {
    async fn read_dir(&self, path: &Path) -> io::Result<Vec<FsEntry>>;
    /// File size in bytes
    async fn stat(&self, path: &Path) -> io::Result<u64>;
    async fn read_to_string(&self, path: &Path) -> io::Result<String>;
    async fn read_header(&self, path: &Path) -> Option<ModelHeader>;
    async fn has_gguf_magic(&self, path: &Path) -> bool;
}

/// [`ModelFs`] over the real filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFs;

#[async_trait]
impl ModelFs for TokioFs {
    async fn read_dir(&self, path: &Path) -> io::Result<Vec<FsEntry>> {
        let mut entries = tokio::fs::read_dir(path).await?;
        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let is_dir = entry.file_type().await.map(|ft| ft.is_dir()).unwrap_or(false);
            out.push(FsEntry {
                path: entry.path(),
                is_dir,
            });
        }
        Ok(out)
    }

    async fn stat(&self, path: &Path) -> io::Result<u64> {
        Ok(tokio::fs::metadata(path).await?.len())
    }

    async fn read_to_string(&self, path: &Path) -> io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    async fn read_header(&self, path: &Path) -> Option<ModelHeader> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || gguf::parse_header(path))
            .await
            .ok()
            .flatten()
    }

    async fn has_gguf_magic(&self, path: &Path) -> bool {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || gguf::has_gguf_magic(path))
            .await
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModelKind {
    Bin,
    QuantBin,
    Gguf,
}

/// Recognize a model file name, returning its kind and display name
fn classify(file_name: &str) -> Option<(ModelKind, &str)> {
    let has_suffix = |suffix: &str| {
        file_name.len() >= suffix.len()
            && file_name
                .get(file_name.len() - suffix.len()..)
                .map(|tail| tail.eq_ignore_ascii_case(suffix))
                .unwrap_or(false)
    };

    if has_suffix(".bin") {
        let kind = if has_suffix(".quant.bin") {
            ModelKind::QuantBin
        } else {
            ModelKind::Bin
        };
        Some((kind, &file_name[..file_name.len() - 4]))
    } else if has_suffix(".gguf") {
        Some((ModelKind::Gguf, &file_name[..file_name.len() - 5]))
    } else {
        None
    }
}

/// Projector, factory and underscore-prefixed files are never catalog models
fn is_excluded(file_name: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();
    lower.contains("mmproj")
        || lower.ends_with("-proj")
        || lower.contains(".factory")
        || lower.starts_with('_')
}

/// Optional fields read from the JSON file next to a model
#[derive(Debug, Default)]
struct Sidecar {
    author: Option<String>,
    version: Option<String>,
}

type ScanFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Finds model files under a directory
pub struct ModelDiscoveryService {
    fs: Arc<dyn ModelFs>,
}

impl ModelDiscoveryService {
    pub fn new(fs: Arc<dyn ModelFs>) -> Self {
        Self { fs }
    }

    /// Discover models under `base`.
    ///
    /// `max_depth` bounds how many directory levels below `base` are entered;
    /// `Some(0)` only looks at files directly in `base`, `None` is unbounded.
    /// Unreadable directories and files are skipped. A relative `base` is
    /// resolved against the working directory so reported paths are absolute.
    pub async fn discover_models(&self, base: &Path, max_depth: Option<usize>) -> Vec<DiscoveredModel> {
        let base = std::path::absolute(base).unwrap_or_else(|_| base.to_path_buf());
        let mut models = Vec::new();
        self.scan_dir(base.clone(), max_depth, true, &mut models).await;
        tracing::debug!("Discovered {} models under {}", models.len(), base.display());
        models
    }

    /// Parse the GGUF header of a single file
    pub async fn analyze(&self, path: &Path) -> Option<ModelHeader> {
        self.fs.read_header(path).await
    }

    /// Whether a catalog entry still points at a usable model file.
    ///
    /// The file must exist and not be a projector or helper file; `.gguf`
    /// files must also start with the GGUF magic.
    pub async fn is_valid_model_file(&self, path: &Path) -> bool {
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            return false;
        };
        if is_excluded(file_name) {
            tracing::debug!("{} matches an excluded pattern", path.display());
            return false;
        }
        if let Err(e) = self.fs.stat(path).await {
            tracing::debug!("{} is gone: {}", path.display(), e);
            return false;
        }
        match classify(file_name) {
            Some((ModelKind::Gguf, _)) => self.fs.has_gguf_magic(path).await,
            _ => true,
        }
    }

    fn scan_dir<'a>(
        &'a self,
        dir: PathBuf,
        remaining: Option<usize>,
        is_base: bool,
        models: &'a mut Vec<DiscoveredModel>,
    ) -> ScanFuture<'a> {
        Box::pin(async move {
            let entries = match self.fs.read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    if is_base {
                        tracing::error!("Failed to read models directory {}: {}", dir.display(), e);
                    } else {
                        tracing::warn!("Skipping unreadable directory {}: {}", dir.display(), e);
                    }
                    return;
                }
            };

            for entry in entries {
                if entry.is_dir {
                    match remaining {
                        Some(0) => {}
                        Some(n) => self.scan_dir(entry.path, Some(n - 1), false, models).await,
                        None => self.scan_dir(entry.path, None, false, models).await,
                    }
                } else if let Some(model) = self.inspect_file(&entry.path).await {
                    models.push(model);
                }
            }
        })
    }

    async fn inspect_file(&self, path: &Path) -> Option<DiscoveredModel> {
        let file_name = path.file_name()?.to_str()?;
        let (kind, name) = classify(file_name)?;

        let size_bytes = match self.fs.stat(path).await {
            Ok(size) => size,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", path.display(), e);
                return None;
            }
        };

        let sidecar = self.read_sidecar(path).await;

        let (format, quantized, header) = match kind {
            ModelKind::Bin => (ModelFormat::Llama, false, None),
            ModelKind::QuantBin => (ModelFormat::Gguf, true, None),
            ModelKind::Gguf => match self.fs.read_header(path).await {
                Some(header) => (ModelFormat::Gguf, header.is_quantized(), Some(header)),
                None => (
                    ModelFormat::Unknown,
                    !gguf::extract_quantization(file_name).is_empty(),
                    None,
                ),
            },
        };
        let hints = header
            .is_none()
            .then(|| gguf::hints_from_file_name(file_name));

        Some(DiscoveredModel {
            name: name.to_string(),
            path: path.display().to_string(),
            size_bytes,
            format,
            quantized,
            author: sidecar.author,
            version: sidecar.version,
            header,
            hints,
        })
    }

    async fn read_sidecar(&self, path: &Path) -> Sidecar {
        let sidecar_path = path.with_extension("json");
        let text = match self.fs.read_to_string(&sidecar_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!("No model metadata at {}", sidecar_path.display());
                return Sidecar::default();
            }
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", sidecar_path.display(), e);
                return Sidecar::default();
            }
        };

        match serde_json::from_str::<Value>(&text) {
            Ok(value) => {
                let field = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
                Sidecar {
                    author: field("author"),
                    version: field("version"),
                }
            }
            Err(e) => {
                tracing::warn!("Invalid model metadata {}: {}", sidecar_path.display(), e);
                Sidecar::default()
            }
        }
    }
}

impl Default for ModelDiscoveryService {
    fn default() -> Self {
        Self::new(Arc::new(TokioFs))
    }
}

/// Check that a model configuration names a model and points at a file
pub fn validate_model_config(config: &Value) -> ValidationResult {
    let mut errors = Vec::new();

    if !is_truthy_opt(config.get("name")) {
        errors.push("Model name is required".to_string());
    }
    if !matches!(config.get("path"), Some(Value::String(_))) {
        errors.push("Model path is required".to_string());
    }

    ValidationResult {
        valid: errors.is_empty(),
        errors: (!errors.is_empty()).then_some(errors),
    }
}

pub fn default_parameters() -> GenerationParameters {
    GenerationParameters::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::tests::SharedBuffer;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};

    fn service() -> ModelDiscoveryService {
        ModelDiscoveryService::default()
    }

    fn touch(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, bytes).expect("write");
        path
    }

    fn names(models: &[DiscoveredModel]) -> HashSet<String> {
        models.iter().map(|m| m.name.clone()).collect()
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("model.bin"), Some((ModelKind::Bin, "model")));
        assert_eq!(classify("model.quant.bin"), Some((ModelKind::QuantBin, "model.quant")));
        assert_eq!(classify("MODEL.QUANT.BIN"), Some((ModelKind::QuantBin, "MODEL.QUANT")));
        assert_eq!(classify("llama.GGUF"), Some((ModelKind::Gguf, "llama")));
        assert_eq!(classify("README.md"), None);
        assert_eq!(classify("model.json"), None);
        assert_eq!(classify("bin"), None);
    }

    #[tokio::test]
    async fn test_discovers_bin_and_quant_bin() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "model.bin", b"1234");
        touch(dir.path(), "model.quant.bin", b"12");
        touch(dir.path(), "README.md", b"docs");

        let models = service().discover_models(dir.path(), None).await;
        assert_eq!(models.len(), 2);

        let by_name: HashMap<_, _> = models.iter().map(|m| (m.name.as_str(), m)).collect();
        let plain = by_name["model"];
        assert_eq!(plain.size_bytes, 4);
        assert_eq!(plain.format, ModelFormat::Llama);
        assert!(!plain.quantized);

        let quant = by_name["model.quant"];
        assert_eq!(quant.size_bytes, 2);
        assert_eq!(quant.format, ModelFormat::Gguf);
        assert!(quant.quantized);
        assert!(quant.header.is_none());
    }

    #[tokio::test]
    async fn test_max_depth_zero_stays_in_base() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "top.bin", b"x");
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).expect("mkdir");
        touch(&nested, "deep.bin", b"x");

        let models = service().discover_models(dir.path(), Some(0)).await;
        assert_eq!(names(&models), HashSet::from(["top".to_string()]));

        let models = service().discover_models(dir.path(), Some(1)).await;
        assert_eq!(names(&models), HashSet::from(["top".to_string(), "deep".to_string()]));
    }

    #[tokio::test]
    async fn test_depth_limit_counts_levels() {
        let dir = tempfile::tempdir().expect("tempdir");
        let one = dir.path().join("one");
        let two = one.join("two");
        std::fs::create_dir_all(&two).expect("mkdir");
        touch(&one, "a.bin", b"x");
        touch(&two, "b.bin", b"x");

        let models = service().discover_models(dir.path(), Some(1)).await;
        assert_eq!(names(&models), HashSet::from(["a".to_string()]));

        let models = service().discover_models(dir.path(), None).await;
        assert_eq!(models.len(), 2);
    }

    #[tokio::test]
    async fn test_sidecar_metadata() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "with-meta.bin", b"x");
        touch(dir.path(), "with-meta.json", br#"{"author": "ggml", "version": "1.2"}"#);
        touch(dir.path(), "broken.bin", b"x");
        touch(dir.path(), "broken.json", b"{not json");

        let models = service().discover_models(dir.path(), None).await;
        assert_eq!(models.len(), 2);

        let with_meta = models.iter().find(|m| m.name == "with-meta").expect("entry");
        assert_eq!(with_meta.author.as_deref(), Some("ggml"));
        assert_eq!(with_meta.version.as_deref(), Some("1.2"));

        let broken = models.iter().find(|m| m.name == "broken").expect("entry");
        assert_eq!(broken.author, None);
    }

    #[tokio::test]
    async fn test_gguf_with_header() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bytes = crate::gguf::parser::tests::HeaderBuilder::new()
            .string("general.architecture", "llama")
            .u32("general.file_type", 15)
            .u32("llama.context_length", 4096)
            .build();
        touch(dir.path(), "llama.gguf", &bytes);
        touch(dir.path(), "corrupt-Q8_0.gguf", b"not a gguf file");

        let models = service().discover_models(dir.path(), None).await;
        let parsed = models.iter().find(|m| m.name == "llama").expect("entry");
        assert_eq!(parsed.format, ModelFormat::Gguf);
        assert!(parsed.quantized);
        assert_eq!(parsed.header.as_ref().map(|h| h.context_length), Some(4096));

        assert!(parsed.hints.is_none());

        let corrupt = models.iter().find(|m| m.name == "corrupt-Q8_0").expect("entry");
        assert_eq!(corrupt.format, ModelFormat::Unknown);
        assert!(corrupt.quantized);
        assert!(corrupt.header.is_none());
    }

    #[tokio::test]
    async fn test_unreadable_gguf_falls_back_to_file_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "Meta-Llama-3-8B-Instruct-8kctx-Q4_K_M.gguf", b"GGUF truncated");

        let models = service().discover_models(dir.path(), None).await;
        assert_eq!(models.len(), 1);
        let hints = models[0].hints.as_ref().expect("filename hints");
        assert_eq!(hints.architecture, "Llama");
        assert_eq!(hints.params, "8B");
        assert_eq!(hints.quantization, "Q4_K_M");
        assert_eq!(hints.context_length, Some(8_000));
    }

    #[tokio::test]
    async fn test_missing_base_returns_empty() {
        let models = service()
            .discover_models(Path::new("/definitely/not/a/models/dir"), None)
            .await;
        assert!(models.is_empty());
    }

    /// In-memory tree with injectable failures
    #[derive(Default)]
    struct FakeFs {
        dirs: HashMap<PathBuf, Vec<FsEntry>>,
        sizes: HashMap<PathBuf, u64>,
        texts: HashMap<PathBuf, String>,
        denied_dirs: HashSet<PathBuf>,
        gguf_files: HashSet<PathBuf>,
    }

    impl FakeFs {
        fn dir(mut self, path: &str, entries: &[(&str, bool)]) -> Self {
            let path = PathBuf::from(path);
            let entries = entries
                .iter()
                .map(|(name, is_dir)| FsEntry {
                    path: path.join(name),
                    is_dir: *is_dir,
                })
                .collect();
            self.dirs.insert(path, entries);
            self
        }

        fn file(mut self, path: &str, size: u64) -> Self {
            self.sizes.insert(PathBuf::from(path), size);
            self
        }

        fn deny(mut self, path: &str) -> Self {
            self.denied_dirs.insert(PathBuf::from(path));
            self
        }

        fn gguf(mut self, path: &str, size: u64) -> Self {
            self.gguf_files.insert(PathBuf::from(path));
            self.file(path, size)
        }
    }

    #[async_trait]
    impl ModelFs for FakeFs {
        async fn read_dir(&self, path: &Path) -> io::Result<Vec<FsEntry>> {
            if self.denied_dirs.contains(path) {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            self.dirs
                .get(path)
                .cloned()
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
        }

        async fn stat(&self, path: &Path) -> io::Result<u64> {
            self.sizes
                .get(path)
                .copied()
                .ok_or_else(|| io::Error::from(io::ErrorKind::PermissionDenied))
        }

        async fn read_to_string(&self, path: &Path) -> io::Result<String> {
            self.texts
                .get(path)
                .cloned()
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
        }

        async fn read_header(&self, _path: &Path) -> Option<ModelHeader> {
            None
        }

        async fn has_gguf_magic(&self, path: &Path) -> bool {
            self.gguf_files.contains(path)
        }
    }

    /// Collects `tracing` output on the current thread
    fn capture_tracing() -> (SharedBuffer, tracing::subscriber::DefaultGuard) {
        let buffer = SharedBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || writer.clone())
            .finish();
        (buffer, tracing::subscriber::set_default(subscriber))
    }

    #[tokio::test]
    async fn test_missing_sidecar_is_logged() {
        let fs = FakeFs::default()
            .dir("/models", &[("bare.bin", false)])
            .file("/models/bare.bin", 3);
        let service = ModelDiscoveryService::new(Arc::new(fs));

        let (logs, _guard) = capture_tracing();
        let models = service.discover_models(Path::new("/models"), None).await;
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].author, None);
        assert!(logs.contents().contains("No model metadata at /models/bare.json"));
    }

    #[tokio::test]
    async fn test_relative_base_yields_absolute_paths() {
        let cwd = std::env::current_dir().expect("cwd");
        let base = cwd.join("relative-models");
        let base_str = base.display().to_string();
        let file = base.join("tiny.bin");
        let fs = FakeFs::default()
            .dir(&base_str, &[("tiny.bin", false)])
            .file(&file.display().to_string(), 1);

        let service = ModelDiscoveryService::new(Arc::new(fs));
        let models = service.discover_models(Path::new("relative-models"), None).await;
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].path, file.display().to_string());
        assert!(Path::new(&models[0].path).is_absolute());
    }

    #[tokio::test]
    async fn test_is_valid_model_file() {
        let fs = FakeFs::default()
            .gguf("/models/good.gguf", 10)
            .file("/models/fake.gguf", 10)
            .file("/models/weights.bin", 10)
            .gguf("/models/mmproj-f16.gguf", 10)
            .file("/models/_scratch.bin", 10);
        let service = ModelDiscoveryService::new(Arc::new(fs));

        assert!(service.is_valid_model_file(Path::new("/models/good.gguf")).await);
        assert!(service.is_valid_model_file(Path::new("/models/weights.bin")).await);
        assert!(!service.is_valid_model_file(Path::new("/models/fake.gguf")).await);
        assert!(!service.is_valid_model_file(Path::new("/models/mmproj-f16.gguf")).await);
        assert!(!service.is_valid_model_file(Path::new("/models/_scratch.bin")).await);
        assert!(!service.is_valid_model_file(Path::new("/models/missing.gguf")).await);
    }

    #[tokio::test]
    async fn test_unreadable_subtree_is_skipped() {
        let fs = FakeFs::default()
            .dir("/models", &[("locked", true), ("open", true), ("root.bin", false)])
            .deny("/models/locked")
            .dir("/models/open", &[("inner.bin", false)])
            .file("/models/root.bin", 10)
            .file("/models/open/inner.bin", 20);

        let service = ModelDiscoveryService::new(Arc::new(fs));
        let models = service.discover_models(Path::new("/models"), None).await;
        assert_eq!(names(&models), HashSet::from(["root".to_string(), "inner".to_string()]));
    }

    #[tokio::test]
    async fn test_unstattable_file_is_skipped() {
        let fs = FakeFs::default()
            .dir("/models", &[("ok.bin", false), ("hidden.bin", false)])
            .file("/models/ok.bin", 1);

        let service = ModelDiscoveryService::new(Arc::new(fs));
        let models = service.discover_models(Path::new("/models"), None).await;
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name, "ok");
        assert_eq!(models[0].author, None);
    }

    #[test]
    fn test_validate_empty_config() {
        let result = validate_model_config(&json!({}));
        assert!(!result.valid);
        assert_eq!(
            result.errors,
            Some(vec![
                "Model name is required".to_string(),
                "Model path is required".to_string()
            ])
        );
    }

    #[test]
    fn test_validate_accepts_empty_path() {
        let result = validate_model_config(&json!({"name": "llama", "path": ""}));
        assert!(result.valid);
        assert_eq!(result.errors, None);
    }

    #[test]
    fn test_validate_rejects_non_string_path_and_blank_name() {
        let result = validate_model_config(&json!({"name": "", "path": 42}));
        assert_eq!(result.errors.map(|e| e.len()), Some(2));

        let result = validate_model_config(&json!({"name": null, "path": "/m.gguf"}));
        assert_eq!(result.errors, Some(vec!["Model name is required".to_string()]));
    }

    #[test]
    fn test_default_parameters() {
        let params = default_parameters();
        assert_eq!(params.temperature, 0.7);
        assert_eq!(params.top_p, 0.9);
        assert_eq!(params.repeat_penalty, 1.1);
        assert_eq!(params.max_tokens, 2048);
        assert_eq!(params.presence_penalty, 0.0);
        assert_eq!(params.frequency_penalty, 0.0);
    }
}
