//! TOML configuration.
//!
//! Every section has defaults, so an installation without a config file
//! still works: the database lives under `~/.mandiao`, the runtime is
//! expected at `http://127.0.0.1:11434`, and the built-in model list is
//! used.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::registry::{ModelRegistry, DEFAULT_EMBEDDING_MODEL, DEFAULT_GENERATION_MODEL};
use crate::store::{is_sql_identifier, DistanceMetric};

/// Name of the per-installation application directory under `$HOME`.
pub const APP_DIR_NAME: &str = ".mandiao";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default)]
    pub metric: DistanceMetric,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            table: default_table(),
            metric: DistanceMetric::Cosine,
        }
    }
}

fn default_db_path() -> PathBuf {
    app_data_dir().join("mandiao.db")
}
fn default_table() -> String {
    "vec_items".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Explicit runtime executable; skips discovery when set.
    #[serde(default)]
    pub binary: Option<PathBuf>,
    /// Where the archive installer places the executable.
    #[serde(default)]
    pub install_dir: Option<PathBuf>,
    #[serde(default = "default_install_method")]
    pub install_method: String,
    #[serde(default = "default_archive_url")]
    pub archive_url: String,
    #[serde(default = "default_download_attempts")]
    pub download_attempts: u32,
    #[serde(default = "default_start_grace_secs")]
    pub start_grace_secs: u64,
    #[serde(default = "default_generation_model")]
    pub generation_model: String,
    /// Capability registry override. Empty means the built-in list.
    #[serde(default)]
    pub models: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            binary: None,
            install_dir: None,
            install_method: default_install_method(),
            archive_url: default_archive_url(),
            download_attempts: default_download_attempts(),
            start_grace_secs: default_start_grace_secs(),
            generation_model: default_generation_model(),
            models: Vec::new(),
        }
    }
}

fn default_endpoint() -> String {
    "http://127.0.0.1:11434".to_string()
}
fn default_install_method() -> String {
    "auto".to_string()
}
fn default_archive_url() -> String {
    "https://github.com/ollama/ollama/releases/latest/download/ollama-windows-amd64.zip".to_string()
}
fn default_download_attempts() -> u32 {
    3
}
fn default_start_grace_secs() -> u64 {
    5
}
fn default_generation_model() -> String {
    DEFAULT_GENERATION_MODEL.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Embedding endpoint base URL; defaults to the runtime endpoint.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            dims: default_dims(),
            url: None,
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}
fn default_dims() -> usize {
    768
}
fn default_batch_size() -> usize {
    16
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_window_chars")]
    pub window_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window_chars: default_window_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_window_chars() -> usize {
    800
}
fn default_overlap_chars() -> usize {
    80
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> i64 {
    3
}

/// Commented template written by `mandiao init`.
pub const CONFIG_TEMPLATE: &str = r#"# mandiao configuration. Every key is optional.

[db]
# path = "~/.mandiao/mandiao.db"
table = "vec_items"
metric = "cosine"

[runtime]
endpoint = "http://127.0.0.1:11434"
# binary = "/usr/local/bin/ollama"
# install_method: auto | archive | script | homebrew
install_method = "auto"
download_attempts = 3
start_grace_secs = 5
generation_model = "deepseek-r1:1.5b"
# models = ["deepseek-r1:1.5b", "EntropyYue/jina-embeddings-v2-base-zh"]

[embedding]
# provider: ollama | local | disabled
provider = "ollama"
model = "EntropyYue/jina-embeddings-v2-base-zh"
dims = 768
batch_size = 16
timeout_secs = 30

[chunking]
window_chars = 800
overlap_chars = 80

[retrieval]
top_k = 3
"#;

/// `~/.mandiao`, falling back to the working directory when `$HOME` is unknown.
pub fn app_data_dir() -> PathBuf {
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

/// Default config file location.
pub fn default_config_path() -> PathBuf {
    app_data_dir().join("config.toml")
}

impl Config {
    /// Capability registry: configured list (or built-in), plus the
    /// generation and embedding models this config actually uses.
    pub fn model_registry(&self) -> ModelRegistry {
        let mut registry = if self.runtime.models.is_empty() {
            ModelRegistry::builtin()
        } else {
            ModelRegistry::new(self.runtime.models.iter().cloned())
        };
        registry.require(&self.runtime.generation_model);
        if self.embedding.provider == "ollama" {
            registry.require(&self.embedding.model);
        }
        registry
    }

    /// Base URL used by the embedding client.
    pub fn embedding_url(&self) -> &str {
        self.embedding
            .url
            .as_deref()
            .unwrap_or(self.runtime.endpoint.as_str())
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.window_chars == 0 {
            bail!("chunking.window_chars must be > 0");
        }
        if self.chunking.overlap_chars >= self.chunking.window_chars {
            bail!("chunking.overlap_chars must be < chunking.window_chars");
        }

        if self.retrieval.top_k < 1 {
            bail!("retrieval.top_k must be >= 1");
        }

        if self.runtime.download_attempts == 0 {
            bail!("runtime.download_attempts must be >= 1");
        }
        if self.runtime.start_grace_secs > 60 {
            bail!("runtime.start_grace_secs must be <= 60");
        }
        match self.runtime.install_method.as_str() {
            "auto" | "archive" | "script" | "homebrew" => {}
            other => bail!(
                "Unknown runtime.install_method: '{}'. Must be auto, archive, script, or homebrew.",
                other
            ),
        }

        if self.embedding.dims == 0 {
            bail!("embedding.dims must be > 0");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        match self.embedding.provider.as_str() {
            "disabled" | "ollama" | "local" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, ollama, or local.",
                other
            ),
        }

        if !is_sql_identifier(&self.db.table) {
            bail!(
                "db.table must be an identifier (ASCII letters, digits, '_'; not starting with a digit): '{}'",
                self.db.table
            );
        }

        Ok(())
    }
}

/// Load and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

/// Resolve the effective configuration.
///
/// An explicit path must exist. Without one, the default location is used
/// when present, otherwise built-in defaults.
pub fn resolve_config(explicit: Option<&Path>) -> Result<Config> {
    match explicit {
        Some(path) => load_config(path),
        None => {
            let path = default_config_path();
            if path.exists() {
                load_config(&path)
            } else {
                let config = Config::default();
                config.validate()?;
                Ok(config)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.chunking.window_chars, 800);
        assert_eq!(config.chunking.overlap_chars, 80);
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.embedding.dims, 768);
        assert_eq!(config.db.metric, DistanceMetric::Cosine);
        assert!(config.db.path.ends_with("mandiao.db"));
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.runtime.endpoint, "http://127.0.0.1:11434");
        assert_eq!(config.runtime.download_attempts, 3);
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            [db]
            path = "/tmp/x.db"
            metric = "l2"

            [runtime]
            models = ["llama3"]
            generation_model = "llama3"
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.db.table, "vec_items");
        assert_eq!(config.db.metric, DistanceMetric::L2);
        assert_eq!(
            config.model_registry().models(),
            &["llama3".to_string(), DEFAULT_EMBEDDING_MODEL.to_string()]
        );
    }

    #[test]
    fn overlap_must_be_smaller_than_window() {
        let mut config = Config::default();
        config.chunking.overlap_chars = 800;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_provider_rejected() {
        let mut config = Config::default();
        config.embedding.provider = "openai".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("Unknown embedding provider"));
    }

    #[test]
    fn table_name_must_be_identifier() {
        for bad in ["", "vec items; DROP", "vec-items", "1abc"] {
            let mut config = Config::default();
            config.db.table = bad.to_string();
            assert!(config.validate().is_err(), "{bad:?} accepted");
        }
        let mut config = Config::default();
        config.db.table = "_docs2".to_string();
        config.validate().unwrap();
    }

    #[test]
    fn grace_period_is_bounded() {
        let mut config = Config::default();
        config.runtime.start_grace_secs = 600;
        assert!(config.validate().is_err());
    }

    #[test]
    fn embedding_url_falls_back_to_runtime() {
        let mut config = Config::default();
        assert_eq!(config.embedding_url(), "http://127.0.0.1:11434");
        config.embedding.url = Some("http://embed:1".to_string());
        assert_eq!(config.embedding_url(), "http://embed:1");
    }

    #[test]
    fn template_parses_and_validates() {
        let config: Config = toml::from_str(CONFIG_TEMPLATE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.embedding.model, DEFAULT_EMBEDDING_MODEL);
    }
}
