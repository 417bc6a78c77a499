//! TOML configuration parsing and validation.
//!
//! Every section except `[data]` has defaults, so a minimal config file is:
//!
//! ```toml
//! [data]
//! root = "./data"
//! ```
//!
//! Secrets never live in the file: the OpenAI providers read
//! `OPENAI_API_KEY` (and optionally `OPENAI_BASE_URL`) from the environment.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub data: DataConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub query_log: QueryLogConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Default settings rooted at `root`.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            data: DataConfig { root: root.into() },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            query_log: QueryLogConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    /// Directory holding the index database, uploads and query logs.
    pub root: PathBuf,
}

impl DataConfig {
    pub fn index_path(&self) -> PathBuf {
        self.root.join("index.sqlite")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    pub fn query_logs_dir(&self) -> PathBuf {
        self.root.join("query_logs")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default = "default_max_k")]
    pub max_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            max_k: default_max_k(),
        }
    }
}

impl RetrievalConfig {
    /// Resolves a requested result count, defaulting to `default_k`.
    /// Anything outside `1..=max_k` is rejected before a query runs.
    pub fn resolve_k(&self, requested: Option<usize>) -> Result<usize> {
        let k = requested.unwrap_or(self.default_k);
        if k == 0 || k > self.max_k {
            anyhow::bail!("max_results must be between 1 and {}", self.max_k);
        }
        Ok(k)
    }
}

fn default_k() -> usize {
    4
}
fn default_max_k() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            temperature: 0.0,
            max_retries: default_generation_retries(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_generation_provider() -> String {
    "disabled".to_string()
}
fn default_generation_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_generation_retries() -> u32 {
    3
}
fn default_generation_timeout() -> u64 {
    60
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryLogConfig {
    /// Latency under which a query counts as "within target" in the logs.
    #[serde(default = "default_latency_target")]
    pub latency_target_secs: f64,
}

impl Default for QueryLogConfig {
    fn default() -> Self {
        Self {
            latency_target_secs: default_latency_target(),
        }
    }
}

fn default_latency_target() -> f64 {
    3.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Checks cross-field constraints that serde cannot express.
pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    if config.retrieval.default_k == 0 || config.retrieval.max_k == 0 {
        anyhow::bail!("retrieval.default_k and retrieval.max_k must be >= 1");
    }
    if config.retrieval.default_k > config.retrieval.max_k {
        anyhow::bail!("retrieval.default_k must not exceed retrieval.max_k");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "hash" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or hash.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    match config.generation.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if !(0.0..=2.0).contains(&config.generation.temperature) {
        anyhow::bail!("generation.temperature must be in [0.0, 2.0]");
    }

    if config.query_log.latency_target_secs <= 0.0 {
        anyhow::bail!("query_log.latency_target_secs must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Config {
        toml::from_str(s).unwrap()
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = parse("[data]\nroot = \"/tmp/askaccess\"\n");
        assert_eq!(cfg.chunking.chunk_size, 1000);
        assert_eq!(cfg.chunking.chunk_overlap, 200);
        assert_eq!(cfg.retrieval.default_k, 4);
        assert_eq!(cfg.generation.temperature, 0.0);
        assert_eq!(cfg.query_log.latency_target_secs, 3.0);
        assert!(!cfg.embedding.is_enabled());
        assert!(!cfg.generation.is_enabled());
        assert!(validate(&cfg).is_ok());
        assert_eq!(
            cfg.data.index_path(),
            PathBuf::from("/tmp/askaccess/index.sqlite")
        );
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let cfg = parse(
            "[data]\nroot = \"d\"\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n",
        );
        let err = validate(&cfg).unwrap_err().to_string();
        assert!(err.contains("chunk_overlap"), "{}", err);
    }

    #[test]
    fn test_openai_embedding_requires_model_and_dims() {
        let cfg = parse("[data]\nroot = \"d\"\n[embedding]\nprovider = \"openai\"\n");
        assert!(validate(&cfg).is_err());

        let cfg = parse(
            "[data]\nroot = \"d\"\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\ndims = 1536\n",
        );
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn test_unknown_providers_rejected() {
        let cfg = parse("[data]\nroot = \"d\"\n[embedding]\nprovider = \"magic\"\n");
        assert!(validate(&cfg).is_err());

        let cfg = parse("[data]\nroot = \"d\"\n[generation]\nprovider = \"magic\"\n");
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_resolve_k_bounds() {
        let retrieval = RetrievalConfig {
            default_k: 4,
            max_k: 10,
        };
        assert_eq!(retrieval.resolve_k(None).unwrap(), 4);
        assert_eq!(retrieval.resolve_k(Some(10)).unwrap(), 10);
        assert!(retrieval.resolve_k(Some(0)).is_err());
        let err = retrieval.resolve_k(Some(11)).unwrap_err().to_string();
        assert_eq!(err, "max_results must be between 1 and 10");
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
