//! TOML configuration parsing.
//!
//! All settings live in a single file (default `./config/kb.toml`). Every
//! section except `[db]` is optional and falls back to the defaults below.
//!
//! ```toml
//! [db]
//! path = "./data/kb.sqlite"
//!
//! [chunking]
//! chunk_chars = 2000
//! overlap_chars = 300
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-large"
//! dims = 1024
//!
//! [ingest]
//! default_tenant = "default"
//! reingest = "append"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::store::VectorEncoding;

/// Model used when neither the caller nor the config names one.
pub const DEFAULT_EMBED_MODEL: &str = "cohere.embed-english-v3.0";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_chars: default_chunk_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_chunk_chars() -> usize {
    2000
}
fn default_overlap_chars() -> usize {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: Option<usize>,
    /// Base URL for HTTP providers. `openai` defaults to
    /// `https://api.openai.com`, `ollama` to `http://localhost:11434`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-chunk budget for one embedding call, retries included.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Vector encodings tried in order before falling back to a NULL row.
    #[serde(default = "default_encodings")]
    pub encodings: Vec<VectorEncoding>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: default_dims(),
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            encodings: default_encodings(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_dims() -> Option<usize> {
    Some(1024)
}
fn default_max_retries() -> u32 {
    2
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_encodings() -> Vec<VectorEncoding> {
    vec![VectorEncoding::Blob, VectorEncoding::Json]
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// What to do with existing chunks when a document is ingested again.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReingestPolicy {
    /// Append a fresh chunk set; earlier sets stay in place.
    #[default]
    Append,
    /// Delete the document's chunks and embeddings inside the ingest
    /// transaction, then insert the new set.
    Replace,
    /// Leave everything untouched when the stored content hash matches.
    SkipUnchanged,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_tenant")]
    pub default_tenant: String,
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
    #[serde(default)]
    pub reingest: ReingestPolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            default_tenant: default_tenant(),
            max_text_chars: default_max_text_chars(),
            reingest: ReingestPolicy::default(),
        }
    }
}

fn default_tenant() -> String {
    "default".to_string()
}
fn default_max_text_chars() -> usize {
    400_000
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
    "127.0.0.1:7341".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_chars == 0 {
        anyhow::bail!("chunking.chunk_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.chunk_chars {
        anyhow::bail!("chunking.overlap_chars must be < chunking.chunk_chars");
    }

    if config.ingest.default_tenant.trim().is_empty() {
        anyhow::bail!("ingest.default_tenant must not be blank");
    }
    if config.ingest.max_text_chars == 0 {
        anyhow::bail!("ingest.max_text_chars must be > 0");
    }

    if config.embedding.dims == Some(0) {
        anyhow::bail!("embedding.dims must be > 0 when set");
    }
    if config.embedding.timeout_secs == 0 {
        anyhow::bail!("embedding.timeout_secs must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(())
}
