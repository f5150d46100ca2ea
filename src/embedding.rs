//! Embedding provider abstraction and the per-chunk embedding client.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]**: always fails; every chunk is stored with a NULL vector.
//! - **[`OpenAIProvider`]**: calls an OpenAI-compatible `/v1/embeddings` endpoint.
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed` endpoint.
//!
//! [`EmbeddingClient`] wraps a provider with model resolution, a per-call
//! timeout, and response validation. Every failure it reports is an
//! [`EmbedError`]; the ingestion pipeline treats all of them as soft.
//!
//! # Retry Strategy
//!
//! The HTTP providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! The client's timeout bounds the whole call, retries included.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{EmbeddingConfig, DEFAULT_EMBED_MODEL};

/// Why a chunk did not get a vector.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding provider is disabled")]
    Disabled,
    #[error("embedding request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("embedding transport error: {0}")]
    Transport(String),
    #[error("embedding call timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed embedding response: {0}")]
    Malformed(String),
}

/// A backend that turns one text into one vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Short provider name for logs (e.g. `"openai"`).
    fn name(&self) -> &str;

    /// Embed a single text with the given model.
    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, EmbedError>;
}

// ============ Embedding client ============

/// Resolves the model, bounds each call with a timeout, and validates the
/// returned vector.
#[derive(Clone)]
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    default_model: Option<String>,
    dims: Option<usize>,
    timeout: Duration,
}

impl EmbeddingClient {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self {
            provider,
            default_model: config.model.clone().filter(|m| !m.trim().is_empty()),
            dims: config.dims,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Build the client for the provider named in `config`.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self::new(create_provider(config)?, config))
    }

    /// Replace the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Expected vector length, when configured.
    pub fn dims(&self) -> Option<usize> {
        self.dims
    }

    /// Model id for a call: explicit override, then the configured model,
    /// then [`DEFAULT_EMBED_MODEL`]. Blank values are skipped.
    pub fn resolve_model(&self, override_model: Option<&str>) -> String {
        override_model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .or_else(|| self.default_model.clone())
            .unwrap_or_else(|| DEFAULT_EMBED_MODEL.to_string())
    }

    /// Embed one chunk's text.
    pub async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, EmbedError> {
        let vector = tokio::time::timeout(self.timeout, self.provider.embed(model, text))
            .await
            .map_err(|_| EmbedError::Timeout(self.timeout))??;

        if vector.is_empty() {
            return Err(EmbedError::Malformed("empty vector".to_string()));
        }
        if let Some(dims) = self.dims {
            if vector.len() != dims {
                return Err(EmbedError::Malformed(format!(
                    "expected {} dimensions, got {}",
                    dims,
                    vector.len()
                )));
            }
        }
        Ok(vector)
    }
}

// ============ Disabled Provider ============

/// A no-op provider that always fails.
///
/// Used when `embedding.provider = "disabled"`. Ingestion still succeeds;
/// every chunk is stored with a NULL vector.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn embed(&self, _model: &str, _text: &str) -> Result<Vec<f32>, EmbedError> {
        Err(EmbedError::Disabled)
    }
}

// ============ OpenAI Provider ============

/// Provider for OpenAI-compatible embedding APIs.
///
/// Posts `{"model", "input": [text]}` to `{url}/v1/embeddings`. The bearer
/// token comes from `OPENAI_API_KEY` when set; self-hosted gateways may not
/// need one.
pub struct OpenAIProvider {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    max_retries: u32,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());
        Ok(Self {
            client: http_client(config)?,
            url: url.trim_end_matches('/').to_string(),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, EmbedError> {
        let body = serde_json::json!({
            "model": model,
            "input": [text],
        });
        let mut request = self
            .client
            .post(format!("{}/v1/embeddings", self.url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let json = send_with_retry(request, self.max_retries).await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[0].embedding` from an OpenAI embeddings response.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f32>, EmbedError> {
    let first = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .ok_or_else(|| EmbedError::Malformed("missing data array".to_string()))?;
    let values = first
        .get("embedding")
        .and_then(|e| e.as_array())
        .ok_or_else(|| EmbedError::Malformed("missing embedding".to_string()))?;
    to_f32_vec(values)
}

// ============ Ollama Provider ============

/// Provider for a local Ollama instance (`POST {url}/api/embed`).
pub struct OllamaProvider {
    client: reqwest::Client,
    url: String,
    max_retries: u32,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            client: http_client(config)?,
            url: url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, EmbedError> {
        let body = serde_json::json!({
            "model": model,
            "input": [text],
        });
        let request = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body);
        let json = send_with_retry(request, self.max_retries).await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<f32>, EmbedError> {
    let values = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
        .and_then(|e| e.as_array())
        .ok_or_else(|| EmbedError::Malformed("missing embeddings array".to_string()))?;
    to_f32_vec(values)
}

// ============ Shared HTTP plumbing ============

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

fn to_f32_vec(values: &[serde_json::Value]) -> Result<Vec<f32>, EmbedError> {
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EmbedError::Malformed(format!("non-numeric component: {}", v)))
        })
        .collect()
}

/// Send a JSON request, retrying 429, 5xx and network errors with
/// exponential backoff.
async fn send_with_retry(
    request: reqwest::RequestBuilder,
    max_retries: u32,
) -> Result<serde_json::Value, EmbedError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let Some(req) = request.try_clone() else {
            return Err(EmbedError::Transport("request body is not cloneable".to_string()));
        };

        match req.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| EmbedError::Malformed(e.to_string()));
                }

                let message = response.text().await.unwrap_or_default();
                let err = EmbedError::Rejected {
                    status: status.as_u16(),
                    message,
                };

                // Rate limited or server error, retry
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(err);
                    continue;
                }

                return Err(err);
            }
            Err(e) => {
                last_err = Some(EmbedError::Transport(e.to_string()));
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| EmbedError::Transport("embedding failed after retries".to_string())))
}

/// Create the provider named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}
