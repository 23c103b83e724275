//! HTTP embedding providers.
//!
//! Implements the core [`Embedder`] trait for:
//! - **[`OpenAIEmbedder`]**: `POST {url}/embeddings` (default
//!   `https://api.openai.com/v1`), key from `OPENAI_API_KEY`.
//! - **[`OllamaEmbedder`]**: `POST {url}/api/embed` on a local Ollama
//!   instance (default `http://localhost:11434`).
//!
//! Use [`create_embedder`] to build the provider named in the configuration;
//! `provider = "disabled"` yields `None` and retrieval runs sparse-only.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use course_context_core::embedding::{Embedder, EmbeddingResult};
use course_context_core::error::EmbeddingError;

use crate::config::EmbeddingConfig;

/// Build the embedder named by `config.provider`.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Option<Arc<dyn Embedder>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "openai" => Ok(Some(Arc::new(OpenAIEmbedder::new(config)?))),
        "ollama" => Ok(Some(Arc::new(OllamaEmbedder::new(config)?))),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Settings shared by both HTTP providers.
struct HttpSettings {
    model: String,
    dims: usize,
    client: reqwest::Client,
    max_retries: u32,
}

impl HttpSettings {
    fn from_config(config: &EmbeddingConfig, provider: &str) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for {} provider", provider))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for {} provider", provider))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model,
            dims,
            client,
            max_retries: config.max_retries,
        })
    }

    /// Reject responses that do not line up with the request.
    fn check(&self, texts: &[String], vectors: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                got: vectors.len(),
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(EmbeddingError::Provider(format!(
                "model {} returned {} dimensions, expected {}",
                self.model,
                bad.len(),
                self.dims
            )));
        }
        Ok(vectors)
    }
}

/// Send `build()` until it succeeds, retrying rate limits, server errors,
/// and network failures with exponential backoff.
async fn send_with_retry<F>(label: &str, max_retries: u32, build: F) -> Result<serde_json::Value>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(provider = label, attempt, delay_secs = delay.as_secs(), "retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!("{} API error {}: {}", label, status, body_text));
                    continue;
                }

                // Client error (not 429): fail now
                let body_text = response.text().await.unwrap_or_default();
                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!("{} connection error: {}", label, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} embedding failed after retries", label)))
}

fn first(vectors: Vec<Vec<f32>>) -> EmbeddingResult {
    vectors
        .into_iter()
        .next()
        .ok_or_else(|| EmbeddingError::Provider("Empty embedding response".to_string()))
}

// ============ OpenAI ============

/// Embedding provider using the OpenAI embeddings API.
pub struct OpenAIEmbedder {
    http: HttpSettings,
    api_key: String,
    url: String,
}

impl OpenAIEmbedder {
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set in config, or if
    /// `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let http = HttpSettings::from_config(config, "OpenAI")?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Ok(Self { http, api_key, url })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.http.model,
            "input": texts,
        });
        let endpoint = format!("{}/embeddings", self.url.trim_end_matches('/'));
        let json = send_with_retry("OpenAI", self.http.max_retries, || {
            self.http
                .client
                .post(&endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
        })
        .await?;
        parse_openai_response(&json)
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.http.model
    }

    async fn embed(&self, text: &str) -> EmbeddingResult {
        first(self.embed_batch(&[text.to_string()]).await?)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self
            .request(texts)
            .await
            .map_err(|e| EmbeddingError::Provider(e.to_string()))?;
        self.http.check(texts, vectors)
    }
}

/// Parse `data[].embedding`, ordered by each item's `index` when present.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, to_vector(embedding)));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Embedding provider using a local Ollama instance.
///
/// Requires Ollama to be running with an embedding model pulled (e.g.
/// `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    http: HttpSettings,
    url: String,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let http = HttpSettings::from_config(config, "Ollama")?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self { http, url })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.http.model,
            "input": texts,
        });
        let endpoint = format!("{}/api/embed", self.url.trim_end_matches('/'));
        let json = send_with_retry("Ollama", self.http.max_retries, || {
            self.http
                .client
                .post(&endpoint)
                .header("Content-Type", "application/json")
                .json(&body)
        })
        .await
        .map_err(|e| anyhow::anyhow!("{} (is Ollama running at {}?)", e, self.url))?;
        parse_ollama_response(&json)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.http.model
    }

    async fn embed(&self, text: &str) -> EmbeddingResult {
        first(self.embed_batch(&[text.to_string()]).await?)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self
            .request(texts)
            .await
            .map_err(|e| EmbeddingError::Provider(e.to_string()))?;
        self.http.check(texts, vectors)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .map(|values| to_vector(values))
                .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

fn to_vector(values: &[serde_json::Value]) -> Vec<f32> {
    values.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect()
}
