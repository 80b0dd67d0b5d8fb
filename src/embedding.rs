//! Embedding capability and backends.
//!
//! Callers depend only on the [`Embedder`] trait; [`create_embedder`] picks
//! the backend from `[embedding] provider`:
//!
//! | Config Value | Backend |
//! |-------------|----------|
//! | `"ollama"` | [`OllamaEmbedder`]: `POST /api/embed` on the local runtime |
//! | `"local"` | `LocalEmbedder`: in-process fastembed (feature `local-embeddings-fastembed`) |
//! | `"disabled"` | [`DisabledEmbedder`]: every call fails |
//!
//! Failures are never retried here. Ingestion and retrieval surface them to
//! their caller as [`EmbeddingError`].

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::EmbeddingError;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;
    /// Vector width every returned embedding must have.
    fn dims(&self) -> usize;
    /// Embed a batch, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>, EmbeddingError> {
    embedder
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| EmbeddingError::Shape("empty embedding response".to_string()))
}

/// Embed `texts` in batches of at most `batch_size`.
pub async fn embed_batched(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        out.extend(embedder.embed(batch).await?);
    }
    Ok(out)
}

/// Check count and width of a backend response.
fn check_shape(
    vectors: Vec<Vec<f32>>,
    expected_count: usize,
    dims: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if vectors.len() != expected_count {
        return Err(EmbeddingError::Shape(format!(
            "expected {} embeddings, got {}",
            expected_count,
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(EmbeddingError::Shape(format!(
            "expected {} dimensions, got {}",
            dims,
            bad.len()
        )));
    }
    Ok(vectors)
}

// ============ Disabled ============

pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Disabled)
    }
}

// ============ Ollama ============

/// Embedding client for the local runtime's `POST /api/embed` endpoint.
pub struct OllamaEmbedder {
    http: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

/// `/api/embed` returns `embeddings`; older runtimes answer `embedding` for
/// a single input.
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
}

impl OllamaEmbedder {
    pub fn new(url: &str, model: &str, dims: usize, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dims,
        })
    }
}

fn parse_embed_response(body: &str) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let parsed: EmbedResponse = serde_json::from_str(body)
        .map_err(|e| EmbeddingError::Shape(format!("invalid JSON: {}", e)))?;
    match (parsed.embeddings, parsed.embedding) {
        (Some(batch), _) => Ok(batch),
        (None, Some(single)) => Ok(vec![single]),
        (None, None) => Err(EmbeddingError::Shape(
            "missing `embeddings` or `embedding` field".to_string(),
        )),
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let endpoint = format!("{}/api/embed", self.url);
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .http
            .post(&endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbeddingError::Unreachable {
                url: endpoint.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| EmbeddingError::Unreachable {
            url: endpoint.clone(),
            message: e.to_string(),
        })?;
        if !status.is_success() {
            return Err(EmbeddingError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let vectors = parse_embed_response(&text)?;
        tracing::debug!(count = vectors.len(), model = %self.model, "embedded batch");
        check_shape(vectors, texts.len(), self.dims)
    }
}

// ============ Local (fastembed) ============

/// In-process embeddings via fastembed. Models download from Hugging Face on
/// first use; no network afterwards.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEmbedder {
    model_name: String,
    model: fastembed::EmbeddingModel,
    dims: usize,
    batch_size: usize,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEmbedder {
    pub fn new(model_name: &str, dims: usize, batch_size: usize) -> Result<Self> {
        let model = match model_name {
            "all-minilm-l6-v2" => fastembed::EmbeddingModel::AllMiniLML6V2,
            "bge-base-en-v1.5" => fastembed::EmbeddingModel::BGEBaseENV15,
            "nomic-embed-text-v1.5" => fastembed::EmbeddingModel::NomicEmbedTextV15,
            "multilingual-e5-base" => fastembed::EmbeddingModel::MultilingualE5Base,
            other => bail!(
                "Unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-base-en-v1.5, nomic-embed-text-v1.5, multilingual-e5-base",
                other
            ),
        };
        Ok(Self {
            model_name: model_name.to_string(),
            model,
            dims,
            batch_size,
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let model = self.model.clone();
        let batch_size = self.batch_size;
        let inputs = texts.to_vec();
        let expected = texts.len();

        let vectors = tokio::task::spawn_blocking(move || {
            let mut model = fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(model).with_show_download_progress(false),
            )
            .map_err(|e| EmbeddingError::Backend(format!("model init failed: {}", e)))?;
            model
                .embed(inputs, Some(batch_size))
                .map_err(|e| EmbeddingError::Backend(e.to_string()))
        })
        .await
        .map_err(|e| EmbeddingError::Backend(e.to_string()))??;

        check_shape(vectors, expected, self.dims)
    }
}

/// Build the configured [`Embedder`].
pub fn create_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    let emb = &config.embedding;
    match emb.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(
            config.embedding_url(),
            &emb.model,
            emb.dims,
            Duration::from_secs(emb.timeout_secs),
        )?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::new(
            &emb.model,
            emb.dims,
            emb.batch_size,
        )?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
