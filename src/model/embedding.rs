//! Embedding client and the semantic-similarity oracle.
//!
//! The engine never compares observation strings literally: both reward
//! computation and trajectory verification go through a [`SimilarityOracle`]
//! that scores semantic closeness. The production implementation embeds both
//! string lists in one batched call against an OpenAI-compatible
//! `/embeddings` endpoint and returns the cosine-similarity matrix.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// A single embedding object returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmbeddingObject {
    /// Index within the request batch.
    index: usize,
    /// The embedding vector.
    embedding: Vec<f64>,
}

/// Token usage for an embedding request.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmbeddingUsage {
    prompt_tokens: usize,
    total_tokens: usize,
}

/// Top-level response from the embeddings API.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingObject>,
    usage: EmbeddingUsage,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for an OpenAI-compatible embeddings API.
#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    model_id: String,
}

impl EmbeddingClient {
    /// Create a new client.
    ///
    /// * `base_url` -- API base URL (e.g. `"https://api.openai.com/v1"`).
    /// * `api_key`  -- Bearer token for authentication.
    /// * `model_id` -- Embedding model identifier.
    pub fn new(base_url: &str, api_key: &str, model_id: &str) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("failed to build reqwest client for embedding");

        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model_id: model_id.to_string(),
        }
    }

    /// Get embedding vectors for a batch of texts, in input order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.base_url);
        debug!(
            model = %self.model_id,
            batch_size = texts.len(),
            "embedding batch"
        );

        let body = serde_json::json!({
            "model": self.model_id,
            "input": texts,
        });

        let resp = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to send batch embedding request")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("batch embedding API returned {status}: {text}");
        }

        let emb_resp: EmbeddingResponse = resp
            .json()
            .await
            .context("failed to parse batch embedding response")?;

        // The API may return objects out of order; sort by index.
        let mut sorted = emb_resp.data;
        sorted.sort_by_key(|e| e.index);

        let embeddings: Vec<Vec<f64>> = sorted.into_iter().map(|e| e.embedding).collect();

        info!(
            model = %self.model_id,
            batch_size = embeddings.len(),
            dim = embeddings.first().map(|v| v.len()).unwrap_or(0),
            "batch embedding computed"
        );

        Ok(embeddings)
    }
}

// ---------------------------------------------------------------------------
// Similarity oracle
// ---------------------------------------------------------------------------

/// The semantic-similarity contract consumed by reward computation and
/// trajectory verification.
///
/// Returns a `sources.len() x targets.len()` matrix of scores. Cosine
/// similarity is nominally in `[-1, 1]` but concentrates in `[0, 1]` for
/// natural-language observations.
#[allow(async_fn_in_trait)]
pub trait SimilarityOracle: Send + Sync {
    /// Score every source string against every target string.
    async fn similarity(&self, sources: &[String], targets: &[String]) -> Result<Vec<Vec<f64>>>;
}

/// The maximum entry of a similarity matrix, or 0.0 for an empty one.
pub fn max_score(matrix: &[Vec<f64>]) -> f64 {
    matrix
        .iter()
        .flat_map(|row| row.iter().copied())
        .fold(0.0_f64, f64::max)
}

/// Computes the cosine similarity between two vectors.
///
/// Returns 0.0 if either vector is the zero vector (to avoid division by
/// zero) or if the lengths differ.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// [`SimilarityOracle`] backed by an [`EmbeddingClient`].
///
/// Both string lists are embedded in a single batched API call; the matrix is
/// then pure cosine arithmetic.
#[derive(Debug, Clone)]
pub struct EmbeddingSimilarity {
    client: EmbeddingClient,
}

impl EmbeddingSimilarity {
    /// Wrap an embedding client.
    pub fn new(client: EmbeddingClient) -> Self {
        Self { client }
    }
}

impl SimilarityOracle for EmbeddingSimilarity {
    async fn similarity(&self, sources: &[String], targets: &[String]) -> Result<Vec<Vec<f64>>> {
        if sources.is_empty() || targets.is_empty() {
            return Ok(Vec::new());
        }

        let mut batch: Vec<String> = Vec::with_capacity(sources.len() + targets.len());
        batch.extend_from_slice(sources);
        batch.extend_from_slice(targets);

        let embeddings = self
            .client
            .embed_batch(&batch)
            .await
            .context("failed to embed similarity batch")?;

        let (source_embs, target_embs) = embeddings.split_at(sources.len());

        let matrix = source_embs
            .iter()
            .map(|s| target_embs.iter().map(|t| cosine_similarity(s, t)).collect())
            .collect();

        Ok(matrix)
    }
}
