//! Embedding client and vector utilities.
//!
//! [`Embedder`] is the seam between the pipeline and the embedding provider;
//! [`OpenAiEmbedder`] is the production implementation, calling the OpenAI
//! embeddings API in fixed-size batches with exponential backoff for
//! transient failures.
//!
//! Batch semantics: inputs are never reordered, and the output is aligned
//! one-to-one with the input. A failure in any batch aborts the whole call;
//! callers require the full aligned mapping for metadata association, so
//! there is no partial-success return.
//!
//! Retry strategy (matching the rest of the provider transports):
//! - HTTP 429 and 5xx → retry with exponential backoff (1s, 2s, 4s, ... capped)
//! - other 4xx → fail immediately
//! - network errors → retry

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::config::EmbeddingConfig;

/// Default API endpoint; overridable for tests and proxies.
pub const OPENAI_API_BASE: &str = "https://api.openai.com";

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("OPENAI_API_KEY environment variable not set")]
    MissingApiKey,
    #[error("embedding request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("embedding API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("malformed embedding response: {0}")]
    Malformed(String),
}

/// Batch embedding interface.
///
/// Implementations must return exactly one vector per input text, in input
/// order, or an error.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
}

/// Embed a single query string as a one-element batch.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>, EmbeddingError> {
    let mut vectors = embedder.embed(std::slice::from_ref(&text.to_string())).await?;
    match vectors.len() {
        1 => Ok(vectors.remove(0)),
        n => Err(EmbeddingError::Malformed(format!(
            "expected 1 query vector, got {n}"
        ))),
    }
}

/// Embedding provider backed by the OpenAI `/v1/embeddings` endpoint.
pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiEmbedder {
    /// Build a client from configuration. Requires `OPENAI_API_KEY`.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let api_key =
            std::env::var("OPENAI_API_KEY").map_err(|_| EmbeddingError::MissingApiKey)?;
        Self::new(config, api_key)
    }

    pub fn new(config: &EmbeddingConfig, api_key: String) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            api_key,
            base_url: OPENAI_API_BASE.to_string(),
            client,
        })
    }

    /// Point the client at a different endpoint (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let url = format!("{}/v1/embeddings", self.base_url);

        let mut last_err: Option<EmbeddingError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_embedding_response(&json, texts.len());
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let api_err = EmbeddingError::Api {
                        status: status.as_u16(),
                        body: body_text,
                    };

                    // Rate limits and server errors are transient.
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(api_err);
                        continue;
                    }
                    return Err(api_err);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            EmbeddingError::Malformed("embedding failed after retries".to_string())
        }))
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let batch_vectors = self.embed_batch(batch).await?;
            vectors.extend(batch_vectors);
        }
        Ok(vectors)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

/// Parse the embeddings API response, placing each vector at its reported
/// `index` so the output stays aligned with the input batch.
fn parse_embedding_response(
    json: &serde_json::Value,
    expected: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbeddingError::Malformed("missing data array".to_string()))?;

    if data.len() != expected {
        return Err(EmbeddingError::Malformed(format!(
            "expected {expected} embeddings, got {}",
            data.len()
        )));
    }

    let mut vectors: Vec<Option<Vec<f32>>> = vec![None; expected];

    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        if index >= expected {
            return Err(EmbeddingError::Malformed(format!(
                "embedding index {index} out of range"
            )));
        }

        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EmbeddingError::Malformed("missing embedding".to_string()))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        vectors[index] = Some(vec);
    }

    vectors
        .into_iter()
        .map(|v| v.ok_or_else(|| EmbeddingError::Malformed("duplicate embedding index".to_string())))
        .collect()
}

// ============ Vector utilities ============

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1, 1]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_round_trip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn cosine_identical_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn response_parsed_in_index_order() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [2.0, 2.0]},
                {"index": 0, "embedding": [1.0, 1.0]},
            ]
        });
        let vectors = parse_embedding_response(&json, 2).unwrap();
        assert_eq!(vectors[0], vec![1.0, 1.0]);
        assert_eq!(vectors[1], vec![2.0, 2.0]);
    }

    #[test]
    fn response_length_mismatch_is_malformed() {
        let json = serde_json::json!({
            "data": [{"index": 0, "embedding": [1.0]}]
        });
        assert!(matches!(
            parse_embedding_response(&json, 2),
            Err(EmbeddingError::Malformed(_))
        ));
    }

    #[test]
    fn missing_data_array_is_malformed() {
        let json = serde_json::json!({"error": "nope"});
        assert!(matches!(
            parse_embedding_response(&json, 1),
            Err(EmbeddingError::Malformed(_))
        ));
    }
}
