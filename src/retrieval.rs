//! Retrieval service: query embedding, similarity search, and confidence
//! derivation.
//!
//! Confidence is derived from cosine distance as `max(0, 1 - distance)`,
//! rounded to three decimals. It is computed per request and never stored.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::embedding::{embed_query, Embedder, EmbeddingError};
use crate::models::RetrievalResult;
use crate::store::{VectorStore, VectorStoreError};

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Store(#[from] VectorStoreError),
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

pub struct RetrievalService {
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    max_results: usize,
}

impl RetrievalService {
    pub fn new(store: Arc<VectorStore>, embedder: Arc<dyn Embedder>, max_results: usize) -> Self {
        Self {
            store,
            embedder,
            max_results: max_results.max(1),
        }
    }

    /// Retrieve the `n_results` nearest chunks for `query`.
    ///
    /// `n_results` is clamped to `[1, max_results]`. A query that trims to
    /// empty short-circuits to no results without calling the embedder.
    pub async fn retrieve(
        &self,
        query: &str,
        n_results: usize,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let n_results = n_results.clamp(1, self.max_results);

        let query_vector = embed_query(self.embedder.as_ref(), query).await?;
        let hits = self.store.query_by_vector(&query_vector, n_results).await?;
        debug!(query_len = query.len(), hits = hits.len(), "retrieval complete");

        Ok(hits
            .into_iter()
            .map(|hit| {
                let distance = round3(hit.distance);
                RetrievalResult {
                    text: hit.text,
                    source_file: hit.metadata.source_file,
                    source_url: hit.metadata.source_url,
                    chunk_index: hit.metadata.chunk_index,
                    confidence: round3((1.0 - hit.distance).max(0.0)),
                    distance,
                }
            })
            .collect())
    }
}

// ============ CLI commands ============

pub async fn run_query(
    config: &crate::config::Config,
    text: &str,
    n_results: usize,
) -> anyhow::Result<()> {
    let store = Arc::new(
        VectorStore::open(&config.store.path, &config.store.collection).await?,
    );
    let embedder = Arc::new(crate::embedding::OpenAiEmbedder::from_config(
        &config.embedding,
    )?);
    let service = RetrievalService::new(store, embedder, config.retrieval.max_results);

    let results = service.retrieve(text, n_results).await?;
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in results.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} (chunk {})",
            i + 1,
            hit.confidence,
            hit.source_file,
            hit.chunk_index
        );
        let preview: String = hit.text.chars().take(160).collect();
        println!("   {preview}");
        if !hit.source_url.is_empty() {
            println!("   {}", hit.source_url);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkMetadata, ProcessedDocument};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedEmbedder {
        vector: Vec<f32>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![self.vector.clone(); texts.len()])
        }

        fn model_name(&self) -> &str {
            "fixed"
        }

        fn dims(&self) -> usize {
            self.vector.len()
        }
    }

    fn doc(texts_and_vectors: &[(&str, Vec<f32>)]) -> (ProcessedDocument, Vec<Vec<f32>>) {
        let mut chunks = Vec::new();
        let mut metadatas = Vec::new();
        let mut ids = Vec::new();
        let mut vectors = Vec::new();
        for (i, (text, vector)) in texts_and_vectors.iter().enumerate() {
            chunks.push(text.to_string());
            metadatas.push(ChunkMetadata {
                source_file: "facts.txt".to_string(),
                source_path: "/docs/facts.txt".to_string(),
                source_url: "https://example.org/facts".to_string(),
                chunk_index: i as i64,
                total_chunks: texts_and_vectors.len() as i64,
                file_type: "txt".to_string(),
                processed_at: "2026-01-01T00:00:00Z".to_string(),
                chunk_length: text.len() as i64,
                file_hash: "deadbeef".to_string(),
            });
            ids.push(format!("facts_deadbeef_{i:04}"));
            vectors.push(vector.clone());
        }
        (
            ProcessedDocument {
                chunks,
                metadatas,
                ids,
            },
            vectors,
        )
    }

    async fn temp_store() -> (tempfile::TempDir, Arc<VectorStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(&dir.path().join("store.sqlite"), "test")
            .await
            .unwrap();
        (dir, Arc::new(store))
    }

    #[tokio::test]
    async fn distance_of_0_05_gives_confidence_0_95() {
        let (_dir, store) = temp_store().await;
        // Unit vectors with cosine similarity exactly 0.95.
        let stored = vec![0.95f32, (1.0f32 - 0.95 * 0.95).sqrt()];
        let (doc, vectors) = doc(&[("The Earth is round.", stored)]);
        store.add_chunks(&doc, &vectors).await.unwrap();

        let embedder = Arc::new(FixedEmbedder {
            vector: vec![1.0, 0.0],
            calls: AtomicUsize::new(0),
        });
        let service = RetrievalService::new(store, embedder, 10);

        let results = service.retrieve("is the earth round", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!((results[0].confidence - 0.95).abs() < 1e-9);
        assert!((results[0].distance - 0.05).abs() < 1e-9);
    }

    #[tokio::test]
    async fn confidence_floors_at_zero() {
        let (_dir, store) = temp_store().await;
        let (doc, vectors) = doc(&[("opposite", vec![-1.0, 0.0])]);
        store.add_chunks(&doc, &vectors).await.unwrap();

        let embedder = Arc::new(FixedEmbedder {
            vector: vec![1.0, 0.0],
            calls: AtomicUsize::new(0),
        });
        let service = RetrievalService::new(store, embedder, 10);

        let results = service.retrieve("anything", 1).await.unwrap();
        assert_eq!(results[0].confidence, 0.0);
        assert!((results[0].distance - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn n_results_is_clamped_to_max() {
        let (_dir, store) = temp_store().await;
        let entries: Vec<(String, Vec<f32>)> = (0..5)
            .map(|i| (format!("chunk {i}"), vec![1.0, i as f32 * 0.01]))
            .collect();
        let borrowed: Vec<(&str, Vec<f32>)> =
            entries.iter().map(|(t, v)| (t.as_str(), v.clone())).collect();
        let (doc, vectors) = doc(&borrowed);
        store.add_chunks(&doc, &vectors).await.unwrap();

        let embedder = Arc::new(FixedEmbedder {
            vector: vec![1.0, 0.0],
            calls: AtomicUsize::new(0),
        });
        let service = RetrievalService::new(store, embedder, 3);

        let results = service.retrieve("q", 100).await.unwrap();
        assert_eq!(results.len(), 3);

        // Zero requests still return at least one result.
        let results = service.retrieve("q", 0).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn empty_query_skips_the_embedder() {
        let (_dir, store) = temp_store().await;
        let embedder = Arc::new(FixedEmbedder {
            vector: vec![1.0, 0.0],
            calls: AtomicUsize::new(0),
        });
        let service = RetrievalService::new(store, embedder.clone(), 10);

        let results = service.retrieve("   ", 5).await.unwrap();
        assert!(results.is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn results_sorted_by_ascending_distance() {
        let (_dir, store) = temp_store().await;
        let (doc, vectors) = doc(&[
            ("far", vec![0.0, 1.0]),
            ("near", vec![1.0, 0.0]),
            ("middle", vec![0.7, 0.7]),
        ]);
        store.add_chunks(&doc, &vectors).await.unwrap();

        let embedder = Arc::new(FixedEmbedder {
            vector: vec![1.0, 0.0],
            calls: AtomicUsize::new(0),
        });
        let service = RetrievalService::new(store, embedder, 10);

        let results = service.retrieve("q", 3).await.unwrap();
        let texts: Vec<&str> = results.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["near", "middle", "far"]);
        assert!(results[0].confidence >= results[1].confidence);
        assert!(results[1].confidence >= results[2].confidence);
    }
}
