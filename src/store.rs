//! SQLite-backed vector store.
//!
//! Chunks live in a single `chunks` table keyed by their deterministic id;
//! embeddings are stored as little-endian f32 BLOBs. Similarity search is a
//! full scan with in-process cosine scoring, which is the right trade-off at
//! this corpus scale (thousands of chunks, not millions).
//!
//! Distances are cosine distance, `1.0 - cosine_similarity`, so `0.0` means
//! identical direction and values near `2.0` mean opposite.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use thiserror::Error;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{ChunkMetadata, ProcessedDocument, StoreStats};

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("failed to create store directory {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("chunk/embedding count mismatch: {chunks} chunks, {embeddings} embeddings")]
    CountMismatch { chunks: usize, embeddings: usize },
    #[error("corrupt metadata for chunk {id}: {source}")]
    CorruptMetadata {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One stored chunk as returned by a similarity query, before confidence
/// derivation.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub distance: f64,
}

pub struct VectorStore {
    pool: SqlitePool,
    collection: String,
    location: PathBuf,
}

impl VectorStore {
    /// Open (or create) the store at `path`, ensuring the schema and the
    /// collection metadata row exist.
    pub async fn open(path: &Path, collection: &str) -> Result<Self, VectorStoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| VectorStoreError::Io {
                    path: parent.display().to_string(),
                    source,
                })?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            collection: collection.to_string(),
            location: path.to_path_buf(),
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), VectorStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                collection TEXT NOT NULL,
                text TEXT NOT NULL,
                source_file TEXT NOT NULL,
                metadata_json TEXT NOT NULL,
                embedding BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chunks_source_file ON chunks(collection, source_file)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collection_meta (
                collection TEXT PRIMARY KEY,
                description TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "INSERT INTO collection_meta (collection, description, created_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(collection) DO NOTHING",
        )
        .bind(&self.collection)
        .bind("Document chunks for fact checking")
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or replace chunks by id. Re-ingesting the same file with the
    /// same content is a no-op at the data level because ids are
    /// content-addressed.
    pub async fn add_chunks(
        &self,
        document: &ProcessedDocument,
        embeddings: &[Vec<f32>],
    ) -> Result<usize, VectorStoreError> {
        if document.chunks.len() != embeddings.len() {
            return Err(VectorStoreError::CountMismatch {
                chunks: document.chunks.len(),
                embeddings: embeddings.len(),
            });
        }
        if document.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;

        for i in 0..document.chunks.len() {
            let metadata_json = serde_json::to_string(&document.metadatas[i]).map_err(|source| {
                VectorStoreError::CorruptMetadata {
                    id: document.ids[i].clone(),
                    source,
                }
            })?;

            sqlx::query(
                r#"
                INSERT INTO chunks (id, collection, text, source_file, metadata_json, embedding)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(id) DO UPDATE SET
                    text = excluded.text,
                    source_file = excluded.source_file,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&document.ids[i])
            .bind(&self.collection)
            .bind(&document.chunks[i])
            .bind(&document.metadatas[i].source_file)
            .bind(metadata_json)
            .bind(vec_to_blob(&embeddings[i]))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(document.chunks.len())
    }

    /// Nearest chunks to `query` by cosine distance, ascending.
    pub async fn query_by_vector(
        &self,
        query: &[f32],
        n_results: usize,
    ) -> Result<Vec<ScoredChunk>, VectorStoreError> {
        let rows = sqlx::query(
            "SELECT id, text, metadata_json, embedding FROM chunks WHERE collection = ?1",
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let text: String = row.get("text");
            let metadata_json: String = row.get("metadata_json");
            let blob: Vec<u8> = row.get("embedding");

            let metadata: ChunkMetadata = serde_json::from_str(&metadata_json)
                .map_err(|source| VectorStoreError::CorruptMetadata {
                    id: id.clone(),
                    source,
                })?;

            let embedding = blob_to_vec(&blob);
            let distance = 1.0 - f64::from(cosine_similarity(query, &embedding));

            scored.push(ScoredChunk {
                id,
                text,
                metadata,
                distance,
            });
        }

        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        scored.truncate(n_results);
        Ok(scored)
    }

    /// Delete every chunk whose `source_file` matches exactly.
    /// Returns the number of rows removed.
    pub async fn delete_by_source_file(&self, source_file: &str) -> Result<u64, VectorStoreError> {
        let result = sqlx::query("DELETE FROM chunks WHERE collection = ?1 AND source_file = ?2")
            .bind(&self.collection)
            .bind(source_file)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Remove every chunk in the collection and reset its metadata, so the
    /// store behaves as freshly created.
    pub async fn clear(&self) -> Result<(), VectorStoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE collection = ?1")
            .bind(&self.collection)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO collection_meta (collection, description, created_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(collection) DO UPDATE SET created_at = excluded.created_at",
        )
        .bind(&self.collection)
        .bind("Document chunks for fact checking")
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64, VectorStoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM chunks WHERE collection = ?1")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    pub async fn stats(&self) -> Result<StoreStats, VectorStoreError> {
        Ok(StoreStats {
            total_chunks: self.count().await?,
            collection_name: self.collection.clone(),
            location: self.location.display().to_string(),
        })
    }

    /// Distinct source files currently in the collection, with chunk counts,
    /// ordered by file name.
    pub async fn list_source_files(&self) -> Result<Vec<(String, i64)>, VectorStoreError> {
        let rows = sqlx::query(
            "SELECT source_file, COUNT(*) AS n FROM chunks
             WHERE collection = ?1
             GROUP BY source_file
             ORDER BY source_file",
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("source_file"), row.get("n")))
            .collect())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

// ============ CLI commands ============

pub async fn run_init(config: &crate::config::Config) -> anyhow::Result<()> {
    let store = VectorStore::open(&config.store.path, &config.store.collection).await?;
    store.close().await;
    std::fs::create_dir_all(&config.documents.dir)?;
    println!("Vector store initialized successfully.");
    Ok(())
}

pub async fn run_stats(config: &crate::config::Config) -> anyhow::Result<()> {
    let store = VectorStore::open(&config.store.path, &config.store.collection).await?;
    let stats = store.stats().await?;
    println!("Collection: {}", stats.collection_name);
    println!("Location:   {}", stats.location);
    println!("Chunks:     {}", stats.total_chunks);
    store.close().await;
    Ok(())
}

pub async fn run_files(config: &crate::config::Config) -> anyhow::Result<()> {
    let store = VectorStore::open(&config.store.path, &config.store.collection).await?;
    let files = store.list_source_files().await?;
    if files.is_empty() {
        println!("No files ingested.");
    } else {
        for (name, chunks) in &files {
            println!("{name}  ({chunks} chunks)");
        }
        println!("\n{} file(s).", files.len());
    }
    store.close().await;
    Ok(())
}

pub async fn run_delete(config: &crate::config::Config, source_file: &str) -> anyhow::Result<()> {
    let store = VectorStore::open(&config.store.path, &config.store.collection).await?;
    let removed = store.delete_by_source_file(source_file).await?;
    if removed == 0 {
        println!("No chunks found for '{source_file}'.");
    } else {
        println!("Removed {removed} chunk(s) for '{source_file}'.");
    }
    store.close().await;
    Ok(())
}

pub async fn run_clear(config: &crate::config::Config) -> anyhow::Result<()> {
    let store = VectorStore::open(&config.store.path, &config.store.collection).await?;
    store.clear().await?;
    println!("Vector store cleared.");
    store.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn metadata(source_file: &str, index: i64, total: i64) -> ChunkMetadata {
        ChunkMetadata {
            source_file: source_file.to_string(),
            source_path: format!("/docs/{source_file}"),
            source_url: String::new(),
            chunk_index: index,
            total_chunks: total,
            file_type: "txt".to_string(),
            processed_at: "2026-01-01T00:00:00Z".to_string(),
            chunk_length: 20,
            file_hash: "deadbeef".to_string(),
        }
    }

    fn document(source_file: &str, texts: &[&str]) -> ProcessedDocument {
        ProcessedDocument {
            chunks: texts.iter().map(|t| t.to_string()).collect(),
            metadatas: (0..texts.len())
                .map(|i| metadata(source_file, i as i64, texts.len() as i64))
                .collect(),
            ids: (0..texts.len())
                .map(|i| format!("{source_file}_deadbeef_{i:04}"))
                .collect(),
        }
    }

    async fn open_temp() -> (tempfile::TempDir, VectorStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(&dir.path().join("store.sqlite"), "test_collection")
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn add_and_count() {
        let (_dir, store) = open_temp().await;
        let doc = document("facts.txt", &["alpha", "beta"]);
        let added = store
            .add_chunks(&doc, &[vec![1.0, 0.0], vec![0.0, 1.0]])
            .await
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn upsert_by_id_does_not_duplicate() {
        let (_dir, store) = open_temp().await;
        let doc = document("facts.txt", &["alpha", "beta"]);
        let embeddings = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        store.add_chunks(&doc, &embeddings).await.unwrap();
        store.add_chunks(&doc, &embeddings).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn count_mismatch_rejected() {
        let (_dir, store) = open_temp().await;
        let doc = document("facts.txt", &["alpha", "beta"]);
        let err = store.add_chunks(&doc, &[vec![1.0, 0.0]]).await.unwrap_err();
        assert!(matches!(err, VectorStoreError::CountMismatch { .. }));
    }

    #[tokio::test]
    async fn query_orders_by_distance() {
        let (_dir, store) = open_temp().await;
        let doc = document("facts.txt", &["close", "orthogonal", "opposite"]);
        let embeddings = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, 0.0]];
        store.add_chunks(&doc, &embeddings).await.unwrap();

        let hits = store.query_by_vector(&[1.0, 0.0], 3).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].text, "close");
        assert!(hits[0].distance < 1e-6);
        assert!((hits[1].distance - 1.0).abs() < 1e-6);
        assert!((hits[2].distance - 2.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn query_truncates_to_n_results() {
        let (_dir, store) = open_temp().await;
        let doc = document("facts.txt", &["a", "b", "c"]);
        let embeddings = vec![vec![1.0, 0.0], vec![0.9, 0.1], vec![0.0, 1.0]];
        store.add_chunks(&doc, &embeddings).await.unwrap();
        let hits = store.query_by_vector(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn delete_by_source_file_is_exact_and_counted() {
        let (_dir, store) = open_temp().await;
        let doc_a = document("facts.txt", &["a1", "a2", "a3", "a4", "a5"]);
        let doc_b = document("other.txt", &["b1", "b2"]);
        let embed = |n: usize| vec![vec![1.0f32, 0.0]; n];
        store.add_chunks(&doc_a, &embed(5)).await.unwrap();
        store.add_chunks(&doc_b, &embed(2)).await.unwrap();

        let removed = store.delete_by_source_file("facts.txt").await.unwrap();
        assert_eq!(removed, 5);
        assert_eq!(store.count().await.unwrap(), 2);

        // Partial names must not match
        let removed = store.delete_by_source_file("facts").await.unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn delete_missing_file_removes_nothing() {
        let (_dir, store) = open_temp().await;
        let removed = store.delete_by_source_file("ghost.txt").await.unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn clear_resets_collection() {
        let (_dir, store) = open_temp().await;
        let doc = document("facts.txt", &["a", "b"]);
        store
            .add_chunks(&doc, &[vec![1.0, 0.0], vec![0.0, 1.0]])
            .await
            .unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);

        // The store must remain usable after clearing.
        store
            .add_chunks(&doc, &[vec![1.0, 0.0], vec![0.0, 1.0]])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn list_source_files_groups_and_sorts() {
        let (_dir, store) = open_temp().await;
        let doc_b = document("zeta.txt", &["z1"]);
        let doc_a = document("alpha.txt", &["a1", "a2"]);
        store.add_chunks(&doc_b, &[vec![1.0, 0.0]]).await.unwrap();
        store
            .add_chunks(&doc_a, &[vec![1.0, 0.0], vec![0.0, 1.0]])
            .await
            .unwrap();

        let files = store.list_source_files().await.unwrap();
        assert_eq!(
            files,
            vec![("alpha.txt".to_string(), 2), ("zeta.txt".to_string(), 1)]
        );
    }
}
