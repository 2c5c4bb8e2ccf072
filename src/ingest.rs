//! Ingestion pipeline: extract, clean, chunk, embed, store.
//!
//! File-level failures during directory ingestion are recorded and skipped
//! so one unreadable document cannot abort a corpus load. Chunk ids are
//! deterministic functions of the file path and chunk position, which makes
//! re-ingestion an idempotent upsert.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::chunker::chunk_text;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::extract::{extract_text, is_supported};
use crate::models::{ChunkMetadata, IngestStats, ProcessedDocument};
use crate::store::VectorStore;

/// Normalize extracted text before chunking: collapse whitespace runs to a
/// single space and drop characters outside the word/punctuation set.
pub fn clean_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for c in text.chars() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        let keep = c.is_alphanumeric()
            || matches!(c, '_' | '.' | ',' | '!' | '?' | ';' | ':' | '(' | ')' | '-');
        if !keep {
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(c);
    }

    out
}

/// Short stable fingerprint of a file path, used in chunk ids.
pub fn file_hash(path: &Path) -> String {
    let digest = Sha256::digest(path.display().to_string().as_bytes());
    let mut hex = String::with_capacity(8);
    for byte in &digest[..4] {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Extract and chunk a single file into a [`ProcessedDocument`].
///
/// Extraction failures are non-fatal per file: an unsupported format, a
/// corrupt PDF, or an unreadable archive all log a warning and yield an
/// empty document, never an `Err`. The caller reports "no content
/// extracted" from the empty chunk set.
pub fn process_file(path: &Path, source_url: &str, config: &Config) -> Result<ProcessedDocument> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("path has no file name: {}", path.display()))?;
    let file_stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.clone());
    let file_type = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let raw = match extract_text(path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(file = %file_name, error = %e, "text extraction failed, skipping");
            return Ok(ProcessedDocument::empty());
        }
    };
    let cleaned = clean_text(&raw);
    if cleaned.is_empty() {
        warn!(file = %file_name, "no usable text after cleaning, skipping");
        return Ok(ProcessedDocument::empty());
    }

    let chunks = chunk_text(&cleaned, config.chunking.max_chars, config.chunking.overlap);
    let total = chunks.len() as i64;
    let hash = file_hash(path);
    let processed_at = chrono::Utc::now().to_rfc3339();

    let mut metadatas = Vec::with_capacity(chunks.len());
    let mut ids = Vec::with_capacity(chunks.len());
    for (index, chunk) in chunks.iter().enumerate() {
        metadatas.push(ChunkMetadata {
            source_file: file_name.clone(),
            source_path: path.display().to_string(),
            source_url: source_url.to_string(),
            chunk_index: index as i64,
            total_chunks: total,
            file_type: file_type.clone(),
            processed_at: processed_at.clone(),
            chunk_length: chunk.chars().count() as i64,
            file_hash: hash.clone(),
        });
        ids.push(format!("{file_stem}_{hash}_{index:04}"));
    }

    Ok(ProcessedDocument {
        chunks,
        metadatas,
        ids,
    })
}

pub struct Ingestor {
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    config: Config,
}

impl Ingestor {
    pub fn new(store: Arc<VectorStore>, embedder: Arc<dyn Embedder>, config: Config) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// Ingest one file end to end. Returns the number of chunks stored.
    pub async fn ingest_file(&self, path: &Path, source_url: &str) -> Result<usize> {
        let document = process_file(path, source_url, &self.config)?;
        if document.is_empty() {
            return Ok(0);
        }

        let embeddings = self
            .embedder
            .embed(&document.chunks)
            .await
            .with_context(|| format!("embedding failed for {}", path.display()))?;

        let stored = self.store.add_chunks(&document, &embeddings).await?;
        info!(
            file = %path.display(),
            chunks = stored,
            "ingested document"
        );
        Ok(stored)
    }

    /// Ingest every supported file in `dir`, processing up to
    /// `ingest.concurrency` files at once. Per-file failures are collected
    /// into the stats rather than aborting the run.
    pub async fn ingest_directory(&self, dir: &Path) -> Result<IngestStats> {
        let started = Instant::now();

        let mut paths = Vec::new();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read directory {}", dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() && is_supported(&path.file_name().unwrap_or_default().to_string_lossy())
            {
                paths.push(path);
            }
        }
        paths.sort();

        let total_files = paths.len();
        info!(dir = %dir.display(), files = total_files, "starting directory ingestion");

        let results = stream::iter(paths)
            .map(|path| async move {
                let outcome = self.ingest_file(&path, "").await;
                (path, outcome)
            })
            .buffer_unordered(self.config.ingest.concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut processed_files = 0usize;
        let mut total_chunks = 0usize;
        let mut failed_files = Vec::new();
        for (path, outcome) in results {
            match outcome {
                Ok(0) => {
                    // Extraction failed or the file cleaned down to nothing.
                    failed_files.push(
                        path.file_name()
                            .unwrap_or_default()
                            .to_string_lossy()
                            .into_owned(),
                    );
                }
                Ok(chunks) => {
                    processed_files += 1;
                    total_chunks += chunks;
                }
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "file ingestion failed");
                    failed_files.push(
                        path.file_name()
                            .unwrap_or_default()
                            .to_string_lossy()
                            .into_owned(),
                    );
                }
            }
        }
        failed_files.sort();

        let stats = IngestStats {
            total_files,
            processed_files,
            total_chunks,
            failed_files,
            elapsed_secs: started.elapsed().as_secs_f64(),
        };
        info!(
            processed = stats.processed_files,
            chunks = stats.total_chunks,
            failed = stats.failed_files.len(),
            "directory ingestion complete"
        );
        Ok(stats)
    }
}

// ============ CLI commands ============

pub async fn run_ingest_file(config: &Config, path: &Path, source_url: &str) -> Result<()> {
    let store = Arc::new(
        crate::store::VectorStore::open(&config.store.path, &config.store.collection).await?,
    );
    let embedder = Arc::new(crate::embedding::OpenAiEmbedder::from_config(
        &config.embedding,
    )?);
    let ingestor = Ingestor::new(store, embedder, config.clone());

    let chunks = ingestor.ingest_file(path, source_url).await?;
    if chunks == 0 {
        println!("No usable text in {}.", path.display());
    } else {
        println!("Ingested {} ({chunks} chunks).", path.display());
    }
    Ok(())
}

pub async fn run_ingest_dir(config: &Config, dir: &Path) -> Result<()> {
    let store = Arc::new(
        crate::store::VectorStore::open(&config.store.path, &config.store.collection).await?,
    );
    let embedder = Arc::new(crate::embedding::OpenAiEmbedder::from_config(
        &config.embedding,
    )?);
    let ingestor = Ingestor::new(store, embedder, config.clone());

    let stats = ingestor.ingest_directory(dir).await?;
    println!(
        "Processed {}/{} files, {} chunks in {:.1}s.",
        stats.processed_files, stats.total_files, stats.total_chunks, stats.elapsed_secs
    );
    if !stats.failed_files.is_empty() {
        println!("Failed files:");
        for name in &stats.failed_files {
            println!("  {name}");
        }
    }
    Ok(())
}
