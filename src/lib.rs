//! # Claimcheck
//!
//! A retrieval-augmented fact-checking service.
//!
//! Claimcheck ingests reference documents (txt, pdf, docx, csv), chunks and
//! embeds them into a local SQLite vector store, and answers fact-check
//! queries by retrieving the most similar chunks and asking an LLM for a
//! structured verdict (SUPPORTED, CONTRADICTED, INSUFFICIENT, or MIXED) over
//! that evidence.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌──────────┐
//! │ Documents │──▶│   Pipeline    │──▶│  SQLite   │
//! │ txt/pdf/… │   │ Chunk+Embed  │   │ vectors  │
//! └───────────┘   └──────────────┘   └────┬─────┘
//!                                         │
//!                     ┌───────────────────┤
//!                     ▼                   ▼
//!                ┌──────────┐       ┌──────────┐
//!                │   CLI    │       │   HTTP   │
//!                └──────────┘       └────┬─────┘
//!                                        ▼
//!                                   ┌──────────┐
//!                                   │   LLM    │
//!                                   │ verdicts │
//!                                   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! claimcheck init                          # create the vector store
//! claimcheck ingest-dir ./documents        # ingest a document folder
//! claimcheck fact-check "The Earth is flat"
//! claimcheck serve                         # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunker`] | Sentence-aware text chunking |
//! | [`extract`] | Per-format text extraction |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | SQLite vector store |
//! | [`ingest`] | Ingestion pipeline |
//! | [`retrieval`] | Similarity search with confidence scoring |
//! | [`llm`] | Chat-completion provider abstraction |
//! | [`factcheck`] | Verdict orchestration |
//! | [`server`] | HTTP API server |

pub mod chunker;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod factcheck;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod retrieval;
pub mod server;
pub mod store;
