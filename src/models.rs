//! Core data models shared by the ingestion, retrieval, and fact-check layers.
//!
//! The verdict types mirror the JSON shape the LLM is instructed to return;
//! they are deserialized strictly so a malformed or out-of-vocabulary
//! response is rejected at the boundary instead of silently coerced.

use serde::{Deserialize, Serialize};

/// Metadata attached to every stored chunk.
///
/// `source_url` is a non-nullable string where `""` means "unset", so
/// callers can always treat it as present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_file: String,
    pub source_path: String,
    #[serde(default)]
    pub source_url: String,
    pub chunk_index: i64,
    pub total_chunks: i64,
    pub file_type: String,
    pub processed_at: String,
    pub chunk_length: i64,
    pub file_hash: String,
}

/// A chunk plus its deterministic id, as produced by the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    pub chunks: Vec<String>,
    pub metadatas: Vec<ChunkMetadata>,
    pub ids: Vec<String>,
}

impl ProcessedDocument {
    pub fn empty() -> Self {
        Self {
            chunks: Vec::new(),
            metadatas: Vec::new(),
            ids: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// A ranked retrieval hit with its distance and derived confidence.
///
/// `confidence = max(0, 1 - distance)`, rounded to 3 decimals; both values
/// are computed together and neither is persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub text: String,
    pub source_file: String,
    pub source_url: String,
    pub chunk_index: i64,
    pub confidence: f64,
    pub distance: f64,
}

/// Four-way verdict vocabulary. Any other string is a parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Supported,
    Contradicted,
    Insufficient,
    Mixed,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Supported => "SUPPORTED",
            Classification::Contradicted => "CONTRADICTED",
            Classification::Insufficient => "INSUFFICIENT",
            Classification::Mixed => "MIXED",
        }
    }
}

/// Reference to a source document cited by the verdict.
///
/// `document_url` is resolved from the chunks actually passed into the
/// prompt; it is never taken from the model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReference {
    pub source_number: i64,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_url: Option<String>,
}

/// Structured fact-check verdict parsed from the LLM response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactCheckVerdict {
    pub classification: Classification,
    pub analysis: String,
    pub sources_used: Vec<SourceReference>,
    pub reasoning: String,
}

/// Token accounting as reported by the LLM provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Complete outcome of one fact-check generation attempt.
///
/// On success `fact_check` is populated; on provider or parse failure the
/// status is `"error"` and `fallback_response` carries either the raw model
/// output (parse failure) or a deterministic summary of the top retrieved
/// chunks (provider failure).
#[derive(Debug, Clone, Serialize)]
pub struct LlmOutcome {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fact_check: Option<FactCheckVerdict>,
    pub model_used: String,
    pub token_usage: TokenUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_response: Option<String>,
}

/// Statistics for a directory ingestion run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestStats {
    pub total_files: usize,
    pub processed_files: usize,
    pub total_chunks: usize,
    pub failed_files: Vec<String>,
    pub elapsed_secs: f64,
}

/// Read-only snapshot of the vector store.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_chunks: i64,
    pub collection_name: String,
    pub location: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_round_trips_as_screaming_snake() {
        let json = serde_json::to_string(&Classification::Supported).unwrap();
        assert_eq!(json, "\"SUPPORTED\"");
        let back: Classification = serde_json::from_str("\"MIXED\"").unwrap();
        assert_eq!(back, Classification::Mixed);
    }

    #[test]
    fn unknown_classification_is_rejected() {
        let result: Result<Classification, _> = serde_json::from_str("\"PROBABLY_TRUE\"");
        assert!(result.is_err());
    }

    #[test]
    fn source_reference_parses_without_document_url() {
        let json = r#"{"source_number": 2, "file_name": "facts.txt"}"#;
        let source: SourceReference = serde_json::from_str(json).unwrap();
        assert_eq!(source.source_number, 2);
        assert_eq!(source.document_url, None);
    }

    #[test]
    fn verdict_parses_from_model_shape() {
        let json = r#"{
            "classification": "SUPPORTED",
            "analysis": "The claim matches the evidence.",
            "sources_used": [{"source_number": 1, "file_name": "science.txt"}],
            "reasoning": "The retrieved documentation directly confirms the claim."
        }"#;
        let verdict: FactCheckVerdict = serde_json::from_str(json).unwrap();
        assert_eq!(verdict.classification, Classification::Supported);
        assert_eq!(verdict.sources_used.len(), 1);
    }
}
