//! Fact-check orchestration: prompt assembly, strict verdict parsing, and
//! fallback behavior.
//!
//! The orchestrator never fails the request outright. Every path produces an
//! [`LlmOutcome`]:
//! - no retrieved context: a deterministic INSUFFICIENT verdict, no provider
//!   call, zero token usage
//! - provider success + valid JSON: the parsed verdict with document URLs
//!   reconciled from the prompted chunks
//! - provider success + invalid JSON: status `"error"` carrying the raw
//!   model text as the fallback
//! - provider failure: status `"error"` carrying a plain-text summary of the
//!   top retrieved chunks as the fallback

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, warn};

use crate::llm::ChatProvider;
use crate::models::{
    Classification, FactCheckVerdict, LlmOutcome, RetrievalResult, SourceReference, TokenUsage,
};

/// Minimum character lengths enforced on parsed verdict fields. Shorter
/// values indicate a degenerate model response and fail the parse.
const MIN_ANALYSIS_CHARS: usize = 10;
const MIN_REASONING_CHARS: usize = 20;

const SYSTEM_PROMPT: &str = "You are a professional fact-checker who analyzes evidence carefully \
and provides accurate assessments. Always respond with valid JSON.";

#[derive(Debug, Error)]
pub enum VerdictParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{field} too short: {len} chars (minimum {min})")]
    FieldTooShort {
        field: &'static str,
        len: usize,
        min: usize,
    },
}

/// Assemble the fact-check prompt: the quoted query followed by numbered
/// context blocks and the response-format contract.
pub fn build_prompt(query: &str, chunks: &[RetrievalResult]) -> String {
    let mut prompt = format!(
        "You are a fact-checking assistant. Your task is to analyze the provided context and \
give a factual assessment of the user's query.\n\nUSER QUERY: \"{query}\"\n\nRETRIEVED CONTEXT:\n"
    );

    for (i, chunk) in chunks.iter().enumerate() {
        prompt.push_str(&format!(
            "\n[Source {}] (File: {})\n{}\n",
            i + 1,
            chunk.source_file,
            chunk.text
        ));
    }

    prompt.push_str(
        r#"
INSTRUCTIONS:
1. Analyze the retrieved context carefully
2. Determine if the context supports, contradicts, or is insufficient to verify the query
3. Provide a clear fact-check response with one of these classifications:
   - SUPPORTED: The query is supported by the evidence
   - CONTRADICTED: The query is contradicted by the evidence
   - INSUFFICIENT: Not enough evidence to make a determination
   - MIXED: Evidence both supports and contradicts aspects of the query

4. If the query is not a factual statement suitable for fact-checking (e.g., opinions, requests, questions), classify it as INSUFFICIENT and explain why it's not fact-checkable
5. In your reasoning, DO NOT refer to sources by number (like "Source 1" or "Source 3"). Instead, refer to them by their content or context (like "the tax documentation" or "official guidelines")
6. Be precise and avoid speculation beyond what the evidence shows

You must respond with a JSON object matching this exact structure:
{
  "classification": "SUPPORTED|CONTRADICTED|INSUFFICIENT|MIXED",
  "analysis": "Your detailed analysis of the claim without source numbers",
  "sources_used": [
    {
      "source_number": 1,
      "file_name": "filename.txt"
    }
  ],
  "reasoning": "Step-by-step reasoning process without mentioning source numbers"
}
"#,
    );

    prompt
}

/// Parse the model output into a verdict, rejecting unknown classifications
/// and degenerate field values.
pub fn parse_verdict(raw: &str) -> Result<FactCheckVerdict, VerdictParseError> {
    let verdict: FactCheckVerdict = serde_json::from_str(raw)?;

    let analysis_len = verdict.analysis.chars().count();
    if analysis_len < MIN_ANALYSIS_CHARS {
        return Err(VerdictParseError::FieldTooShort {
            field: "analysis",
            len: analysis_len,
            min: MIN_ANALYSIS_CHARS,
        });
    }
    let reasoning_len = verdict.reasoning.chars().count();
    if reasoning_len < MIN_REASONING_CHARS {
        return Err(VerdictParseError::FieldTooShort {
            field: "reasoning",
            len: reasoning_len,
            min: MIN_REASONING_CHARS,
        });
    }

    Ok(verdict)
}

/// Overwrite each cited source's `document_url` with the URL recorded for
/// that file among the prompted chunks. The model's own URL claims are
/// discarded; a file without a recorded URL gets `None`.
fn reconcile_document_urls(sources: &mut [SourceReference], chunks: &[RetrievalResult]) {
    let url_by_file: HashMap<&str, &str> = chunks
        .iter()
        .filter(|c| !c.source_url.is_empty())
        .map(|c| (c.source_file.as_str(), c.source_url.as_str()))
        .collect();

    for source in sources {
        source.document_url = url_by_file
            .get(source.file_name.as_str())
            .map(|url| url.to_string());
    }
}

/// Plain-text stand-in shown when the provider is unreachable: the top three
/// chunks with confidence and a truncated excerpt.
fn fallback_summary(chunks: &[RetrievalResult]) -> String {
    if chunks.is_empty() {
        return "No relevant context found to fact-check this query.".to_string();
    }

    let mut out = String::from("LLM service unavailable. Here are the most relevant sources found:\n\n");
    for (i, chunk) in chunks.iter().take(3).enumerate() {
        let excerpt: String = if chunk.text.chars().count() > 200 {
            let head: String = chunk.text.chars().take(200).collect();
            format!("{head}...")
        } else {
            chunk.text.clone()
        };
        out.push_str(&format!(
            "Source {} (Confidence: {:.3})\nFrom: {}\n{}\n\n",
            i + 1,
            chunk.confidence,
            chunk.source_file,
            excerpt
        ));
    }
    out
}

pub struct FactCheckOrchestrator {
    provider: Arc<dyn ChatProvider>,
}

impl FactCheckOrchestrator {
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self { provider }
    }

    /// Run one fact-check over already-retrieved chunks.
    pub async fn fact_check(&self, query: &str, chunks: &[RetrievalResult]) -> LlmOutcome {
        if chunks.is_empty() {
            return LlmOutcome {
                status: "success".to_string(),
                fact_check: Some(FactCheckVerdict {
                    classification: Classification::Insufficient,
                    analysis: "No relevant documents found to fact-check this query.".to_string(),
                    sources_used: Vec::new(),
                    reasoning: "No context documents were retrieved from the database that match \
this query."
                        .to_string(),
                }),
                model_used: self.provider.model_name().to_string(),
                token_usage: TokenUsage::default(),
                error: None,
                fallback_response: None,
            };
        }

        let prompt = build_prompt(query, chunks);

        let response = match self.provider.complete(SYSTEM_PROMPT, &prompt).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "chat provider failed");
                return LlmOutcome {
                    status: "error".to_string(),
                    fact_check: None,
                    model_used: self.provider.model_name().to_string(),
                    token_usage: TokenUsage::default(),
                    error: Some(e.to_string()),
                    fallback_response: Some(fallback_summary(chunks)),
                };
            }
        };

        match parse_verdict(&response.content) {
            Ok(mut verdict) => {
                reconcile_document_urls(&mut verdict.sources_used, chunks);
                LlmOutcome {
                    status: "success".to_string(),
                    fact_check: Some(verdict),
                    model_used: self.provider.model_name().to_string(),
                    token_usage: response.usage,
                    error: None,
                    fallback_response: None,
                }
            }
            Err(e) => {
                warn!(error = %e, raw = %response.content, "verdict parse failed");
                LlmOutcome {
                    status: "error".to_string(),
                    fact_check: None,
                    model_used: self.provider.model_name().to_string(),
                    token_usage: response.usage,
                    error: Some(format!("JSON parsing failed: {e}")),
                    fallback_response: Some(response.content),
                }
            }
        }
    }
}

// ============ CLI commands ============

pub async fn run_fact_check(
    config: &crate::config::Config,
    text: &str,
    n_results: usize,
) -> anyhow::Result<()> {
    let store = Arc::new(
        crate::store::VectorStore::open(&config.store.path, &config.store.collection).await?,
    );
    let embedder = Arc::new(crate::embedding::OpenAiEmbedder::from_config(
        &config.embedding,
    )?);
    let retrieval = crate::retrieval::RetrievalService::new(
        store,
        embedder,
        config.retrieval.max_results,
    );
    let chat = crate::llm::OpenAiChat::from_config(&config.llm)?;
    let orchestrator = FactCheckOrchestrator::new(Arc::new(chat));

    let chunks = retrieval.retrieve(text, n_results).await?;
    let outcome = orchestrator.fact_check(text, &chunks).await;

    match &outcome.fact_check {
        Some(verdict) => {
            println!("Classification: {}", verdict.classification.as_str());
            println!("\nAnalysis:\n{}", verdict.analysis);
            println!("\nReasoning:\n{}", verdict.reasoning);
            if !verdict.sources_used.is_empty() {
                println!("\nSources:");
                for source in &verdict.sources_used {
                    match &source.document_url {
                        Some(url) => println!("  {} ({url})", source.file_name),
                        None => println!("  {}", source.file_name),
                    }
                }
            }
            println!(
                "\nModel: {}  Tokens: {}",
                outcome.model_used, outcome.token_usage.total_tokens
            );
        }
        None => {
            println!("Fact-check failed: {}", outcome.error.as_deref().unwrap_or("unknown"));
            if let Some(fallback) = &outcome.fallback_response {
                println!("\n{fallback}");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatResponse, LlmError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockChat {
        reply: Result<String, String>,
        usage: TokenUsage,
        calls: AtomicUsize,
    }

    impl MockChat {
        fn replying(content: &str) -> Self {
            Self {
                reply: Ok(content.to_string()),
                usage: TokenUsage {
                    prompt_tokens: 100,
                    completion_tokens: 50,
                    total_tokens: 150,
                },
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                reply: Err(message.to_string()),
                usage: TokenUsage::default(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatProvider for MockChat {
        async fn complete(&self, _system: &str, _user: &str) -> Result<ChatResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Ok(content) => Ok(ChatResponse {
                    content: content.clone(),
                    model: "mock-model".to_string(),
                    usage: self.usage,
                }),
                Err(message) => Err(LlmError::Malformed(message.clone())),
            }
        }

        fn model_name(&self) -> &str {
            "mock-model"
        }
    }

    fn chunk(text: &str, source_file: &str, source_url: &str, confidence: f64) -> RetrievalResult {
        RetrievalResult {
            text: text.to_string(),
            source_file: source_file.to_string(),
            source_url: source_url.to_string(),
            chunk_index: 0,
            confidence,
            distance: 1.0 - confidence,
        }
    }

    fn valid_verdict_json() -> String {
        serde_json::json!({
            "classification": "SUPPORTED",
            "analysis": "The evidence confirms the claim directly.",
            "sources_used": [
                {"source_number": 1, "file_name": "science.txt"},
                {"source_number": 2, "file_name": "unlinked.txt"},
            ],
            "reasoning": "The scientific documentation describes the shape in detail and matches the claim."
        })
        .to_string()
    }

    #[tokio::test]
    async fn no_context_short_circuits_without_provider_call() {
        let provider = Arc::new(MockChat::replying("should never be used"));
        let orchestrator = FactCheckOrchestrator::new(provider.clone());

        let outcome = orchestrator.fact_check("Is the Earth round?", &[]).await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.status, "success");
        assert_eq!(outcome.token_usage, TokenUsage::default());
        let verdict = outcome.fact_check.unwrap();
        assert_eq!(verdict.classification, Classification::Insufficient);
        assert!(verdict.sources_used.is_empty());
    }

    #[tokio::test]
    async fn successful_verdict_reconciles_urls_from_chunks() {
        let provider = Arc::new(MockChat::replying(&valid_verdict_json()));
        let orchestrator = FactCheckOrchestrator::new(provider);

        let chunks = vec![
            chunk("The Earth is round.", "science.txt", "https://example.org/science", 0.95),
            chunk("Satellites confirmed it.", "unlinked.txt", "", 0.92),
        ];
        let outcome = orchestrator.fact_check("Is the Earth round?", &chunks).await;

        assert_eq!(outcome.status, "success");
        assert_eq!(outcome.token_usage.total_tokens, 150);
        let verdict = outcome.fact_check.unwrap();
        assert_eq!(
            verdict.sources_used[0].document_url.as_deref(),
            Some("https://example.org/science")
        );
        assert_eq!(verdict.sources_used[1].document_url, None);
    }

    #[tokio::test]
    async fn model_supplied_urls_are_discarded() {
        let json = serde_json::json!({
            "classification": "SUPPORTED",
            "analysis": "The evidence confirms the claim directly.",
            "sources_used": [
                {"source_number": 1, "file_name": "science.txt", "document_url": "https://attacker.example"},
            ],
            "reasoning": "The scientific documentation describes the shape in detail and matches the claim."
        })
        .to_string();
        let orchestrator = FactCheckOrchestrator::new(Arc::new(MockChat::replying(&json)));

        let chunks = vec![chunk("The Earth is round.", "science.txt", "", 0.95)];
        let outcome = orchestrator.fact_check("Is the Earth round?", &chunks).await;

        let verdict = outcome.fact_check.unwrap();
        assert_eq!(verdict.sources_used[0].document_url, None);
    }

    #[tokio::test]
    async fn invalid_json_falls_back_to_raw_text() {
        let provider = Arc::new(MockChat::replying("I think the Earth is round, probably."));
        let orchestrator = FactCheckOrchestrator::new(provider);

        let chunks = vec![chunk("The Earth is round.", "science.txt", "", 0.95)];
        let outcome = orchestrator.fact_check("Is the Earth round?", &chunks).await;

        assert_eq!(outcome.status, "error");
        assert!(outcome.fact_check.is_none());
        assert!(outcome.error.as_deref().unwrap().starts_with("JSON parsing failed"));
        assert_eq!(
            outcome.fallback_response.as_deref(),
            Some("I think the Earth is round, probably.")
        );
        // Tokens were still consumed even though parsing failed.
        assert_eq!(outcome.token_usage.total_tokens, 150);
    }

    #[tokio::test]
    async fn unknown_classification_is_a_parse_failure() {
        let json = serde_json::json!({
            "classification": "PROBABLY_TRUE",
            "analysis": "The evidence confirms the claim directly.",
            "sources_used": [],
            "reasoning": "The scientific documentation describes the shape in detail."
        })
        .to_string();
        let orchestrator = FactCheckOrchestrator::new(Arc::new(MockChat::replying(&json)));

        let chunks = vec![chunk("The Earth is round.", "science.txt", "", 0.95)];
        let outcome = orchestrator.fact_check("Is the Earth round?", &chunks).await;
        assert_eq!(outcome.status, "error");
    }

    #[tokio::test]
    async fn provider_failure_produces_chunk_summary() {
        let provider = Arc::new(MockChat::failing("connection refused"));
        let orchestrator = FactCheckOrchestrator::new(provider);

        let long_text = "x".repeat(300);
        let chunks = vec![
            chunk(&long_text, "a.txt", "", 0.9),
            chunk("short", "b.txt", "", 0.8),
            chunk("third", "c.txt", "", 0.7),
            chunk("never shown", "d.txt", "", 0.6),
        ];
        let outcome = orchestrator.fact_check("claim", &chunks).await;

        assert_eq!(outcome.status, "error");
        assert_eq!(outcome.token_usage, TokenUsage::default());
        let fallback = outcome.fallback_response.unwrap();
        assert!(fallback.starts_with("LLM service unavailable."));
        assert!(fallback.contains("Source 1 (Confidence: 0.900)"));
        assert!(fallback.contains(&format!("{}...", "x".repeat(200))));
        assert!(fallback.contains("From: c.txt"));
        assert!(!fallback.contains("d.txt"));
    }

    #[test]
    fn prompt_numbers_sources_from_one() {
        let chunks = vec![
            chunk("first text", "a.txt", "", 0.9),
            chunk("second text", "b.txt", "", 0.8),
        ];
        let prompt = build_prompt("Is water wet?", &chunks);
        assert!(prompt.contains("USER QUERY: \"Is water wet?\""));
        assert!(prompt.contains("[Source 1] (File: a.txt)\nfirst text"));
        assert!(prompt.contains("[Source 2] (File: b.txt)\nsecond text"));
        assert!(prompt.contains("SUPPORTED|CONTRADICTED|INSUFFICIENT|MIXED"));
    }

    #[test]
    fn short_analysis_is_rejected() {
        let json = serde_json::json!({
            "classification": "SUPPORTED",
            "analysis": "ok",
            "sources_used": [],
            "reasoning": "The scientific documentation describes the shape in detail."
        })
        .to_string();
        assert!(matches!(
            parse_verdict(&json),
            Err(VerdictParseError::FieldTooShort { field: "analysis", .. })
        ));
    }

    #[test]
    fn short_reasoning_is_rejected() {
        let json = serde_json::json!({
            "classification": "SUPPORTED",
            "analysis": "The evidence confirms the claim directly.",
            "sources_used": [],
            "reasoning": "seems right"
        })
        .to_string();
        assert!(matches!(
            parse_verdict(&json),
            Err(VerdictParseError::FieldTooShort { field: "reasoning", .. })
        ));
    }
}
