//! Context assembly and grounded answering.
//!
//! | Intent | Evidence | Result |
//! |--------|----------|--------|
//! | conversational | not retrieved | generator reply, no citations |
//! | domain | none above threshold | fixed insufficient-evidence text, no citations |
//! | domain | ≥ 1 chunk | grounded reply, citations for the sources it used |
//! | domain | ≥ 1 chunk, model declines | the model's refusal, no citations |
//!
//! A dependency failure is a [`QueryError`], never an answer.

use std::sync::Arc;

use crate::classify::{Intent, IntentClassifier};
use crate::config::{Config, RetrievalConfig};
use crate::error::QueryError;
use crate::generation::{GenerationParams, Generator};
use crate::models::{Answer, AnswerOutcome, Citation, ScoredChunk};
use crate::prompts;
use crate::retrieval::Retriever;
use crate::retry::{with_retry, RetryPolicy};

/// Separator between sources in a context block.
const SOURCE_SEPARATOR: &str = "\n\n---\n\n";

/// Number each chunk as `[Source N: filename, page P]` followed by its text.
pub fn assemble_context(evidence: &[ScoredChunk]) -> String {
    evidence
        .iter()
        .enumerate()
        .map(|(i, c)| {
            format!(
                "[Source {}: {}, page {}]\n{}",
                i + 1,
                c.chunk.filename,
                c.chunk.page,
                c.chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join(SOURCE_SEPARATOR)
}

/// Source numbers referenced as `Source N` in `text`, in order of first
/// mention, limited to `1..=max`.
pub fn cited_sources(text: &str, max: usize) -> Vec<usize> {
    let lower = text.to_lowercase();
    let mut found = Vec::new();
    let mut rest = lower.as_str();
    while let Some(pos) = rest.find("source") {
        rest = &rest[pos + "source".len()..];
        let after = rest.trim_start_matches('s').trim_start();
        let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(n) = digits.parse::<usize>() {
            if (1..=max).contains(&n) && !found.contains(&n) {
                found.push(n);
            }
        }
    }
    found
}

/// Citations for the used evidence: one per (filename, page), in evidence
/// order, pointing at the best-scoring chunk of that page. When the reply
/// names no sources, every retained chunk counts as used.
pub fn citations_for(reply: &str, evidence: &[ScoredChunk]) -> Vec<Citation> {
    let used = cited_sources(reply, evidence.len());
    let mut citations: Vec<Citation> = Vec::new();
    for (i, c) in evidence.iter().enumerate() {
        if !used.is_empty() && !used.contains(&(i + 1)) {
            continue;
        }
        let seen = citations
            .iter()
            .any(|x| x.filename == c.chunk.filename && x.page == c.chunk.page);
        if !seen {
            citations.push(Citation {
                filename: c.chunk.filename.clone(),
                page: c.chunk.page,
                chunk_id: c.chunk.id.clone(),
                score: c.score,
            });
        }
    }
    citations
}

/// True when `reply` is the grounded refusal and cites nothing.
pub fn is_refusal(reply: &str) -> bool {
    let normalized = reply.trim().trim_end_matches('.').to_lowercase();
    let refusal = prompts::GROUNDED_REFUSAL.trim_end_matches('.').to_lowercase();
    cited_sources(reply, usize::MAX).is_empty() && normalized.contains(&refusal)
}

pub struct Assistant {
    classifier: Arc<dyn IntentClassifier>,
    retriever: Retriever,
    generator: Arc<dyn Generator>,
    retrieval: RetrievalConfig,
    params: GenerationParams,
    retry: RetryPolicy,
}

impl Assistant {
    pub fn new(
        classifier: Arc<dyn IntentClassifier>,
        retriever: Retriever,
        generator: Arc<dyn Generator>,
        config: &Config,
    ) -> Self {
        Assistant {
            classifier,
            retriever,
            generator,
            retrieval: config.retrieval.clone(),
            params: GenerationParams::answer(&config.generation),
            retry: RetryPolicy::query(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn answer(&self, query: &str) -> Result<Answer, QueryError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(QueryError::EmptyQuery);
        }

        let intent = self.classifier.classify(query).await;
        tracing::info!(intent = ?intent, "classified query");

        match intent {
            Intent::Conversational => {
                let text = self.generate(intent.system_instruction(), query).await?;
                Ok(Answer {
                    query: query.to_string(),
                    text,
                    citations: Vec::new(),
                    outcome: AnswerOutcome::Conversational,
                })
            }
            Intent::Domain => {
                let evidence = self.retriever.retrieve_with(query, &self.retrieval).await?;
                if evidence.is_empty() {
                    tracing::info!("no evidence above threshold");
                    return Ok(Answer {
                        query: query.to_string(),
                        text: prompts::INSUFFICIENT_EVIDENCE_MESSAGE.to_string(),
                        citations: Vec::new(),
                        outcome: AnswerOutcome::InsufficientEvidence,
                    });
                }

                let context = assemble_context(&evidence);
                let user = prompts::grounded_user_prompt(&context, query);
                let text = self.generate(intent.system_instruction(), &user).await?;
                if is_refusal(&text) {
                    tracing::info!(evidence = evidence.len(), "sources do not answer the question");
                    return Ok(Answer {
                        query: query.to_string(),
                        text,
                        citations: Vec::new(),
                        outcome: AnswerOutcome::InsufficientEvidence,
                    });
                }
                let citations = citations_for(&text, &evidence);
                tracing::info!(
                    evidence = evidence.len(),
                    citations = citations.len(),
                    "grounded answer"
                );
                Ok(Answer {
                    query: query.to_string(),
                    text,
                    citations,
                    outcome: AnswerOutcome::Grounded,
                })
            }
        }
    }

    async fn generate(&self, system: &str, user: &str) -> Result<String, QueryError> {
        let params = self.params;
        let text = with_retry(self.retry, "generate", || {
            self.generator.generate(system, user, params)
        })
        .await?;
        Ok(text)
    }
}
