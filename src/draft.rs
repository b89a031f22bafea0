//! Document drafting: the answer path with a drafting instruction.
//!
//! Retrieval is optional and never blocks a draft; with no evidence the
//! generator fills unknown facts with placeholders and the draft carries
//! no citations.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::answer::{assemble_context, citations_for};
use crate::config::{Config, RetrievalConfig};
use crate::error::QueryError;
use crate::generation::{GenerationParams, Generator};
use crate::models::Citation;
use crate::prompts;
use crate::retrieval::Retriever;
use crate::retry::{with_retry, RetryPolicy};

const FALLBACK_TITLE: &str = "Document";

#[derive(Debug, Clone, Deserialize)]
pub struct DraftRequest {
    pub request: String,
    /// Extra facts from the caller (names, dates, amounts).
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default = "default_use_retrieval")]
    pub use_retrieval: bool,
}

fn default_use_retrieval() -> bool {
    true
}

impl DraftRequest {
    pub fn new(request: impl Into<String>) -> Self {
        DraftRequest {
            request: request.into(),
            context: None,
            use_retrieval: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Draft {
    pub title: String,
    pub document_type: Option<String>,
    /// Markdown body including the disclaimer.
    pub markdown: String,
    pub citations: Vec<Citation>,
}

/// First document type whose keyword occurs in the request.
pub fn detect_document_type(request: &str) -> Option<&'static str> {
    let lower = format!(" {} ", request.to_lowercase());
    prompts::DOCUMENT_TYPES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(kind, _)| *kind)
}

/// Text of the first `# ` heading.
pub fn extract_title(markdown: &str) -> Option<String> {
    markdown
        .lines()
        .map(str::trim)
        .find_map(|l| l.strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

pub struct Drafter {
    retriever: Retriever,
    generator: Arc<dyn Generator>,
    retrieval: RetrievalConfig,
    params: GenerationParams,
    retry: RetryPolicy,
}

impl Drafter {
    pub fn new(retriever: Retriever, generator: Arc<dyn Generator>, config: &Config) -> Self {
        Drafter {
            retriever,
            generator,
            retrieval: config.retrieval.clone(),
            params: GenerationParams::draft(&config.generation),
            retry: RetryPolicy::query(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn draft(&self, req: &DraftRequest) -> Result<Draft, QueryError> {
        let request = req.request.trim();
        if request.is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        let document_type = detect_document_type(request);

        let evidence = if req.use_retrieval {
            self.retriever.retrieve_with(request, &self.retrieval).await?
        } else {
            Vec::new()
        };
        let sources = (!evidence.is_empty()).then(|| assemble_context(&evidence));
        let user = prompts::draft_user_prompt(
            request,
            document_type,
            req.context.as_deref(),
            sources.as_deref(),
        );

        let params = self.params;
        let body = with_retry(self.retry, "generate_draft", || {
            self.generator
                .generate(prompts::DRAFT_SYSTEM, &user, params)
        })
        .await?;

        let citations = if evidence.is_empty() {
            Vec::new()
        } else {
            citations_for(&body, &evidence)
        };
        let title = extract_title(&body).unwrap_or_else(|| FALLBACK_TITLE.to_string());
        tracing::info!(
            document_type = document_type.unwrap_or("unknown"),
            evidence = evidence.len(),
            citations = citations.len(),
            "drafted document"
        );

        let mut markdown = body.trim_end().to_string();
        markdown.push_str(prompts::DRAFT_DISCLAIMER);
        Ok(Draft {
            title,
            document_type: document_type.map(str::to_string),
            markdown,
            citations,
        })
    }
}
