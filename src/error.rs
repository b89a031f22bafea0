//! Typed failures for the places where callers must branch.
//!
//! Plumbing (config, CLI, database setup) uses `anyhow`. The types here are
//! the ones a caller inspects: a [`LoadError`] becomes the `failed` reason on
//! a document, a [`ProviderError`] decides whether a call is retried, and a
//! [`QueryError`] separates "service unavailable" from "no evidence".

use thiserror::Error;

/// Why a single file could not be turned into pages.
///
/// Clone-able so the same failure can be recorded on the document and
/// returned in a batch report.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("corrupt {format} document: {reason}")]
    Corrupt { format: String, reason: String },

    #[error("unsafe archive entry path: {0}")]
    UnsafeArchive(String),

    #[error("archive exceeds limits: {0}")]
    ArchiveTooLarge(String),

    #[error("no extractable text")]
    NoText,

    #[error("i/o error: {0}")]
    Io(String),
}

impl LoadError {
    pub fn corrupt(format: &str, reason: impl ToString) -> Self {
        LoadError::Corrupt {
            format: format.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Failure talking to an embedding or generation backend.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("{0} provider is disabled")]
    Disabled(&'static str),

    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    #[error("{provider} returned HTTP {status}: {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} transport error: {message}")]
    Transport { provider: String, message: String },

    #[error("invalid response from {provider}: {message}")]
    InvalidResponse { provider: String, message: String },

    #[error("embedding batch mismatch: sent {sent} texts, got {received} vectors")]
    BatchMismatch { sent: usize, received: usize },
}

impl ProviderError {
    /// Rate limits, server errors and transport failures are transient.
    /// Everything else fails fast.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Transport { .. } => true,
            _ => false,
        }
    }

    pub(crate) fn transport(provider: &str, err: impl ToString) -> Self {
        ProviderError::Transport {
            provider: provider.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn invalid(provider: &str, message: impl ToString) -> Self {
        ProviderError::InvalidResponse {
            provider: provider.to_string(),
            message: message.to_string(),
        }
    }
}

/// Failure ingesting one document. Its display text is stored on the
/// failed `SourceDocument`.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("embedding failed: {0}")]
    Embedding(#[from] ProviderError),

    #[error("index write failed: {0}")]
    Index(#[source] anyhow::Error),

    #[error("extraction task aborted: {0}")]
    Aborted(String),
}

/// Message shown when a dependency is down at query time.
pub const UNAVAILABLE_MESSAGE: &str =
    "The assistant is temporarily unavailable. Please try again in a few minutes.";

/// Failure answering a query. "No evidence" is not an error; see
/// [`AnswerOutcome::InsufficientEvidence`](crate::models::AnswerOutcome).
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query must not be empty")]
    EmptyQuery,

    #[error("dependency unavailable: {0}")]
    Unavailable(#[from] ProviderError),

    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

impl QueryError {
    /// Text safe to show an end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            QueryError::EmptyQuery => "Please enter a question.",
            QueryError::Unavailable(_) | QueryError::Storage(_) => UNAVAILABLE_MESSAGE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> ProviderError {
        ProviderError::Http {
            provider: "openai".into(),
            status,
            body: String::new(),
        }
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(http(429).is_retryable());
        assert!(http(500).is_retryable());
        assert!(http(503).is_retryable());
        assert!(!http(400).is_retryable());
        assert!(!http(401).is_retryable());
        assert!(ProviderError::transport("ollama", "connection refused").is_retryable());
        assert!(!ProviderError::Disabled("embedding").is_retryable());
        assert!(!ProviderError::BatchMismatch { sent: 2, received: 1 }.is_retryable());
    }

    #[test]
    fn test_unavailable_message_is_distinct_from_empty_query() {
        let down = QueryError::Unavailable(http(503));
        assert_eq!(down.user_message(), UNAVAILABLE_MESSAGE);
        assert_ne!(QueryError::EmptyQuery.user_message(), UNAVAILABLE_MESSAGE);
    }

    #[test]
    fn test_ingest_error_displays_load_reason() {
        let err: IngestError = LoadError::UnsupportedFormat("report.doc".into()).into();
        assert_eq!(err.to_string(), "unsupported format: report.doc");
    }
}
