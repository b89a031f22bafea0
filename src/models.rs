//! Core data models shared by the ingestion and query paths.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ingestion status of a [`SourceDocument`].
///
/// Only the ingestion pipeline moves a document between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Indexed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DocumentStatus::Pending),
            "processing" => Ok(DocumentStatus::Processing),
            "indexed" => Ok(DocumentStatus::Indexed),
            "failed" => Ok(DocumentStatus::Failed),
            other => anyhow::bail!("unknown document status: {}", other),
        }
    }
}

/// One uploaded file or archive member, keyed by the SHA-256 of its bytes.
#[derive(Debug, Clone, Serialize)]
pub struct SourceDocument {
    pub content_hash: String,
    pub filename: String,
    /// Format tag such as `pdf` or `txt`, empty when unrecognised.
    pub format: String,
    /// Archive the file was unpacked from, if any.
    pub archive_source: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub status: DocumentStatus,
    /// Failure reason when `status` is `failed`.
    pub error: Option<String>,
    pub chunk_count: usize,
    /// `provider:model` identity of the embeddings behind this document.
    pub embedding_model: Option<String>,
}

impl SourceDocument {
    pub fn pending(
        content_hash: &str,
        filename: &str,
        format: &str,
        archive_source: Option<&str>,
    ) -> Self {
        SourceDocument {
            content_hash: content_hash.to_string(),
            filename: filename.to_string(),
            format: format.to_string(),
            archive_source: archive_source.map(str::to_string),
            uploaded_at: Utc::now(),
            status: DocumentStatus::Pending,
            error: None,
            chunk_count: 0,
            embedding_model: None,
        }
    }
}

/// Text of one page of one source. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageUnit {
    pub source_hash: String,
    /// 1-based page number.
    pub page: u32,
    pub text: String,
}

/// Chunker output before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub page: u32,
    /// Position within the page, starting at 0.
    pub ordinal: u32,
    pub text: String,
    /// Article or section label found in the text.
    pub section: Option<String>,
}

/// A retrievable, citable passage.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub source_hash: String,
    pub filename: String,
    pub page: u32,
    pub ordinal: u32,
    pub text: String,
    pub section: Option<String>,
    pub embedding_model: String,
}

/// A chunk plus its vector, as written to the vector index.
#[derive(Debug, Clone)]
pub struct IndexPoint {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A chunk returned by a similarity query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Reference from an answer back to a stored chunk.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Citation {
    pub filename: String,
    pub page: u32,
    pub chunk_id: String,
    pub score: f32,
}

/// Which branch produced an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
    Conversational,
    Grounded,
    InsufficientEvidence,
}

/// Output of the query path: everything a history store needs.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub query: String,
    pub text: String,
    pub citations: Vec<Citation>,
    pub outcome: AnswerOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            DocumentStatus::Pending,
            DocumentStatus::Processing,
            DocumentStatus::Indexed,
            DocumentStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<DocumentStatus>().unwrap(), status);
        }
        assert!("done".parse::<DocumentStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&DocumentStatus::Indexed).unwrap();
        assert_eq!(json, "\"indexed\"");
    }
}
