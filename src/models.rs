//! Core data models used throughout AskAccess.
//!
//! These types represent the documents, chunks, retrieval results and query
//! log entries that flow through the ingestion and answering pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form document metadata (string keys, scalar or string values).
pub type Metadata = serde_json::Map<String, Value>;

/// A chunk of a document's text, as produced by the chunker.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// One ingested unit (file or case record) and its provenance.
///
/// Stored in the metadata store; exactly one per document id that has
/// chunks in the vector index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetadataRecord {
    pub document_id: String,
    /// File path for uploads, or an origin tag such as `"salesforce"`.
    pub source: String,
    pub metadata: Metadata,
    pub ingested_at: DateTime<Utc>,
    pub chunk_count: usize,
}

/// A chunk returned by similarity search. Not persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResult {
    pub content: String,
    pub metadata: Metadata,
    /// Cosine similarity; higher is more relevant.
    pub score: f64,
}

/// A chunk that was handed to the generator as context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub content: String,
    pub metadata: Metadata,
}

impl From<&RetrievalResult> for Source {
    fn from(r: &RetrievalResult) -> Self {
        Source {
            content: r.content.clone(),
            metadata: r.metadata.clone(),
        }
    }
}

/// One line of a daily query log partition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryLogEntry {
    pub query: String,
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<Source>,
    /// Seconds.
    pub processing_time: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub latency_within_target: bool,
}

/// A CRM support case as exported from Salesforce.
///
/// Only the fields used for rendering are typed; everything else in the
/// payload is ignored. `Comments` is accepted in any shape and only used
/// when it is an array.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaseRecord {
    #[serde(rename = "Id", default)]
    pub id: Option<Value>,
    #[serde(rename = "CaseNumber", default)]
    pub case_number: Option<String>,
    #[serde(rename = "Subject", default)]
    pub subject: Option<String>,
    #[serde(rename = "Description", default)]
    pub description: Option<String>,
    #[serde(rename = "Status", default)]
    pub status: Option<String>,
    #[serde(rename = "Comments", default)]
    pub comments: Option<Value>,
}

impl CaseRecord {
    /// `CaseNumber` when present, otherwise the stringified `Id`.
    pub fn case_id(&self) -> String {
        if let Some(n) = &self.case_number {
            return n.clone();
        }
        match &self.id {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    /// Comment bodies in order; empty when `Comments` is absent or not a list.
    pub fn comment_bodies(&self) -> Option<Vec<String>> {
        let items = self.comments.as_ref()?.as_array()?;
        Some(
            items
                .iter()
                .map(|c| {
                    c.get("CommentBody")
                        .and_then(|b| b.as_str())
                        .unwrap_or_default()
                        .to_string()
                })
                .collect(),
        )
    }
}
