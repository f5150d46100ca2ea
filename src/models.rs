//! Core data models shared by the chunker, stores, and ingestion pipeline.

use serde::{Deserialize, Serialize};

/// Inbound ingestion request.
///
/// The JSON shape uses camelCase field names (`tenantId`, `docId`,
/// `embeddingModelId`) so HTTP clients can post the same payload they
/// send to the chat backend.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub doc_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub mime: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub text: String,
    #[serde(default)]
    pub embedding_model_id: Option<String>,
}

impl IngestRequest {
    /// Request carrying only text; every other field takes its default.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Result of one ingestion call. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    pub doc_id: String,
    pub tenant_id: String,
    pub chunk_count: usize,
    /// Chunks whose embedding row holds a real vector.
    pub embedded_count: usize,
    pub content_hash: String,
    /// True when an unchanged document was left as-is.
    pub skipped: bool,
}

/// Document-level row written by the document store.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub tenant_id: String,
    pub doc_id: String,
    pub title: Option<String>,
    pub uri: Option<String>,
    pub mime: Option<String>,
    pub tags: Vec<String>,
    pub content_hash: String,
}

impl DocumentRecord {
    /// Tags serialized as a JSON array (`[]` when empty).
    pub fn tags_json(&self) -> String {
        serde_json::to_string(&self.tags).unwrap_or_else(|_| "[]".to_string())
    }
}

/// One window of a document's text, produced by the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub index: i64,
    pub text: String,
    pub meta: SourceMeta,
}

/// Position of a chunk in the normalized text, as `[start, end)` character
/// offsets. Stored as `{"range":{"start":S,"end":E}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMeta {
    pub range: CharRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharRange {
    pub start: usize,
    pub end: usize,
}

impl SourceMeta {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            range: CharRange { start, end },
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
