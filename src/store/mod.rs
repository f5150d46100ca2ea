//! SQLite persistence for documents, chunks, and embeddings.
//!
//! | Store | Table | Write pattern |
//! |-------|-------|---------------|
//! | [`DocumentStore`] | `documents` | upsert keyed by `(tenant_id, doc_id)`, best effort |
//! | [`ChunkStore`] | `chunks` | append inside the document transaction |
//! | [`EmbeddingStore`] | `embeddings` | exactly one row per chunk, NULL vector as last resort |
//!
//! Chunk and embedding writes take a `&mut SqliteConnection` so the caller
//! decides the transaction boundary.

pub mod chunks;
pub mod documents;
pub mod embeddings;

use serde::Deserialize;

pub use chunks::{ChunkStore, ChunkStoreError, GeneratedIdSource};
pub use documents::DocumentStore;
pub use embeddings::{blob_to_vec, vec_to_blob, vec_to_json, EmbeddingStore};

/// How a vector is written into `embeddings.embedding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorEncoding {
    /// Little-endian `f32` bytes, the sqlite-vec BLOB layout.
    Blob,
    /// JSON array text, e.g. `[0.1,-0.2]`.
    Json,
}

impl VectorEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            VectorEncoding::Blob => "blob",
            VectorEncoding::Json => "json",
        }
    }
}
