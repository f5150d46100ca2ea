//! Append-only chunk rows.
//!
//! [`ChunkStore::insert`] hides how the generated row id is recovered: the
//! configured [`GeneratedIdSource`]s are tried in order and the first one
//! that yields an id wins.

use sqlx::SqliteConnection;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::TextChunk;

/// Hard failure while persisting a chunk. Aborts the document transaction.
#[derive(Debug, Error)]
pub enum ChunkStoreError {
    #[error("insert failed for chunk {index}: {source}")]
    Insert { index: i64, source: sqlx::Error },
    #[error("could not retrieve generated id for chunk {index}")]
    MissingId { index: i64 },
}

/// Where the id of a freshly inserted chunk row comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratedIdSource {
    /// The rowid reported by the insert itself.
    InsertResult,
    /// Re-query by `(doc_id, tenant_id, chunk_index)`, newest row first.
    NaturalKey,
}

/// Writes rows of the `chunks` table.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    id_sources: Vec<GeneratedIdSource>,
}

impl Default for ChunkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkStore {
    /// Insert result first, natural-key query as fallback.
    pub fn new() -> Self {
        Self::with_id_sources(vec![
            GeneratedIdSource::InsertResult,
            GeneratedIdSource::NaturalKey,
        ])
    }

    pub fn with_id_sources(id_sources: Vec<GeneratedIdSource>) -> Self {
        Self { id_sources }
    }

    /// Insert one chunk and return its generated id.
    pub async fn insert(
        &self,
        conn: &mut SqliteConnection,
        doc_id: &str,
        tenant_id: &str,
        chunk: &TextChunk,
    ) -> Result<i64, ChunkStoreError> {
        let meta = chunk.meta.to_json();
        debug!(
            doc_id,
            chunk_index = chunk.index,
            text_chars = chunk.meta.range.end - chunk.meta.range.start,
            meta = %meta,
            "inserting chunk"
        );

        let result = sqlx::query(
            "INSERT INTO chunks (doc_id, tenant_id, chunk_index, text, source_meta) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(doc_id)
        .bind(tenant_id)
        .bind(chunk.index)
        .bind(&chunk.text)
        .bind(&meta)
        .execute(&mut *conn)
        .await
        .map_err(|source| ChunkStoreError::Insert {
            index: chunk.index,
            source,
        })?;

        for id_source in &self.id_sources {
            let id = match id_source {
                GeneratedIdSource::InsertResult => {
                    Some(result.last_insert_rowid()).filter(|id| *id > 0)
                }
                GeneratedIdSource::NaturalKey => {
                    lookup_by_natural_key(conn, doc_id, tenant_id, chunk.index).await
                }
            };
            if let Some(id) = id {
                return Ok(id);
            }
            debug!(doc_id, chunk_index = chunk.index, source = ?id_source, "no chunk id from source");
        }

        Err(ChunkStoreError::MissingId { index: chunk.index })
    }

    /// Delete every chunk of a document. Embedding rows must be removed first.
    pub async fn delete_for_document(
        &self,
        conn: &mut SqliteConnection,
        tenant_id: &str,
        doc_id: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM chunks WHERE tenant_id = ? AND doc_id = ?")
            .bind(tenant_id)
            .bind(doc_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }
}

async fn lookup_by_natural_key(
    conn: &mut SqliteConnection,
    doc_id: &str,
    tenant_id: &str,
    chunk_index: i64,
) -> Option<i64> {
    // Re-ingestion under the append policy leaves older rows with the same
    // key; the newest one is the row just inserted.
    let found: Result<Option<i64>, sqlx::Error> = sqlx::query_scalar(
        "SELECT id FROM chunks WHERE doc_id = ? AND tenant_id = ? AND chunk_index = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(doc_id)
    .bind(tenant_id)
    .bind(chunk_index)
    .fetch_optional(&mut *conn)
    .await;

    match found {
        Ok(id) => id,
        Err(e) => {
            warn!(doc_id, chunk_index, error = %e, "chunk id lookup failed");
            None
        }
    }
}
