//! One embedding row per chunk.
//!
//! A real vector is written with each configured [`VectorEncoding`] in turn.
//! When every encoding is rejected, or there is no vector, the row is still
//! written with a NULL `embedding` so chunk ↔ embedding joins stay total.

use sqlx::SqliteConnection;
use tracing::{debug, warn};

use super::VectorEncoding;

/// Writes rows of the `embeddings` table.
#[derive(Debug, Clone)]
pub struct EmbeddingStore {
    encodings: Vec<VectorEncoding>,
}

impl EmbeddingStore {
    pub fn new(encodings: Vec<VectorEncoding>) -> Self {
        Self { encodings }
    }

    pub fn encodings(&self) -> &[VectorEncoding] {
        &self.encodings
    }

    /// Write the embedding row for `chunk_id`.
    ///
    /// Returns `Ok(true)` when a real vector was stored and `Ok(false)` when
    /// the row holds NULL. Errors only when the NULL row itself cannot be
    /// written.
    pub async fn insert(
        &self,
        conn: &mut SqliteConnection,
        chunk_id: i64,
        vector: Option<&[f32]>,
        model: &str,
    ) -> Result<bool, sqlx::Error> {
        if let Some(vector) = vector {
            for encoding in &self.encodings {
                match insert_encoded(conn, chunk_id, vector, *encoding, model).await {
                    Ok(()) => return Ok(true),
                    Err(e) => {
                        debug!(
                            chunk_id,
                            encoding = encoding.as_str(),
                            error = %e,
                            "vector insert rejected, trying next encoding"
                        );
                    }
                }
            }
            warn!(chunk_id, "all vector encodings failed, storing NULL embedding");
        }

        sqlx::query("INSERT INTO embeddings (chunk_id, embedding) VALUES (?, NULL)")
            .bind(chunk_id)
            .execute(&mut *conn)
            .await?;
        Ok(false)
    }

    /// Delete embedding rows for every chunk of a document.
    pub async fn delete_for_document(
        &self,
        conn: &mut SqliteConnection,
        tenant_id: &str,
        doc_id: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE tenant_id = ? AND doc_id = ?)",
        )
        .bind(tenant_id)
        .bind(doc_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }
}

async fn insert_encoded(
    conn: &mut SqliteConnection,
    chunk_id: i64,
    vector: &[f32],
    encoding: VectorEncoding,
    model: &str,
) -> Result<(), sqlx::Error> {
    let query = sqlx::query(
        "INSERT INTO embeddings (chunk_id, embedding, encoding, model, dims) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(chunk_id);
    let query = match encoding {
        VectorEncoding::Blob => query.bind(vec_to_blob(vector)),
        VectorEncoding::Json => query.bind(vec_to_json(vector)),
    };
    query
        .bind(encoding.as_str())
        .bind(model)
        .bind(vector.len() as i64)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn finite(v: f32) -> f32 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Non-finite values are written as `0.0`.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&finite(v).to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Encode a float vector as a JSON array. Non-finite values become `0`.
pub fn vec_to_json(vec: &[f32]) -> String {
    let sanitized: Vec<f32> = vec.iter().copied().map(finite).collect();
    serde_json::to_string(&sanitized).unwrap_or_else(|_| "[]".to_string())
}
