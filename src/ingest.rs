//! Ingestion pipeline orchestration.
//!
//! Turns one document's text into knowledge-base rows:
//!
//! ```text
//! validate → identity (hash, tenant, doc id) → document upsert (best effort)
//!          → chunk → [ embed ]* → begin → [ chunk insert → embedding row ]* → commit
//! ```
//!
//! Embedding calls finish before the write transaction opens, so a slow
//! provider never holds the SQLite write lock.
//!
//! Chunk persistence is the structural part: any failure there rolls back
//! every chunk of the document and surfaces as an [`IngestError`].
//! Embedding is an enhancement: a failed or malformed vector is logged and
//! the chunk gets a NULL embedding row instead, so ingestion still succeeds
//! and the summary's `embedded_count` reflects what was actually stored.

use anyhow::Result;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chunk::{chunk_text, ChunkWindow};
use crate::config::{Config, IngestConfig, ReingestPolicy};
use crate::db;
use crate::diag;
use crate::embedding::EmbeddingClient;
use crate::hash::{content_hash, derive_doc_id};
use crate::migrate;
use crate::models::{DocumentRecord, IngestRequest, IngestSummary, TextChunk};
use crate::store::{ChunkStore, ChunkStoreError, DocumentStore, EmbeddingStore};

/// Why an ingestion call failed.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Empty text - nothing to ingest")]
    EmptyText,
    #[error("text is {len} characters, limit is {max}")]
    TooLarge { len: usize, max: usize },
    #[error("KB ingest failed for {doc_id}: {source}")]
    Chunk {
        doc_id: String,
        source: ChunkStoreError,
    },
    #[error("KB ingest failed writing embedding row for chunk {chunk_id}: {source}")]
    Embedding { chunk_id: i64, source: sqlx::Error },
    #[error("KB ingest failed: {0}")]
    Database(#[from] sqlx::Error),
}

impl IngestError {
    /// True for errors caused by the request itself rather than the store.
    pub fn is_validation(&self) -> bool {
        matches!(self, IngestError::EmptyText | IngestError::TooLarge { .. })
    }
}

/// Effective identity of the document being ingested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentIdentity {
    pub tenant_id: String,
    pub doc_id: String,
    pub content_hash: String,
}

/// Stateless ingestion service; cheap to clone and safe to share.
#[derive(Clone)]
pub struct Ingestor {
    pool: SqlitePool,
    documents: DocumentStore,
    chunks: ChunkStore,
    embeddings: EmbeddingStore,
    embedder: EmbeddingClient,
    window: ChunkWindow,
    settings: IngestConfig,
}

impl Ingestor {
    /// Build an ingestor over an existing pool.
    pub fn new(pool: SqlitePool, embedder: EmbeddingClient, config: &Config) -> Result<Self> {
        let window = ChunkWindow::new(config.chunking.chunk_chars, config.chunking.overlap_chars)?;
        Ok(Self {
            documents: DocumentStore::new(pool.clone()),
            chunks: ChunkStore::new(),
            embeddings: EmbeddingStore::new(config.embedding.encodings.clone()),
            pool,
            embedder,
            window,
            settings: config.ingest.clone(),
        })
    }

    /// Connect to the configured database and embedding provider. The
    /// schema is applied if missing.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply_schema(&pool).await?;
        if !config.embedding.is_enabled() {
            warn!("embedding provider disabled, chunks will be stored without vectors");
        }
        let embedder = EmbeddingClient::from_config(&config.embedding)?;
        Self::new(pool, embedder, config)
    }

    /// Replace the chunk store (e.g. to change generated-id retrieval).
    pub fn with_chunk_store(mut self, chunks: ChunkStore) -> Self {
        self.chunks = chunks;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn embedder(&self) -> &EmbeddingClient {
        &self.embedder
    }

    /// Ingest one document's text.
    pub async fn ingest(&self, request: &IngestRequest) -> Result<IngestSummary, IngestError> {
        let trimmed = self.validate(&request.text)?;
        let identity = self.resolve_identity(request, trimmed);

        let previous_hash = match self.settings.reingest {
            ReingestPolicy::SkipUnchanged => self.stored_hash(&identity).await,
            _ => None,
        };

        self.upsert_document(&identity, request).await;

        if previous_hash.as_deref() == Some(identity.content_hash.as_str()) {
            if let Some(summary) = self.unchanged_summary(&identity).await? {
                info!(
                    doc_id = %identity.doc_id,
                    tenant = %identity.tenant_id,
                    "content unchanged, skipping re-ingest"
                );
                return Ok(summary);
            }
        }

        let chunks = chunk_text(trimmed, self.window);
        info!(
            doc_id = %identity.doc_id,
            tenant = %identity.tenant_id,
            chunks = chunks.len(),
            "chunking complete"
        );

        let model = self
            .embedder
            .resolve_model(request.embedding_model_id.as_deref());
        debug!(model = %model, dims = ?self.embedder.dims(), "embedding model resolved");

        let vectors = self.embed_chunks(&identity, &chunks, &model).await;
        let embedded_count = self
            .persist_chunks(&identity, &chunks, &vectors, &model)
            .await?;

        if embedded_count == 0 {
            warn!(
                doc_id = %identity.doc_id,
                tenant = %identity.tenant_id,
                "ingest produced zero embeddings; retrieval falls back to non-vector matching"
            );
        }
        info!(
            doc_id = %identity.doc_id,
            tenant = %identity.tenant_id,
            chunks = chunks.len(),
            embeddings = embedded_count,
            "ingest complete"
        );

        Ok(IngestSummary {
            doc_id: identity.doc_id,
            tenant_id: identity.tenant_id,
            chunk_count: chunks.len(),
            embedded_count,
            content_hash: identity.content_hash,
            skipped: false,
        })
    }

    /// Reject blank or oversized text; returns the trimmed text.
    pub fn validate<'a>(&self, text: &'a str) -> Result<&'a str, IngestError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(IngestError::EmptyText);
        }
        let len = text.chars().count();
        if len > self.settings.max_text_chars {
            return Err(IngestError::TooLarge {
                len,
                max: self.settings.max_text_chars,
            });
        }
        Ok(trimmed)
    }

    /// Hash the trimmed text and settle the effective tenant and doc id.
    pub fn resolve_identity(&self, request: &IngestRequest, trimmed: &str) -> DocumentIdentity {
        let hash = content_hash(trimmed);
        let tenant_id = non_blank(request.tenant_id.as_deref())
            .unwrap_or(&self.settings.default_tenant)
            .to_string();
        let doc_id = non_blank(request.doc_id.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| derive_doc_id(&hash));

        DocumentIdentity {
            tenant_id,
            doc_id,
            content_hash: hash,
        }
    }

    /// Best-effort document upsert. Failures are logged and ignored; the
    /// chunk rows are still useful without the document row.
    pub async fn upsert_document(&self, identity: &DocumentIdentity, request: &IngestRequest) {
        let record = DocumentRecord {
            tenant_id: identity.tenant_id.clone(),
            doc_id: identity.doc_id.clone(),
            title: non_blank(request.title.as_deref()).map(str::to_string),
            uri: non_blank(request.uri.as_deref()).map(str::to_string),
            mime: non_blank(request.mime.as_deref()).map(str::to_string),
            tags: request.tags.clone(),
            content_hash: identity.content_hash.clone(),
        };

        if let Err(e) = self.documents.upsert(&record).await {
            warn!(
                doc_id = %identity.doc_id,
                tenant = %identity.tenant_id,
                error = %e,
                "document upsert failed, continuing"
            );
        }
    }

    /// Embed every chunk, one call at a time, before any write lock is taken.
    ///
    /// Returns one entry per chunk; `None` marks a chunk whose embedding
    /// failed and will be stored with a NULL vector.
    pub async fn embed_chunks(
        &self,
        identity: &DocumentIdentity,
        chunks: &[TextChunk],
        model: &str,
    ) -> Vec<Option<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let vector = match self.embedder.embed(model, &chunk.text).await {
                Ok(v) => {
                    debug!(chunk_index = chunk.index, len = v.len(), "got embedding");
                    Some(v)
                }
                Err(e) => {
                    warn!(
                        doc_id = %identity.doc_id,
                        chunk_index = chunk.index,
                        error = %e,
                        "embedding failed, storing NULL vector"
                    );
                    None
                }
            };
            vectors.push(vector);
        }
        vectors
    }

    /// Insert every chunk and its embedding row in one transaction.
    ///
    /// `vectors` holds one entry per chunk, as returned by
    /// [`embed_chunks`](Self::embed_chunks). No network I/O happens while
    /// the transaction is open. Returns how many chunks got a real vector.
    /// A chunk insert failure rolls back the whole document.
    pub async fn persist_chunks(
        &self,
        identity: &DocumentIdentity,
        chunks: &[TextChunk],
        vectors: &[Option<Vec<f32>>],
        model: &str,
    ) -> Result<usize, IngestError> {
        let doc_id = identity.doc_id.as_str();
        let tenant_id = identity.tenant_id.as_str();

        // Dropping `tx` on any early return rolls it back.
        let mut tx = self.pool.begin().await?;

        if self.settings.reingest == ReingestPolicy::Replace {
            let removed = self
                .embeddings
                .delete_for_document(&mut tx, tenant_id, doc_id)
                .await?;
            let rows = self
                .chunks
                .delete_for_document(&mut tx, tenant_id, doc_id)
                .await?;
            debug!(doc_id, tenant = tenant_id, chunks = rows, embeddings = removed, "replaced previous chunks");
        }

        let mut embedded = 0usize;

        for (i, chunk) in chunks.iter().enumerate() {
            let chunk_id = match self.chunks.insert(&mut tx, doc_id, tenant_id, chunk).await {
                Ok(id) => id,
                Err(source) => {
                    warn!(doc_id, chunk_index = chunk.index, error = %source, "chunk insert failed, rolling back");
                    if let Err(e) = tx.rollback().await {
                        warn!(doc_id, error = %e, "rollback failed");
                    }
                    return Err(IngestError::Chunk {
                        doc_id: doc_id.to_string(),
                        source,
                    });
                }
            };

            let vector = vectors.get(i).and_then(|v| v.as_deref());
            let stored = self
                .embeddings
                .insert(&mut tx, chunk_id, vector, model)
                .await
                .map_err(|source| IngestError::Embedding { chunk_id, source })?;
            if stored {
                embedded += 1;
            }
        }

        tx.commit().await?;
        Ok(embedded)
    }

    async fn stored_hash(&self, identity: &DocumentIdentity) -> Option<String> {
        match self
            .documents
            .content_hash(&identity.tenant_id, &identity.doc_id)
            .await
        {
            Ok(hash) => hash,
            Err(e) => {
                warn!(doc_id = %identity.doc_id, error = %e, "could not read stored content hash");
                None
            }
        }
    }

    /// Summary for an unchanged document, or `None` when it has no chunks
    /// yet and must be ingested normally.
    async fn unchanged_summary(
        &self,
        identity: &DocumentIdentity,
    ) -> Result<Option<IngestSummary>, IngestError> {
        let counts =
            diag::document_counts(&self.pool, &identity.tenant_id, &identity.doc_id).await?;
        if counts.chunks == 0 {
            return Ok(None);
        }
        Ok(Some(IngestSummary {
            doc_id: identity.doc_id.clone(),
            tenant_id: identity.tenant_id.clone(),
            chunk_count: counts.chunks as usize,
            embedded_count: counts.embeddings_non_null as usize,
            content_hash: identity.content_hash.clone(),
            skipped: true,
        }))
    }
}

/// Run `kb ingest`: ingest one request and print the summary.
pub async fn run_ingest(config: &Config, request: &IngestRequest) -> Result<()> {
    let ingestor = Ingestor::from_config(config).await?;
    let summary = ingestor.ingest(request).await?;

    println!("Ingest {}:", if summary.skipped { "skipped (unchanged)" } else { "ok" });
    println!("  tenant:       {}", summary.tenant_id);
    println!("  doc id:       {}", summary.doc_id);
    println!("  content hash: {}", summary.content_hash);
    println!("  chunks:       {}", summary.chunk_count);
    println!("  embedded:     {}", summary.embedded_count);

    ingestor.pool().close().await;
    Ok(())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
