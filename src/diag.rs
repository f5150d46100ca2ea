//! Knowledge-base diagnostics.
//!
//! Per-tenant and per-document row counts, the most recently touched
//! documents, and a one-shot embedding probe. Used by `kb diag`,
//! `kb diag-embed`, and the `/api/kb/diag` endpoints to confirm that
//! ingestion and vector storage are working.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::embedding::EmbeddingClient;

/// How many documents [`diagnose`] lists.
const RECENT_DOCS: i64 = 5;

/// Row counts for one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocCounts {
    pub chunks: i64,
    pub embeddings: i64,
    pub embeddings_non_null: i64,
}

/// Row counts for one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantCounts {
    pub docs: i64,
    pub chunks: i64,
    pub embeddings: i64,
    pub embeddings_non_null: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentDoc {
    pub doc_id: String,
    pub hash: String,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocDiagnostics {
    pub doc_id: String,
    #[serde(flatten)]
    pub counts: DocCounts,
}

/// Full diagnostics report. Database errors are captured in `error`
/// rather than returned.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KbDiagnostics {
    pub db_ok: bool,
    pub error: String,
    pub tenant_id: String,
    pub counts: TenantCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by_doc: Option<DocDiagnostics>,
    pub last_docs: Vec<RecentDoc>,
}

pub async fn document_counts(
    pool: &SqlitePool,
    tenant_id: &str,
    doc_id: &str,
) -> Result<DocCounts, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(c.id) AS chunks,
            COUNT(e.chunk_id) AS embeddings,
            COUNT(e.embedding) AS embeddings_non_null
        FROM chunks c
        LEFT JOIN embeddings e ON e.chunk_id = c.id
        WHERE c.tenant_id = ? AND c.doc_id = ?
        "#,
    )
    .bind(tenant_id)
    .bind(doc_id)
    .fetch_one(pool)
    .await?;

    Ok(DocCounts {
        chunks: row.get("chunks"),
        embeddings: row.get("embeddings"),
        embeddings_non_null: row.get("embeddings_non_null"),
    })
}

pub async fn tenant_counts(pool: &SqlitePool, tenant_id: &str) -> Result<TenantCounts, sqlx::Error> {
    let docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE tenant_id = ?")
        .bind(tenant_id)
        .fetch_one(pool)
        .await?;

    let row = sqlx::query(
        r#"
        SELECT
            COUNT(c.id) AS chunks,
            COUNT(e.chunk_id) AS embeddings,
            COUNT(e.embedding) AS embeddings_non_null
        FROM chunks c
        LEFT JOIN embeddings e ON e.chunk_id = c.id
        WHERE c.tenant_id = ?
        "#,
    )
    .bind(tenant_id)
    .fetch_one(pool)
    .await?;

    Ok(TenantCounts {
        docs,
        chunks: row.get("chunks"),
        embeddings: row.get("embeddings"),
        embeddings_non_null: row.get("embeddings_non_null"),
    })
}

/// Most recently updated documents of a tenant.
pub async fn recent_documents(
    pool: &SqlitePool,
    tenant_id: &str,
    limit: i64,
) -> Result<Vec<RecentDoc>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT doc_id, content_hash, active
        FROM documents
        WHERE tenant_id = ?
        ORDER BY updated_at DESC, doc_id DESC
        LIMIT ?
        "#,
    )
    .bind(tenant_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| RecentDoc {
            doc_id: row.get("doc_id"),
            hash: row.get("content_hash"),
            active: row.get::<i64, _>("active") != 0,
        })
        .collect())
}

/// Collect tenant counts, optional document counts, and recent documents.
pub async fn diagnose(pool: &SqlitePool, tenant_id: &str, doc_id: Option<&str>) -> KbDiagnostics {
    let mut report = KbDiagnostics {
        db_ok: false,
        error: String::new(),
        tenant_id: tenant_id.to_string(),
        counts: TenantCounts::default(),
        by_doc: None,
        last_docs: Vec::new(),
    };

    if let Err(e) = sqlx::query("SELECT 1").execute(pool).await {
        report.error = format!("Connectivity check failed: {}", e);
        return report;
    }
    report.db_ok = true;

    let collected = async {
        report.counts = tenant_counts(pool, tenant_id).await?;
        if let Some(doc_id) = doc_id.filter(|d| !d.trim().is_empty()) {
            report.by_doc = Some(DocDiagnostics {
                doc_id: doc_id.to_string(),
                counts: document_counts(pool, tenant_id, doc_id).await?,
            });
        }
        report.last_docs = recent_documents(pool, tenant_id, RECENT_DOCS).await?;
        Ok::<(), sqlx::Error>(())
    }
    .await;

    if let Err(e) = collected {
        tracing::warn!(tenant = tenant_id, error = %e, "diagnostics query failed");
        report.error = format!("DB error: {}", e);
    }
    report
}

/// Outcome of a single embedding call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedProbe {
    pub model_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_len: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Embed a probe text (default `"diagnostic probe"`) and report the result.
pub async fn probe_embedding(
    client: &EmbeddingClient,
    text: Option<&str>,
    model: Option<&str>,
) -> EmbedProbe {
    let input = text
        .filter(|t| !t.trim().is_empty())
        .unwrap_or("diagnostic probe");
    let model_id = client.resolve_model(model);

    match client.embed(&model_id, input).await {
        Ok(v) => EmbedProbe {
            model_id,
            ok: true,
            vector_len: Some(v.len()),
            error: None,
        },
        Err(e) => EmbedProbe {
            model_id,
            ok: false,
            vector_len: None,
            error: Some(e.to_string()),
        },
    }
}

/// Run `kb diag`: print counts for a tenant (and optionally one document).
pub async fn run_diag(config: &Config, tenant: Option<String>, doc_id: Option<String>) -> Result<()> {
    let pool = db::connect(config).await?;
    let tenant = tenant
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| config.ingest.default_tenant.clone());

    let report = diagnose(&pool, &tenant, doc_id.as_deref()).await;

    println!("kb diag");
    println!("  database:              {}", config.db.path.display());
    println!("  db ok:                 {}", report.db_ok);
    if !report.error.is_empty() {
        println!("  error:                 {}", report.error);
    }
    println!("  tenant:                {}", report.tenant_id);
    println!("  documents:             {}", report.counts.docs);
    println!("  chunks:                {}", report.counts.chunks);
    println!(
        "  embeddings:            {} ({} with vectors)",
        report.counts.embeddings, report.counts.embeddings_non_null
    );
    if let Some(doc) = &report.by_doc {
        println!();
        println!("  document {}", doc.doc_id);
        println!("    chunks:              {}", doc.counts.chunks);
        println!(
            "    embeddings:          {} ({} with vectors)",
            doc.counts.embeddings, doc.counts.embeddings_non_null
        );
    }
    if !report.last_docs.is_empty() {
        println!();
        println!("  recent documents:");
        for doc in &report.last_docs {
            let state = if doc.active { "active" } else { "inactive" };
            println!("    {}  {}  {}", doc.doc_id, doc.hash, state);
        }
    }

    pool.close().await;
    Ok(())
}

/// Run `kb diag-embed`: call the embedding provider once.
pub async fn run_diag_embed(config: &Config, text: Option<String>, model: Option<String>) -> Result<()> {
    let client = EmbeddingClient::from_config(&config.embedding)?;
    let probe = probe_embedding(&client, text.as_deref(), model.as_deref()).await;

    println!("kb diag-embed");
    println!("  provider:    {}", client.provider_name());
    println!("  model:       {}", probe.model_id);
    match (&probe.vector_len, &probe.error) {
        (Some(len), _) => println!("  ok:          vector length {}", len),
        (None, Some(err)) => println!("  failed:      {}", err),
        (None, None) => println!("  failed"),
    }
    Ok(())
}
