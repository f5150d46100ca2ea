//! Document-level metadata rows.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::models::DocumentRecord;

/// Upserts and reads rows of the `documents` table.
#[derive(Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
}

impl DocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert the document or refresh the existing `(tenant_id, doc_id)` row.
    ///
    /// On conflict the content hash is replaced and the row reactivated.
    /// Title, uri and mime are only overwritten when supplied; tags only
    /// when the new list is non-empty.
    pub async fn upsert(&self, doc: &DocumentRecord) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO documents (tenant_id, doc_id, title, uri, mime, tags_json,
                                   content_hash, active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
            ON CONFLICT(tenant_id, doc_id) DO UPDATE SET
                content_hash = excluded.content_hash,
                active = 1,
                title = COALESCE(excluded.title, documents.title),
                uri = COALESCE(excluded.uri, documents.uri),
                mime = COALESCE(excluded.mime, documents.mime),
                tags_json = CASE
                    WHEN excluded.tags_json = '[]' THEN documents.tags_json
                    ELSE excluded.tags_json
                END,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&doc.tenant_id)
        .bind(&doc.doc_id)
        .bind(&doc.title)
        .bind(&doc.uri)
        .bind(&doc.mime)
        .bind(doc.tags_json())
        .bind(&doc.content_hash)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Stored content hash for a document, if the row exists.
    pub async fn content_hash(&self, tenant_id: &str, doc_id: &str) -> Result<Option<String>> {
        let hash: Option<String> = sqlx::query_scalar(
            "SELECT content_hash FROM documents WHERE tenant_id = ? AND doc_id = ?",
        )
        .bind(tenant_id)
        .bind(doc_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use sqlx::Row;

    fn record(tenant: &str, doc_id: &str, hash: &str, tags: &[&str]) -> DocumentRecord {
        DocumentRecord {
            tenant_id: tenant.to_string(),
            doc_id: doc_id.to_string(),
            title: None,
            uri: None,
            mime: Some("text/plain".to_string()),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            content_hash: hash.to_string(),
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_hash_and_reactivates() {
        let pool = db::connect_memory().await.unwrap();
        let store = DocumentStore::new(pool.clone());

        store.upsert(&record("t1", "d1", "h1", &["a"])).await.unwrap();
        sqlx::query("UPDATE documents SET active = 0")
            .execute(&pool)
            .await
            .unwrap();
        store.upsert(&record("t1", "d1", "h2", &[])).await.unwrap();

        let row = sqlx::query("SELECT content_hash, active, tags_json FROM documents")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.get::<String, _>("content_hash"), "h2");
        assert_eq!(row.get::<i64, _>("active"), 1);
        // Empty tag list keeps the stored tags.
        assert_eq!(row.get::<String, _>("tags_json"), r#"["a"]"#);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_upsert_refreshes_supplied_tags() {
        let pool = db::connect_memory().await.unwrap();
        let store = DocumentStore::new(pool.clone());

        store.upsert(&record("t1", "d1", "h1", &["a"])).await.unwrap();
        store.upsert(&record("t1", "d1", "h1", &["b", "c"])).await.unwrap();

        let tags: String = sqlx::query_scalar("SELECT tags_json FROM documents")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(tags, r#"["b","c"]"#);
    }

    #[tokio::test]
    async fn test_same_doc_id_in_two_tenants_stays_separate() {
        let pool = db::connect_memory().await.unwrap();
        let store = DocumentStore::new(pool.clone());

        store.upsert(&record("t1", "d1", "h1", &[])).await.unwrap();
        store.upsert(&record("t2", "d1", "h2", &[])).await.unwrap();

        assert_eq!(
            store.content_hash("t1", "d1").await.unwrap().as_deref(),
            Some("h1")
        );
        assert_eq!(
            store.content_hash("t2", "d1").await.unwrap().as_deref(),
            Some("h2")
        );
        assert_eq!(store.content_hash("t3", "d1").await.unwrap(), None);
    }
}
