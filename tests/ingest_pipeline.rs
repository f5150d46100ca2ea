use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use kb_ingest::config::{
    ChunkingConfig, Config, DbConfig, EmbeddingConfig, IngestConfig, ReingestPolicy, ServerConfig,
};
use kb_ingest::{db, migrate};
use kb_ingest::embedding::{DisabledProvider, EmbedError, EmbeddingClient, EmbeddingProvider};
use kb_ingest::hash::{content_hash, derive_doc_id};
use kb_ingest::ingest::{IngestError, Ingestor};
use kb_ingest::models::IngestRequest;
use kb_ingest::store::blob_to_vec;
use sqlx::SqlitePool;
use std::time::Duration;

/// Returns a constant vector of the configured length and records the
/// models it was called with.
struct FixedProvider {
    dims: usize,
    models: Mutex<Vec<String>>,
}

impl FixedProvider {
    fn new(dims: usize) -> Arc<Self> {
        Arc::new(Self {
            dims,
            models: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FixedProvider {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn embed(&self, model: &str, _text: &str) -> Result<Vec<f32>, EmbedError> {
        self.models.lock().unwrap().push(model.to_string());
        Ok(vec![0.5; self.dims])
    }
}

/// Takes two seconds per call for texts made of `A`s, answers at once
/// otherwise.
struct SlowProvider;

#[async_trait]
impl EmbeddingProvider for SlowProvider {
    fn name(&self) -> &str {
        "slow"
    }

    async fn embed(&self, _model: &str, text: &str) -> Result<Vec<f32>, EmbedError> {
        if text.starts_with('A') {
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        Ok(vec![0.5; 1024])
    }
}

struct DownProvider;

#[async_trait]
impl EmbeddingProvider for DownProvider {
    fn name(&self) -> &str {
        "down"
    }

    async fn embed(&self, _model: &str, _text: &str) -> Result<Vec<f32>, EmbedError> {
        Err(EmbedError::Transport("connection refused".to_string()))
    }
}

fn test_config(reingest: ReingestPolicy) -> Config {
    Config {
        db: DbConfig {
            path: ":memory:".into(),
        },
        chunking: ChunkingConfig::default(),
        embedding: EmbeddingConfig::default(),
        ingest: IngestConfig {
            reingest,
            ..IngestConfig::default()
        },
        server: ServerConfig::default(),
    }
}

async fn ingestor_with(provider: Arc<dyn EmbeddingProvider>, reingest: ReingestPolicy) -> Ingestor {
    let config = test_config(reingest);
    let pool = db::connect_memory().await.unwrap();
    let embedder = EmbeddingClient::new(provider, &config.embedding);
    Ingestor::new(pool, embedder, &config).unwrap()
}

async fn count(pool: &SqlitePool, sql: &str) -> i64 {
    sqlx::query_scalar(sql).fetch_one(pool).await.unwrap()
}

fn ranges(rows: &[String]) -> Vec<(u64, u64)> {
    rows.iter()
        .map(|meta| {
            let v: serde_json::Value = serde_json::from_str(meta).unwrap();
            (
                v["range"]["start"].as_u64().unwrap(),
                v["range"]["end"].as_u64().unwrap(),
            )
        })
        .collect()
}

#[tokio::test]
async fn test_simple_ingest_scenario() {
    let ing = ingestor_with(Arc::new(DisabledProvider), ReingestPolicy::Append).await;
    let text = "A".repeat(5000);

    let summary = ing.ingest(&IngestRequest::from_text(text.clone())).await.unwrap();

    assert_eq!(summary.chunk_count, 3);
    assert_eq!(summary.tenant_id, "default");
    assert_eq!(summary.content_hash, content_hash(&text));
    assert_eq!(summary.doc_id, derive_doc_id(&summary.content_hash));
    assert!(summary.doc_id.starts_with("doc_"));

    let metas: Vec<String> =
        sqlx::query_scalar("SELECT source_meta FROM chunks ORDER BY chunk_index")
            .fetch_all(ing.pool())
            .await
            .unwrap();
    assert_eq!(ranges(&metas), vec![(0, 2000), (1700, 3700), (3400, 5000)]);

    let indexes: Vec<i64> = sqlx::query_scalar("SELECT chunk_index FROM chunks ORDER BY id")
        .fetch_all(ing.pool())
        .await
        .unwrap();
    assert_eq!(indexes, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_every_chunk_gets_one_embedding_row() {
    let ing = ingestor_with(FixedProvider::new(1024), ReingestPolicy::Append).await;

    let summary = ing
        .ingest(&IngestRequest::from_text("B".repeat(5000)))
        .await
        .unwrap();
    assert_eq!(summary.embedded_count, summary.chunk_count);

    let orphans = count(
        ing.pool(),
        "SELECT COUNT(*) FROM chunks c LEFT JOIN embeddings e ON e.chunk_id = c.id WHERE e.chunk_id IS NULL",
    )
    .await;
    assert_eq!(orphans, 0);

    let blob: Vec<u8> = sqlx::query_scalar("SELECT embedding FROM embeddings LIMIT 1")
        .fetch_one(ing.pool())
        .await
        .unwrap();
    let vector = blob_to_vec(&blob);
    assert_eq!(vector.len(), 1024);
    assert!(vector.iter().all(|v| *v == 0.5));
}

#[tokio::test]
async fn test_embedding_outage_stores_null_vectors() {
    let ing = ingestor_with(Arc::new(DownProvider), ReingestPolicy::Append).await;

    let summary = ing
        .ingest(&IngestRequest::from_text("C".repeat(5000)))
        .await
        .unwrap();
    assert_eq!(summary.chunk_count, 3);
    assert_eq!(summary.embedded_count, 0);

    assert_eq!(count(ing.pool(), "SELECT COUNT(*) FROM embeddings").await, 3);
    assert_eq!(
        count(ing.pool(), "SELECT COUNT(*) FROM embeddings WHERE embedding IS NULL").await,
        3
    );
}

#[tokio::test]
async fn test_wrong_dimensions_count_as_not_embedded() {
    let ing = ingestor_with(FixedProvider::new(8), ReingestPolicy::Append).await;

    let summary = ing.ingest(&IngestRequest::from_text("short")).await.unwrap();
    assert_eq!(summary.chunk_count, 1);
    assert_eq!(summary.embedded_count, 0);
}

#[tokio::test]
async fn test_model_override_reaches_provider_and_row() {
    let provider = FixedProvider::new(1024);
    let ing = ingestor_with(provider.clone(), ReingestPolicy::Append).await;

    let request = IngestRequest {
        embedding_model_id: Some("titan-v2".to_string()),
        ..IngestRequest::from_text("hello")
    };
    ing.ingest(&request).await.unwrap();
    ing.ingest(&IngestRequest::from_text("world")).await.unwrap();

    let models = provider.models.lock().unwrap().clone();
    assert_eq!(models, vec!["titan-v2", "cohere.embed-english-v3.0"]);

    let stored: Vec<String> = sqlx::query_scalar("SELECT model FROM embeddings ORDER BY chunk_id")
        .fetch_all(ing.pool())
        .await
        .unwrap();
    assert_eq!(stored, vec!["titan-v2", "cohere.embed-english-v3.0"]);
}

#[tokio::test]
async fn test_reingest_under_explicit_id_accumulates() {
    let ing = ingestor_with(Arc::new(DisabledProvider), ReingestPolicy::Append).await;
    let first = IngestRequest {
        doc_id: Some("handbook".to_string()),
        ..IngestRequest::from_text("A".repeat(5000))
    };
    let second = IngestRequest {
        text: "B".repeat(5000),
        ..first.clone()
    };

    ing.ingest(&first).await.unwrap();
    let summary = ing.ingest(&second).await.unwrap();
    assert_eq!(summary.chunk_count, 3);

    assert_eq!(count(ing.pool(), "SELECT COUNT(*) FROM chunks").await, 6);
    assert_eq!(count(ing.pool(), "SELECT COUNT(*) FROM embeddings").await, 6);
    assert_eq!(count(ing.pool(), "SELECT COUNT(*) FROM documents").await, 1);

    let hash: String = sqlx::query_scalar("SELECT content_hash FROM documents")
        .fetch_one(ing.pool())
        .await
        .unwrap();
    assert_eq!(hash, content_hash(&"B".repeat(5000)));
}

#[tokio::test]
async fn test_replace_policy_drops_previous_chunks() {
    let ing = ingestor_with(FixedProvider::new(1024), ReingestPolicy::Replace).await;
    let first = IngestRequest {
        doc_id: Some("handbook".to_string()),
        ..IngestRequest::from_text("A".repeat(5000))
    };
    let second = IngestRequest {
        text: "short replacement".to_string(),
        ..first.clone()
    };

    ing.ingest(&first).await.unwrap();
    let summary = ing.ingest(&second).await.unwrap();
    assert_eq!(summary.chunk_count, 1);

    assert_eq!(count(ing.pool(), "SELECT COUNT(*) FROM chunks").await, 1);
    assert_eq!(count(ing.pool(), "SELECT COUNT(*) FROM embeddings").await, 1);
    let text: String = sqlx::query_scalar("SELECT text FROM chunks")
        .fetch_one(ing.pool())
        .await
        .unwrap();
    assert_eq!(text, "short replacement");
}

#[tokio::test]
async fn test_skip_unchanged_policy() {
    let ing = ingestor_with(FixedProvider::new(1024), ReingestPolicy::SkipUnchanged).await;
    let request = IngestRequest::from_text("A".repeat(5000));

    let first = ing.ingest(&request).await.unwrap();
    assert!(!first.skipped);

    let again = ing.ingest(&request).await.unwrap();
    assert!(again.skipped);
    assert_eq!(again.doc_id, first.doc_id);
    assert_eq!(again.chunk_count, 3);
    assert_eq!(again.embedded_count, 3);
    assert_eq!(count(ing.pool(), "SELECT COUNT(*) FROM chunks").await, 3);

    let changed = IngestRequest {
        doc_id: Some(first.doc_id.clone()),
        ..IngestRequest::from_text("different text")
    };
    let summary = ing.ingest(&changed).await.unwrap();
    assert!(!summary.skipped);
    assert_eq!(count(ing.pool(), "SELECT COUNT(*) FROM chunks").await, 4);
}

#[tokio::test]
async fn test_short_text_is_one_chunk() {
    let ing = ingestor_with(Arc::new(DisabledProvider), ReingestPolicy::Append).await;

    let summary = ing
        .ingest(&IngestRequest::from_text("  Hello world  "))
        .await
        .unwrap();
    assert_eq!(summary.chunk_count, 1);
    assert_eq!(summary.content_hash, content_hash("Hello world"));

    let (text, meta): (String, String) = sqlx::query_as("SELECT text, source_meta FROM chunks")
        .fetch_one(ing.pool())
        .await
        .unwrap();
    assert_eq!(text, "Hello world");
    assert_eq!(ranges(&[meta]), vec![(0, 11)]);
}

#[tokio::test]
async fn test_chunk_failure_rolls_back_document() {
    let ing = ingestor_with(FixedProvider::new(1024), ReingestPolicy::Append).await;
    sqlx::query(
        "CREATE TRIGGER fail_third_chunk BEFORE INSERT ON chunks \
         WHEN NEW.chunk_index = 2 BEGIN SELECT RAISE(ABORT, 'disk full'); END",
    )
    .execute(ing.pool())
    .await
    .unwrap();

    let err = ing
        .ingest(&IngestRequest::from_text("A".repeat(5000)))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Chunk { .. }));
    assert!(!err.is_validation());

    assert_eq!(count(ing.pool(), "SELECT COUNT(*) FROM chunks").await, 0);
    assert_eq!(count(ing.pool(), "SELECT COUNT(*) FROM embeddings").await, 0);
}

#[tokio::test]
async fn test_validation_failures_touch_nothing() {
    let provider = FixedProvider::new(1024);
    let ing = ingestor_with(provider.clone(), ReingestPolicy::Append).await;

    let blank = ing.ingest(&IngestRequest::from_text(" \n ")).await.unwrap_err();
    assert!(matches!(blank, IngestError::EmptyText));
    let huge = ing
        .ingest(&IngestRequest::from_text("x".repeat(400_001)))
        .await
        .unwrap_err();
    assert!(matches!(huge, IngestError::TooLarge { .. }));

    assert_eq!(count(ing.pool(), "SELECT COUNT(*) FROM documents").await, 0);
    assert_eq!(count(ing.pool(), "SELECT COUNT(*) FROM chunks").await, 0);
    assert!(provider.models.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_tenants_do_not_share_documents() {
    let ing = ingestor_with(Arc::new(DisabledProvider), ReingestPolicy::Append).await;
    let for_tenant = |tenant: &str| IngestRequest {
        tenant_id: Some(tenant.to_string()),
        tags: vec![tenant.to_string()],
        ..IngestRequest::from_text("shared policy text")
    };

    let a = ing.ingest(&for_tenant("acme")).await.unwrap();
    let b = ing.ingest(&for_tenant("globex")).await.unwrap();
    assert_eq!(a.doc_id, b.doc_id);

    let tags: Vec<String> =
        sqlx::query_scalar("SELECT tags_json FROM documents ORDER BY tenant_id")
            .fetch_all(ing.pool())
            .await
            .unwrap();
    assert_eq!(tags, vec![r#"["acme"]"#, r#"["globex"]"#]);
    assert_eq!(
        count(ing.pool(), "SELECT COUNT(*) FROM chunks WHERE tenant_id = 'acme'").await,
        1
    );
}

#[tokio::test]
async fn test_ingest_survives_missing_documents_table() {
    let ing = ingestor_with(Arc::new(DisabledProvider), ReingestPolicy::Append).await;
    sqlx::query("DROP TABLE documents")
        .execute(ing.pool())
        .await
        .unwrap();

    let summary = ing.ingest(&IngestRequest::from_text("still stored")).await.unwrap();
    assert_eq!(summary.chunk_count, 1);
    assert_eq!(count(ing.pool(), "SELECT COUNT(*) FROM chunks").await, 1);
}

#[tokio::test]
async fn test_slow_embedding_does_not_block_other_documents() {
    let tmp = tempfile::TempDir::new().unwrap();
    let config = Config {
        db: DbConfig {
            path: tmp.path().join("kb.sqlite"),
        },
        ..test_config(ReingestPolicy::Append)
    };
    let pool = db::connect(&config).await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();
    let embedder = EmbeddingClient::new(Arc::new(SlowProvider), &config.embedding);
    let ing = Ingestor::new(pool, embedder, &config).unwrap();

    // Three slow chunks keep the first document busy for about six
    // seconds, past the five second busy timeout.
    let slow = IngestRequest::from_text("A".repeat(5000));
    let quick = IngestRequest::from_text("doc two text");
    let (first, second) = tokio::join!(ing.ingest(&slow), async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        ing.ingest(&quick).await
    });

    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first.embedded_count, 3);
    assert_eq!(second.embedded_count, 1);
    assert_eq!(count(ing.pool(), "SELECT COUNT(*) FROM chunks").await, 4);
    assert_eq!(
        count(ing.pool(), "SELECT COUNT(*) FROM embeddings WHERE embedding IS NOT NULL").await,
        4
    );
}
