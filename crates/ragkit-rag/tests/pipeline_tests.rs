//! End-to-end pipeline tests over the real local vector store (in-memory
//! SQLite) with a deterministic embedding client.

use async_trait::async_trait;
use ragkit_core::chunks::{ChunkRepository, InMemoryChunkRepository};
use ragkit_core::{
    CacheConfig, ContentChunk, EmbeddingConfig, RagkitError, Result, StorageConfig,
    META_CONTENT,
};
use ragkit_embedding::{EmbeddingCache, EmbeddingClient, EmbeddingResponse};
use ragkit_embedding::{CostTracker, EmbeddingService};
use ragkit_rag::RagIntegrationService;
use ragkit_storage::VectorStorageService;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

const DIMENSION: usize = 3;

/// Maps known keywords to fixed unit vectors so similarity is predictable.
struct KeywordClient {
    calls: AtomicUsize,
}

impl KeywordClient {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn vector_for(text: &str) -> Vec<f32> {
        if text.contains("alpha") {
            vec![1.0, 0.0, 0.0]
        } else if text.contains("beta") {
            vec![0.0, 1.0, 0.0]
        } else {
            vec![0.0, 0.0, 1.0]
        }
    }
}

#[async_trait]
impl EmbeddingClient for KeywordClient {
    async fn create_embeddings(&self, texts: &[String]) -> Result<EmbeddingResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(EmbeddingResponse {
            vectors: texts.iter().map(|t| Self::vector_for(t)).collect(),
            tokens_used: texts.len() * 4,
        })
    }

    fn model(&self) -> &str {
        "keyword-test-model"
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }
}

/// Chunk repository that fails `mark_embedded` for one tenant's chunks.
struct FlakyMarkRepository {
    inner: InMemoryChunkRepository,
    poisoned_ids: Vec<Uuid>,
}

#[async_trait]
impl ChunkRepository for FlakyMarkRepository {
    async fn chunk(&self, id: Uuid) -> Result<Option<ContentChunk>> {
        self.inner.chunk(id).await
    }

    async fn mark_embedded(&self, chunk_ids: &[Uuid], model: &str) -> Result<()> {
        if chunk_ids.iter().any(|id| self.poisoned_ids.contains(id)) {
            return Err(RagkitError::Database("mark_embedded failed".to_string()));
        }
        self.inner.mark_embedded(chunk_ids, model).await
    }
}

struct Harness {
    service: RagIntegrationService,
    client: Arc<KeywordClient>,
    repo: InMemoryChunkRepository,
}

async fn harness_with(daily_cap_usd: f64, repo_override: Option<Arc<dyn ChunkRepository>>) -> Harness {
    let client = Arc::new(KeywordClient::new());
    let embeddings = Arc::new(EmbeddingService::new(
        client.clone(),
        EmbeddingCache::new(),
        Arc::new(CostTracker::new(0.00002, daily_cap_usd)),
        EmbeddingConfig::default(),
    ));

    let storage = Arc::new(VectorStorageService::new(
        StorageConfig {
            vector_dimension: DIMENSION,
            ..StorageConfig::default()
        },
        &CacheConfig::default(),
    ));
    storage.initialize().await.unwrap();

    let repo = InMemoryChunkRepository::new();
    let chunks: Arc<dyn ChunkRepository> = match repo_override {
        Some(r) => r,
        None => Arc::new(repo.clone()),
    };

    Harness {
        service: RagIntegrationService::new(embeddings, storage, chunks),
        client,
        repo,
    }
}

async fn harness() -> Harness {
    harness_with(10.0, None).await
}

async fn insert_all(repo: &InMemoryChunkRepository, chunks: &[ContentChunk]) {
    for chunk in chunks {
        repo.insert(chunk.clone()).await;
    }
}

#[tokio::test]
async fn pipeline_embeds_stores_and_marks_durable() {
    let h = harness().await;
    let chunks = vec![
        ContentChunk::new("t1", "alpha facts", true),
        ContentChunk::new("t1", "beta facts", true),
    ];
    insert_all(&h.repo, &chunks).await;

    let result = h.service.process_chunks(&chunks, false).await.unwrap();
    assert_eq!(result.processed_count, 2);
    assert_eq!(result.embeddings_generated, 2);
    assert_eq!(result.embeddings_stored, 2);
    assert_eq!(result.failed_count, 0);
    assert!(result.errors.is_empty());
    assert!(result.cost_usd > 0.0);

    // Marked durable with the producing model
    for chunk in &chunks {
        let stored = h.repo.chunk(chunk.id).await.unwrap().unwrap();
        assert!(stored.has_embedding);
        assert_eq!(stored.embedding_model.as_deref(), Some("keyword-test-model"));
    }

    // Retrieval sees the stored content, ranked by similarity
    let results = h
        .service
        .search_similar_content("t1", "alpha question", 10, None)
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].metadata[META_CONTENT], "alpha facts");
    assert!(results[0].score > results[1].score);
}

#[tokio::test]
async fn tenants_cannot_see_each_other() {
    let h = harness().await;
    let chunks = vec![
        ContentChunk::new("tenant-a", "alpha secret", true),
        ContentChunk::new("tenant-b", "alpha public", true),
    ];
    insert_all(&h.repo, &chunks).await;
    h.service.process_chunks(&chunks, false).await.unwrap();

    let results = h
        .service
        .search_similar_content("tenant-b", "alpha", 10, None)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].metadata[META_CONTENT], "alpha public");
}

#[tokio::test]
async fn non_citable_content_is_stored_but_never_cited() {
    let h = harness().await;
    let chunks = vec![
        ContentChunk::new("t1", "alpha citable", true),
        ContentChunk::new("t1", "alpha private", false),
    ];
    insert_all(&h.repo, &chunks).await;
    h.service.process_chunks(&chunks, false).await.unwrap();

    let cited = h
        .service
        .search_similar_content("t1", "alpha", 10, None)
        .await
        .unwrap();
    assert_eq!(cited.len(), 1);
    assert_eq!(cited[0].metadata[META_CONTENT], "alpha citable");

    let all = h
        .service
        .search_all_content("t1", "alpha", 10, None)
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn already_embedded_chunks_are_skipped_unless_forced() {
    let h = harness().await;
    let mut chunk = ContentChunk::new("t1", "alpha existing", true);
    chunk.has_embedding = true;
    chunk.embedding_model = Some("keyword-test-model".to_string());
    h.repo.insert(chunk.clone()).await;

    let result = h
        .service
        .process_chunks(std::slice::from_ref(&chunk), false)
        .await
        .unwrap();
    assert_eq!(result.processed_count, 0);
    assert_eq!(result.embeddings_generated, 0);
    assert_eq!(h.client.calls.load(Ordering::SeqCst), 0);

    let result = h
        .service
        .process_chunks(std::slice::from_ref(&chunk), true)
        .await
        .unwrap();
    assert_eq!(result.processed_count, 1);
    assert_eq!(h.client.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failing_tenant_group_does_not_abort_others() {
    let inner = InMemoryChunkRepository::new();
    let good = ContentChunk::new("tenant-good", "alpha ok", true);
    let bad = ContentChunk::new("tenant-bad", "beta broken", true);
    inner.insert(good.clone()).await;
    inner.insert(bad.clone()).await;

    let repo = Arc::new(FlakyMarkRepository {
        inner: inner.clone(),
        poisoned_ids: vec![bad.id],
    });
    let h = harness_with(10.0, Some(repo)).await;

    let result = h
        .service
        .process_chunks(&[good.clone(), bad.clone()], false)
        .await
        .unwrap();
    assert_eq!(result.processed_count, 1);
    assert_eq!(result.failed_count, 1);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("tenant-bad"));

    // The surviving tenant is marked and searchable
    let stored = inner.chunk(good.id).await.unwrap().unwrap();
    assert!(stored.has_embedding);
    let results = h
        .service
        .search_similar_content("tenant-good", "alpha", 10, None)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);

    // The failed tenant's chunk stays re-embeddable
    let unmarked = inner.chunk(bad.id).await.unwrap().unwrap();
    assert!(!unmarked.has_embedding);
}

#[tokio::test]
async fn exhausted_budget_aborts_the_whole_call() {
    let h = harness_with(0.0, None).await;
    let chunks = vec![ContentChunk::new("t1", "alpha pricey", true)];
    insert_all(&h.repo, &chunks).await;

    let err = h.service.process_chunks(&chunks, false).await.unwrap_err();
    assert!(matches!(err, RagkitError::BudgetExceeded { .. }));
    assert_eq!(h.client.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn delete_removes_chunk_vectors() {
    let h = harness().await;
    let chunk = ContentChunk::new("t1", "alpha gone", true);
    h.repo.insert(chunk.clone()).await;
    h.service
        .process_chunks(std::slice::from_ref(&chunk), false)
        .await
        .unwrap();

    h.service
        .delete_chunk_vectors("t1", &[chunk.id])
        .await
        .unwrap();

    let results = h
        .service
        .search_similar_content("t1", "alpha", 10, None)
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn invalid_tenant_id_is_rejected() {
    let h = harness().await;
    let err = h
        .service
        .search_similar_content("  ", "alpha", 10, None)
        .await
        .unwrap_err();
    assert!(matches!(err, RagkitError::Validation(_)));
}
