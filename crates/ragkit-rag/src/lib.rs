//! Ragkit RAG - the chunk-to-vector pipeline
//!
//! Ties the embedding service, the vector storage service, and the external
//! chunk store together. The ordering invariant lives here: a chunk is
//! flagged as embedded only after its vector is durably stored, never
//! before, so a crash between the two steps leaves the chunk re-embeddable
//! rather than silently unsearchable.

use ragkit_core::{
    ContentChunk, MetadataFilter, Namespace, ProcessingResult, RagkitError, Result, VectorRecord,
    VectorSearchResult, META_CHATBOT_ID, META_CONTENT, META_DOCUMENT_ID, META_IS_CITABLE,
    META_SOURCE_ID,
};
use ragkit_core::chunks::ChunkRepository;
use ragkit_embedding::EmbeddingService;
use ragkit_storage::VectorStorageService;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Orchestrates embed -> store -> mark-durable for content chunks, and
/// query-time retrieval over the stored vectors.
pub struct RagIntegrationService {
    embeddings: Arc<EmbeddingService>,
    storage: Arc<VectorStorageService>,
    chunks: Arc<dyn ChunkRepository>,
}

impl RagIntegrationService {
    pub fn new(
        embeddings: Arc<EmbeddingService>,
        storage: Arc<VectorStorageService>,
        chunks: Arc<dyn ChunkRepository>,
    ) -> Self {
        Self {
            embeddings,
            storage,
            chunks,
        }
    }

    /// Embed and store a batch of chunks, grouped by owning tenant.
    ///
    /// Chunks that already have an embedding are skipped unless
    /// `force_regenerate` is set. Failures are scoped: a chunk that the
    /// embedding backend rejected, or a tenant group whose storage write
    /// failed, is counted and reported in `errors` without aborting the
    /// other chunks. Only whole-call failures (invalid input, exhausted
    /// budget, auth, total backend outage) surface as `Err`.
    pub async fn process_chunks(
        &self,
        chunks: &[ContentChunk],
        force_regenerate: bool,
    ) -> Result<ProcessingResult> {
        let to_embed: Vec<&ContentChunk> = chunks
            .iter()
            .filter(|c| force_regenerate || !c.has_embedding)
            .collect();

        let mut result = ProcessingResult::default();
        if to_embed.is_empty() {
            debug!(total = chunks.len(), "no chunks need embedding");
            return Ok(result);
        }

        let texts: Vec<String> = to_embed.iter().map(|c| c.content.clone()).collect();
        let batch = self.embeddings.embed_batch(&texts).await?;

        result.embeddings_generated = batch.embeddings.len();
        result.cost_usd = batch.total_cost_usd;

        let failed_indices: HashSet<usize> =
            batch.failed_items.iter().map(|(i, _)| *i).collect();
        for (index, message) in &batch.failed_items {
            result.failed_count += 1;
            result
                .errors
                .push(format!("chunk {}: {message}", to_embed[*index].id));
        }

        // Embeddings come back in input order with failures skipped, so the
        // surviving chunks zip against them directly.
        let embedded: Vec<(&ContentChunk, Vec<f32>)> = to_embed
            .iter()
            .enumerate()
            .filter(|(i, _)| !failed_indices.contains(i))
            .map(|(_, c)| *c)
            .zip(batch.embeddings.into_iter().map(|r| r.vector))
            .collect();

        // Group by tenant so each namespace gets one storage call and one
        // failure domain.
        let mut by_tenant: BTreeMap<&str, Vec<&(&ContentChunk, Vec<f32>)>> = BTreeMap::new();
        for pair in &embedded {
            by_tenant.entry(pair.0.tenant_id.as_str()).or_default().push(pair);
        }

        let model = self.embeddings.model().to_string();
        for (tenant_id, group) in by_tenant {
            match self.store_tenant_group(tenant_id, &group, &model).await {
                Ok(stored) => {
                    result.processed_count += stored;
                    result.embeddings_stored += stored;
                }
                Err(e) => {
                    warn!(tenant_id, error = %e, "tenant group failed");
                    result.failed_count += group.len();
                    result
                        .errors
                        .push(format!("tenant {tenant_id}: {e}"));
                }
            }
        }

        info!(
            processed = result.processed_count,
            failed = result.failed_count,
            cost_usd = result.cost_usd,
            "chunk processing finished"
        );
        Ok(result)
    }

    async fn store_tenant_group(
        &self,
        tenant_id: &str,
        group: &[&(&ContentChunk, Vec<f32>)],
        model: &str,
    ) -> Result<usize> {
        let namespace = Namespace::for_tenant(tenant_id)?;

        let records: Vec<VectorRecord> = group
            .iter()
            .map(|(chunk, vector)| Self::to_record(chunk, vector.clone()))
            .collect();
        self.storage.store_embeddings(&records, &namespace).await?;

        // Mark durable strictly after storage succeeded.
        let ids: Vec<uuid::Uuid> = group.iter().map(|(chunk, _)| chunk.id).collect();
        self.chunks.mark_embedded(&ids, model).await?;

        Ok(group.len())
    }

    fn to_record(chunk: &ContentChunk, vector: Vec<f32>) -> VectorRecord {
        let mut record = VectorRecord::new(chunk.id.to_string(), vector)
            .with_metadata(META_CONTENT, chunk.content.clone())
            .with_metadata(META_IS_CITABLE, chunk.is_citable)
            .with_metadata(META_CHATBOT_ID, chunk.tenant_id.clone());
        if let Some(source_id) = &chunk.source_id {
            record = record.with_metadata(META_SOURCE_ID, source_id.clone());
        }
        if let Some(document_id) = chunk.document_id {
            record = record.with_metadata(META_DOCUMENT_ID, document_id.to_string());
        }
        record
    }

    /// Retrieve citable content similar to a natural-language query.
    ///
    /// Embeds the query, then searches the tenant's namespace restricted to
    /// citable records. Errors distinguish the query-embedding step from the
    /// search step so callers can tell quota problems from storage problems.
    pub async fn search_similar_content(
        &self,
        tenant_id: &str,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorSearchResult>> {
        let namespace = Namespace::for_tenant(tenant_id)?;

        let query_embedding = self.embeddings.embed(query).await.map_err(|e| match e {
            e @ RagkitError::Validation(_) | e @ RagkitError::BudgetExceeded { .. } => e,
            other => RagkitError::QueryEmbedding(other.to_string()),
        })?;

        self.storage
            .search_citable_only(&query_embedding.vector, top_k, &namespace, filter)
            .await
    }

    /// Retrieve similar content without the citability restriction.
    /// Internal maintenance surface, not for end-user answers.
    pub async fn search_all_content(
        &self,
        tenant_id: &str,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorSearchResult>> {
        let namespace = Namespace::for_tenant(tenant_id)?;
        let query_embedding = self.embeddings.embed(query).await.map_err(|e| match e {
            e @ RagkitError::Validation(_) | e @ RagkitError::BudgetExceeded { .. } => e,
            other => RagkitError::QueryEmbedding(other.to_string()),
        })?;
        self.storage
            .search_all_content(&query_embedding.vector, top_k, &namespace, filter)
            .await
    }

    /// Remove stored vectors for the given chunks within a tenant.
    pub async fn delete_chunk_vectors(
        &self,
        tenant_id: &str,
        chunk_ids: &[uuid::Uuid],
    ) -> Result<()> {
        let namespace = Namespace::for_tenant(tenant_id)?;
        let ids: Vec<String> = chunk_ids.iter().map(|id| id.to_string()).collect();
        self.storage.delete_embeddings(&ids, &namespace).await
    }
}
