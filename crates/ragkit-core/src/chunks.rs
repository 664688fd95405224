//! Chunk persistence seam
//!
//! The surrounding application owns durable chunk records; the pipeline only
//! reads content/citability and flags chunks as embedded after their vectors
//! are searchable. This module defines that seam plus an in-memory
//! implementation used in tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{ContentChunk, RagkitError, Result};

/// Trait for the external chunk store.
#[async_trait]
pub trait ChunkRepository: Send + Sync {
    /// Fetch a chunk by id.
    async fn chunk(&self, id: Uuid) -> Result<Option<ContentChunk>>;

    /// Record that the given chunks have searchable vectors produced by
    /// `model`. Called only after vector storage has succeeded, so a crash
    /// never leaves a chunk flagged embedded without a stored vector.
    async fn mark_embedded(&self, chunk_ids: &[Uuid], model: &str) -> Result<()>;
}

/// In-memory chunk repository.
#[derive(Clone, Default)]
pub struct InMemoryChunkRepository {
    chunks: Arc<RwLock<HashMap<Uuid, ContentChunk>>>,
}

impl InMemoryChunkRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a chunk.
    pub async fn insert(&self, chunk: ContentChunk) {
        self.chunks.write().await.insert(chunk.id, chunk);
    }

    /// Number of stored chunks.
    pub async fn len(&self) -> usize {
        self.chunks.read().await.len()
    }

    /// Whether the repository is empty.
    pub async fn is_empty(&self) -> bool {
        self.chunks.read().await.is_empty()
    }
}

#[async_trait]
impl ChunkRepository for InMemoryChunkRepository {
    async fn chunk(&self, id: Uuid) -> Result<Option<ContentChunk>> {
        Ok(self.chunks.read().await.get(&id).cloned())
    }

    async fn mark_embedded(&self, chunk_ids: &[Uuid], model: &str) -> Result<()> {
        let mut chunks = self.chunks.write().await;
        for id in chunk_ids {
            let chunk = chunks
                .get_mut(id)
                .ok_or_else(|| RagkitError::Database(format!("unknown chunk: {id}")))?;
            chunk.has_embedding = true;
            chunk.embedding_model = Some(model.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mark_embedded_sets_model_and_flag() {
        let repo = InMemoryChunkRepository::new();
        let chunk = ContentChunk::new("t1", "text", true);
        let id = chunk.id;
        repo.insert(chunk).await;

        repo.mark_embedded(&[id], "text-embedding-3-small")
            .await
            .unwrap();

        let stored = repo.chunk(id).await.unwrap().unwrap();
        assert!(stored.has_embedding);
        assert_eq!(
            stored.embedding_model.as_deref(),
            Some("text-embedding-3-small")
        );
    }

    #[tokio::test]
    async fn mark_embedded_unknown_chunk_errors() {
        let repo = InMemoryChunkRepository::new();
        let err = repo
            .mark_embedded(&[Uuid::new_v4()], "m")
            .await
            .unwrap_err();
        assert!(matches!(err, RagkitError::Database(_)));
    }
}
