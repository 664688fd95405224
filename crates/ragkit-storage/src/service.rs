//! Vector storage service
//!
//! Owns backend selection and the search-result cache. On initialization it
//! probes the remote ANN index and falls back to the local SQL store when
//! the probe fails, so calling code never branches on which backend is
//! live. Every operation before `initialize` fails with
//! `StorageNotInitialized` instead of silently picking a default.

use moka::future::Cache;
use ragkit_core::{
    BackendStats, CacheConfig, MetadataFilter, Namespace, RagkitError, Result, StorageConfig,
    VectorRecord, VectorSearchResult, META_IS_CITABLE,
};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::local_store::LocalVectorStore;
use crate::qdrant_store::QdrantStore;
use crate::VectorStoreBackend;

/// Which backend `initialize` ended up selecting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectedBackend {
    /// Remote approximate-nearest-neighbor index (Qdrant)
    RemoteAnn,
    /// Local SQL store (Postgres or SQLite)
    LocalSql,
}

/// Storage facade over the active vector backend
pub struct VectorStorageService {
    config: StorageConfig,
    backend: RwLock<Option<Arc<dyn VectorStoreBackend>>>,
    search_cache: Cache<u64, Arc<Vec<VectorSearchResult>>>,
}

impl VectorStorageService {
    pub fn new(config: StorageConfig, cache_config: &CacheConfig) -> Self {
        let search_cache = Cache::builder()
            .max_capacity(cache_config.search_max_capacity)
            .time_to_live(Duration::from_secs(cache_config.search_ttl_secs))
            .build();
        Self {
            config,
            backend: RwLock::new(None),
            search_cache,
        }
    }

    /// Select and connect a backend.
    ///
    /// Tries the remote index first when configured; any probe failure
    /// degrades to the local store rather than failing startup. Idempotent:
    /// a second call replaces the active backend.
    pub async fn initialize(&self) -> Result<SelectedBackend> {
        if self.config.qdrant_url.is_some() {
            match self.try_remote().await {
                Ok(store) => {
                    info!(backend = store.name(), "vector storage initialized");
                    *self.backend.write().await = Some(store);
                    return Ok(SelectedBackend::RemoteAnn);
                }
                Err(e) => {
                    warn!(error = %e, "remote vector index unavailable, falling back to local store");
                }
            }
        }

        let store = Arc::new(LocalVectorStore::connect(&self.config).await?);
        info!(backend = store.name(), "vector storage initialized");
        *self.backend.write().await = Some(store);
        Ok(SelectedBackend::LocalSql)
    }

    /// Install a specific backend, bypassing probing. Used in tests and
    /// by callers that manage their own backend lifecycle.
    pub async fn initialize_with(&self, backend: Arc<dyn VectorStoreBackend>) {
        *self.backend.write().await = Some(backend);
    }

    async fn try_remote(&self) -> Result<Arc<dyn VectorStoreBackend>> {
        let store = QdrantStore::new(&self.config)?;
        store.init_collection().await?;
        Ok(Arc::new(store))
    }

    async fn backend(&self) -> Result<Arc<dyn VectorStoreBackend>> {
        self.backend
            .read()
            .await
            .clone()
            .ok_or(RagkitError::StorageNotInitialized)
    }

    /// Store records in the active backend, batched by `upsert_batch_size`
    pub async fn store_embeddings(
        &self,
        records: &[VectorRecord],
        namespace: &Namespace,
    ) -> Result<()> {
        let backend = self.backend().await?;
        let batch_size = self.config.upsert_batch_size.max(1);
        for batch in records.chunks(batch_size) {
            backend.upsert(batch, namespace).await?;
        }
        // Stored rows shift rankings; serving stale hits past the TTL
        // window is not worth per-namespace invalidation here.
        if !records.is_empty() {
            self.search_cache.invalidate_all();
        }
        Ok(())
    }

    /// Search within the namespace, narrowed to citable content only.
    ///
    /// This is the retrieval path for user-facing answers: non-citable
    /// context never reaches it regardless of what the caller's filter says.
    pub async fn search_citable_only(
        &self,
        query: &[f32],
        top_k: usize,
        namespace: &Namespace,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorSearchResult>> {
        let effective = match filter {
            Some(f) => f.clone().with(META_IS_CITABLE, true),
            None => MetadataFilter::citable_only(),
        };
        self.search_similar(query, top_k, namespace, Some(&effective))
            .await
    }

    /// Search within the namespace with no citability restriction.
    /// For internal tooling and re-indexing, not user-facing retrieval.
    pub async fn search_all_content(
        &self,
        query: &[f32],
        top_k: usize,
        namespace: &Namespace,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorSearchResult>> {
        self.search_similar(query, top_k, namespace, filter).await
    }

    /// Filter-respecting similarity search with a short-TTL result cache
    pub async fn search_similar(
        &self,
        query: &[f32],
        top_k: usize,
        namespace: &Namespace,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorSearchResult>> {
        let backend = self.backend().await?;
        let key = Self::cache_key(query, top_k, namespace, filter);

        if let Some(cached) = self.search_cache.get(&key).await {
            return Ok(cached.as_ref().clone());
        }

        let results = backend.search(query, top_k, namespace, filter).await?;
        self.search_cache
            .insert(key, Arc::new(results.clone()))
            .await;
        Ok(results)
    }

    /// Delete records by id within the namespace
    pub async fn delete_embeddings(&self, ids: &[String], namespace: &Namespace) -> Result<()> {
        let backend = self.backend().await?;
        backend.delete(ids, namespace).await?;
        if !ids.is_empty() {
            self.search_cache.invalidate_all();
        }
        Ok(())
    }

    /// Statistics from the active backend
    pub async fn get_stats(&self) -> Result<BackendStats> {
        self.backend().await?.stats().await
    }

    fn cache_key(
        query: &[f32],
        top_k: usize,
        namespace: &Namespace,
        filter: Option<&MetadataFilter>,
    ) -> u64 {
        let mut hasher = std::hash::DefaultHasher::new();
        for v in query {
            v.to_bits().hash(&mut hasher);
        }
        top_k.hash(&mut hasher);
        namespace.as_str().hash(&mut hasher);
        if let Some(filter) = filter {
            for (k, v) in &filter.equals {
                k.hash(&mut hasher);
                v.to_string().hash(&mut hasher);
            }
        }
        hasher.finish()
    }
}
