//! Ragkit Core - Domain models, errors, and shared types
//!
//! This crate defines the core abstractions used throughout the ragkit
//! retrieval pipeline:
//! - Tenant namespaces (the vector-storage isolation boundary)
//! - Vector records, search results, and metadata filters
//! - Embedding and batch-processing result types
//! - Common error taxonomy
//! - Configuration management
//! - The chunk persistence seam (external collaborator)

pub mod chunks;
pub mod config;
pub mod logging;

pub use chunks::{ChunkRepository, InMemoryChunkRepository};
pub use config::{
    AppConfig, BudgetConfig, CacheConfig, ConfigError, EmbeddingConfig, LoggingConfig,
    StorageConfig,
};
pub use logging::init_tracing;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Core error taxonomy for retrieval pipeline operations.
///
/// Callers can branch on the kind: validation and auth errors mean "fix the
/// input / credentials"; transient kinds are safe to retry later; budget and
/// storage-initialization errors are operational states.
#[derive(Error, Debug)]
pub enum RagkitError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Rate limited by upstream: {0}")]
    RateLimited(String),

    #[error("Upstream call timed out: {0}")]
    Timeout(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Daily budget exceeded: estimated ${estimated:.4} over remaining ${remaining:.4}")]
    BudgetExceeded { estimated: f64, remaining: f64 },

    #[error("Vector storage is not initialized")]
    StorageNotInitialized,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Query embedding failed: {0}")]
    QueryEmbedding(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RagkitError {
    /// Whether this error is a transient upstream failure eligible for
    /// bounded retry. Everything else either cannot succeed on retry
    /// (validation, auth) or is an explicit operational state.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Timeout(_) | Self::Unavailable(_)
        )
    }
}

impl From<config::ConfigError> for RagkitError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RagkitError>;

// ============================================================================
// Namespace
// ============================================================================

/// Tenant-scoped partition key for vector storage.
///
/// The namespace is the isolation boundary: a search or upsert scoped to one
/// namespace must never observe records stored under another. Construction
/// rejects empty and whitespace-only values, so an invalid namespace cannot
/// exist at the type level. There is no default namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

impl Namespace {
    /// Create a namespace from a raw string.
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(RagkitError::Validation(
                "namespace must be a non-empty string".to_string(),
            ));
        }
        if raw.chars().any(|c| c.is_control()) {
            return Err(RagkitError::Validation(
                "namespace must not contain control characters".to_string(),
            ));
        }
        Ok(Self(raw))
    }

    /// Build the canonical per-tenant namespace (`chatbot_<tenant_id>`).
    pub fn for_tenant(tenant_id: &str) -> Result<Self> {
        if tenant_id.trim().is_empty() {
            return Err(RagkitError::Validation(
                "tenant id must be a non-empty string".to_string(),
            ));
        }
        Self::new(format!("chatbot_{tenant_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Namespace {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::new(value).map_err(|e| e.to_string())
    }
}

impl From<Namespace> for String {
    fn from(ns: Namespace) -> Self {
        ns.0
    }
}

// ============================================================================
// Vector Records
// ============================================================================

/// Metadata key for the chunk text content.
pub const META_CONTENT: &str = "content";
/// Metadata key for the citability privacy flag.
pub const META_IS_CITABLE: &str = "is_citable";
/// Metadata key for the owning tenant.
pub const META_CHATBOT_ID: &str = "chatbot_id";
/// Metadata key for the source identifier.
pub const META_SOURCE_ID: &str = "source_id";
/// Metadata key for the parent document.
pub const META_DOCUMENT_ID: &str = "document_id";

/// A vector persisted by a storage backend.
///
/// `id` is caller-assigned and unique within a namespace. Records are
/// replaced wholesale on upsert with the same id and deleted by id list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Caller-assigned identifier, unique within the namespace
    pub id: String,

    /// Embedding vector
    pub embedding: Vec<f32>,

    /// Arbitrary metadata; `content`, `is_citable`, and `chatbot_id` are
    /// required by the pipeline
    pub metadata: HashMap<String, serde_json::Value>,
}

impl VectorRecord {
    /// Create a record with empty metadata.
    pub fn new(id: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            embedding,
            metadata: HashMap::new(),
        }
    }

    /// Add a metadata field.
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Chunk text content, if present.
    pub fn content(&self) -> Option<&str> {
        self.metadata.get(META_CONTENT).and_then(|v| v.as_str())
    }

    /// Citability flag; defaults to false when absent.
    pub fn is_citable(&self) -> bool {
        self.metadata
            .get(META_IS_CITABLE)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// A single similarity search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSearchResult {
    /// Record id
    pub id: String,

    /// Cosine similarity in [-1, 1]; higher is more similar
    pub score: f32,

    /// Stored metadata
    pub metadata: HashMap<String, serde_json::Value>,
}

impl VectorSearchResult {
    /// Chunk text content, if present.
    pub fn content(&self) -> Option<&str> {
        self.metadata.get(META_CONTENT).and_then(|v| v.as_str())
    }
}

/// Aggregate statistics reported by a storage backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendStats {
    pub total_vectors: u64,
    pub namespace_count: u64,
    pub backend_name: String,
}

// ============================================================================
// Metadata Filter
// ============================================================================

/// Equality conditions applied to record metadata during search.
///
/// Filtering narrows results within a namespace; it is never a substitute
/// for namespace isolation, which the backend enforces unconditionally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    /// Field -> required value, all conditions must hold
    pub equals: BTreeMap<String, serde_json::Value>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality condition.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.equals.insert(key.into(), value.into());
        self
    }

    /// Filter selecting only citable content.
    pub fn citable_only() -> Self {
        Self::new().with(META_IS_CITABLE, true)
    }

    /// Whether the given metadata satisfies every condition.
    pub fn matches(&self, metadata: &HashMap<String, serde_json::Value>) -> bool {
        self.equals
            .iter()
            .all(|(k, v)| metadata.get(k) == Some(v))
    }

    pub fn is_empty(&self) -> bool {
        self.equals.is_empty()
    }
}

// ============================================================================
// Embedding Results
// ============================================================================

/// One computed (or cache-served) embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// First 16 hex chars of SHA-256 over `"{text}:{model}"`
    pub text_hash: String,

    /// Embedding model that produced the vector
    pub model: String,

    /// The embedding vector
    pub vector: Vec<f32>,

    /// Tokens consumed for this text
    pub token_count: usize,

    /// Whether this record was served from cache
    pub cached: bool,

    /// Cost attributed to this text in USD (0 for cache hits)
    pub cost_usd: f64,
}

/// Outcome of one `embed_batch` invocation.
///
/// `embeddings` is in the caller's original input order. Per-item failures
/// are recorded in `failed_items` as `(input index, error message)` without
/// aborting items that succeeded.
#[derive(Debug, Clone, Default)]
pub struct BatchEmbeddingResult {
    pub embeddings: Vec<EmbeddingRecord>,
    pub total_tokens: usize,
    pub total_cost_usd: f64,
    pub cache_hits: usize,
    pub api_calls: usize,
    pub failed_items: Vec<(usize, String)>,
}

// ============================================================================
// Content Chunks and Processing
// ============================================================================

/// A content chunk as persisted by the surrounding application.
///
/// The pipeline reads content and citability, and writes back the embedding
/// model after the vector is durably searchable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentChunk {
    /// Unique identifier
    pub id: Uuid,

    /// Owning tenant
    pub tenant_id: String,

    /// Text content
    pub content: String,

    /// Privacy flag: citable content may be quoted to end users,
    /// non-citable content is silent context only
    pub is_citable: bool,

    /// Originating source (upload, crawl, ...)
    pub source_id: Option<String>,

    /// Parent document
    pub document_id: Option<Uuid>,

    /// Model that embedded this chunk, if any
    pub embedding_model: Option<String>,

    /// Whether a searchable vector exists for this chunk
    pub has_embedding: bool,
}

impl ContentChunk {
    /// Create a new unembedded chunk.
    pub fn new(
        tenant_id: impl Into<String>,
        content: impl Into<String>,
        is_citable: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            content: content.into(),
            is_citable,
            source_id: None,
            document_id: None,
            embedding_model: None,
            has_embedding: false,
        }
    }

    /// Set the source identifier.
    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    /// Set the parent document.
    pub fn with_document(mut self, document_id: Uuid) -> Self {
        self.document_id = Some(document_id);
        self
    }
}

/// Aggregate outcome of one `process_chunks` call.
///
/// Per-tenant-group failures are collected in `errors` while counts from
/// groups that succeeded are still reported.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub processed_count: usize,
    pub failed_count: usize,
    pub embeddings_generated: usize,
    pub embeddings_stored: usize,
    pub cost_usd: f64,
    pub errors: Vec<String>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_rejects_empty_and_whitespace() {
        assert!(Namespace::new("").is_err());
        assert!(Namespace::new("   ").is_err());
        assert!(Namespace::new("\t\n").is_err());
        assert!(Namespace::new("chatbot_42").is_ok());
    }

    #[test]
    fn namespace_rejects_control_characters() {
        assert!(Namespace::new("chatbot\x00evil").is_err());
    }

    #[test]
    fn namespace_for_tenant_format() {
        let ns = Namespace::for_tenant("acme-7").unwrap();
        assert_eq!(ns.as_str(), "chatbot_acme-7");
        assert!(Namespace::for_tenant("").is_err());
        assert!(Namespace::for_tenant("  ").is_err());
    }

    #[test]
    fn namespace_serde_roundtrip_validates() {
        let ns: Namespace = serde_json::from_str("\"chatbot_1\"").unwrap();
        assert_eq!(ns.as_str(), "chatbot_1");
        assert!(serde_json::from_str::<Namespace>("\"\"").is_err());
    }

    #[test]
    fn vector_record_builder_and_accessors() {
        let record = VectorRecord::new("chunk-1", vec![0.1, 0.2])
            .with_metadata(META_CONTENT, "hello")
            .with_metadata(META_IS_CITABLE, true)
            .with_metadata(META_CHATBOT_ID, "t1");

        assert_eq!(record.content(), Some("hello"));
        assert!(record.is_citable());
    }

    #[test]
    fn metadata_filter_matches_all_conditions() {
        let filter = MetadataFilter::citable_only().with(META_CHATBOT_ID, "t1");

        let mut metadata = HashMap::new();
        metadata.insert(META_IS_CITABLE.to_string(), serde_json::json!(true));
        metadata.insert(META_CHATBOT_ID.to_string(), serde_json::json!("t1"));
        assert!(filter.matches(&metadata));

        metadata.insert(META_IS_CITABLE.to_string(), serde_json::json!(false));
        assert!(!filter.matches(&metadata));
    }

    #[test]
    fn error_transience() {
        assert!(RagkitError::RateLimited("429".into()).is_transient());
        assert!(RagkitError::Timeout("t/o".into()).is_transient());
        assert!(!RagkitError::Auth("401".into()).is_transient());
        assert!(!RagkitError::Validation("bad".into()).is_transient());
        assert!(!RagkitError::StorageNotInitialized.is_transient());
    }

    #[test]
    fn chunk_builder() {
        let doc = Uuid::new_v4();
        let chunk = ContentChunk::new("t1", "some text", true)
            .with_source("upload-3")
            .with_document(doc);

        assert_eq!(chunk.tenant_id, "t1");
        assert!(chunk.is_citable);
        assert!(!chunk.has_embedding);
        assert_eq!(chunk.document_id, Some(doc));
    }
}
