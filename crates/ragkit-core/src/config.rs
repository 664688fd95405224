//! Ragkit Configuration Management
//!
//! Handles configuration from environment variables and TOML config files
//! with sensible defaults for development.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Embedding backend configuration
    pub embedding: EmbeddingConfig,

    /// Vector storage configuration
    pub storage: StorageConfig,

    /// Cache configuration
    pub cache: CacheConfig,

    /// Daily spend budget
    pub budget: BudgetConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Embedding backend
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.embedding.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            config.embedding.base_url = url;
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Ok(size) = std::env::var("EMBEDDING_MAX_BATCH_SIZE") {
            config.embedding.max_batch_size =
                size.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "EMBEDDING_MAX_BATCH_SIZE".to_string(),
                    value: size,
                })?;
        }

        // Vector storage
        if let Ok(url) = std::env::var("QDRANT_URL") {
            config.storage.qdrant_url = Some(url);
        }
        if let Ok(collection) = std::env::var("QDRANT_COLLECTION") {
            config.storage.qdrant_collection = collection;
        }
        if let Ok(url) = std::env::var("LOCAL_DATABASE_URL") {
            config.storage.local_database_url = url;
        }
        if let Ok(dim) = std::env::var("VECTOR_DIMENSION") {
            config.storage.vector_dimension =
                dim.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "VECTOR_DIMENSION".to_string(),
                    value: dim,
                })?;
        }

        // Budget
        if let Ok(cap) = std::env::var("DAILY_BUDGET_USD") {
            config.budget.daily_cap_usd = cap.parse().map_err(|_| ConfigError::InvalidValue {
                key: "DAILY_BUDGET_USD".to_string(),
                value: cap,
            })?;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.logging.level = level;
        }

        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        let env_config = Self::from_env()?;

        // Always use env for sensitive values
        if env_config.embedding.api_key.is_some() {
            self.embedding.api_key = env_config.embedding.api_key;
        }
        if env_config.storage.qdrant_url.is_some() {
            self.storage.qdrant_url = env_config.storage.qdrant_url;
        }

        Ok(self)
    }
}

/// Embedding backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// OpenAI API key
    pub api_key: Option<String>,

    /// API base URL (for Azure or compatible APIs)
    pub base_url: String,

    /// Embedding model name
    pub model: String,

    /// Maximum texts per API call
    pub max_batch_size: usize,

    /// Maximum input length in characters; longer texts fail fast
    pub max_text_chars: usize,

    /// Delay between sequential sub-batch calls, in milliseconds
    pub inter_batch_delay_ms: u64,

    /// Retry attempts for transient upstream failures
    pub max_retries: u32,

    /// Base delay for exponential backoff, in milliseconds
    pub retry_base_delay_ms: u64,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Collapse identical input texts to one embedding call
    pub dedup_enabled: bool,

    /// Price per 1,000 tokens in USD
    pub price_per_1k_tokens: f64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            max_batch_size: 100,
            max_text_chars: 32_000,
            inter_batch_delay_ms: 200,
            max_retries: 3,
            retry_base_delay_ms: 500,
            request_timeout_secs: 30,
            dedup_enabled: true,
            price_per_1k_tokens: 0.00002, // text-embedding-3-small
        }
    }
}

/// Vector storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Qdrant gRPC URL; when unset, the local fallback is used directly
    pub qdrant_url: Option<String>,

    /// Qdrant collection name
    pub qdrant_collection: String,

    /// Connection URL for the local fallback store
    /// (postgres://... enables native pgvector ordering, sqlite:... scans)
    pub local_database_url: String,

    /// Vector dimension (must match embedding model)
    pub vector_dimension: usize,

    /// Records per upsert call to the backend
    pub upsert_batch_size: usize,

    /// Serialized metadata size cap in bytes
    pub max_metadata_bytes: usize,

    /// Namespace row count above which the scanning fallback logs a warning
    pub max_scan_rows: u64,

    /// Consecutive failures before the remote-backend breaker opens
    pub breaker_failure_threshold: u32,

    /// Breaker cooldown before a half-open probe, in seconds
    pub breaker_cooldown_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            qdrant_url: None,
            qdrant_collection: "ragkit_chunks".to_string(),
            local_database_url: "sqlite::memory:".to_string(),
            vector_dimension: 1536, // OpenAI text-embedding-3-small
            upsert_batch_size: 100,
            max_metadata_bytes: 40 * 1024,
            max_scan_rows: 50_000,
            breaker_failure_threshold: 5,
            breaker_cooldown_secs: 30,
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries in the embedding cache
    pub embedding_max_capacity: u64,

    /// Time-to-live for embedding cache entries, in seconds
    pub embedding_ttl_secs: u64,

    /// Maximum number of entries in the search-result cache
    pub search_max_capacity: u64,

    /// Time-to-live for search-result cache entries, in seconds
    pub search_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            // 10k embeddings @ ~6KB each = ~60MB
            embedding_max_capacity: 10_000,
            // Embeddings are stable for a given text+model, cache for a week
            embedding_ttl_secs: 7 * 24 * 3600,
            search_max_capacity: 1_000,
            // Search results change as content is ingested, keep them short
            search_ttl_secs: 60,
        }
    }
}

/// Daily spend budget
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Maximum embedding spend per UTC day in USD
    pub daily_cap_usd: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self { daily_cap_usd: 10.0 }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
