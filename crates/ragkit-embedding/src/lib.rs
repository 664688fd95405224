//! Ragkit Embedding - Text-to-vector generation
//!
//! Turns text into embedding vectors with:
//! - content+model addressed caching (avoid redundant API calls)
//! - exact-string deduplication within a batch
//! - sequential sub-batching with bounded retry on transient failures
//! - a daily USD budget gate checked before every backend call

pub mod cache;
pub mod client;
pub mod cost;
pub mod service;

pub use cache::{cache_key, CacheStatsReport, EmbeddingCache};
pub use client::{create_embedding_client, EmbeddingClient, EmbeddingResponse, OpenAiEmbedding};
pub use cost::CostTracker;
pub use service::{EmbeddingService, EmbeddingServiceStats};
