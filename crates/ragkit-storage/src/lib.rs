//! Ragkit Storage - Vector database abstraction
//!
//! Provides a sealed backend interface with two implementations: a remote
//! approximate-nearest-neighbor index (Qdrant) behind a circuit breaker,
//! and a local SQL fallback that performs exact cosine-similarity search.
//! Tenant isolation is enforced through the namespace parameter at the
//! backend level, never through metadata filtering alone.

use async_trait::async_trait;
use ragkit_core::{
    BackendStats, MetadataFilter, Namespace, Result, VectorRecord, VectorSearchResult,
};

pub mod breaker;
pub mod local_store;
pub mod qdrant_store;
pub mod service;
pub mod validate;

pub use breaker::CircuitBreaker;
pub use local_store::LocalVectorStore;
pub use qdrant_store::QdrantStore;
pub use service::{SelectedBackend, VectorStorageService};

/// Trait for vector storage backends.
///
/// Both implementations validate records before any write and scope every
/// operation to the given namespace. Results are ordered by descending
/// cosine similarity, score in [-1, 1].
#[async_trait]
pub trait VectorStoreBackend: Send + Sync {
    /// Insert or fully replace records by id within the namespace.
    async fn upsert(&self, records: &[VectorRecord], namespace: &Namespace) -> Result<()>;

    /// Search for the top-k most similar vectors within the namespace,
    /// optionally narrowed by metadata equality conditions.
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        namespace: &Namespace,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorSearchResult>>;

    /// Delete records by id within the namespace.
    async fn delete(&self, ids: &[String], namespace: &Namespace) -> Result<()>;

    /// Aggregate statistics.
    async fn stats(&self) -> Result<BackendStats>;

    /// Backend name for logging.
    fn name(&self) -> &'static str;
}

/// Cosine similarity: `dot(a,b) / (‖a‖·‖b‖)`.
///
/// Defined as 0.0 when either vector has zero magnitude, avoiding a
/// division by zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_vectors_score_one() {
        let v = vec![0.3, -0.5, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors_score_zero() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_opposite_vectors_score_minus_one() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![-1.0, -2.0, -3.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_magnitude_is_zero() {
        let a = vec![0.0, 0.0, 0.0];
        let b = vec![1.0, 2.0, 3.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert_eq!(cosine_similarity(&b, &a), 0.0);
    }

    #[test]
    fn cosine_stays_in_bounds() {
        let pairs = [
            (vec![0.1, 0.9, -0.4], vec![2.0, -1.0, 0.5]),
            (vec![5.0, 5.0, 5.0], vec![0.001, 0.002, 0.003]),
            (vec![-1.0, 1.0, -1.0], vec![1.0, -1.0, 1.0]),
        ];
        for (a, b) in pairs {
            let score = cosine_similarity(&a, &b);
            assert!((-1.0 - 1e-6..=1.0 + 1e-6).contains(&score));
        }
    }

    proptest::proptest! {
        #[test]
        fn cosine_bounded_for_arbitrary_vectors(
            a in proptest::collection::vec(-100.0f32..100.0, 1..16),
            b in proptest::collection::vec(-100.0f32..100.0, 1..16),
        ) {
            let score = cosine_similarity(&a, &b);
            proptest::prop_assert!(score.is_finite());
            proptest::prop_assert!((-1.0 - 1e-4..=1.0 + 1e-4).contains(&score));
        }
    }
}
