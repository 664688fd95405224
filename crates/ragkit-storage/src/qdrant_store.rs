//! Qdrant implementation of the vector storage backend
//!
//! Maps tenant namespaces onto an indexed `namespace` payload field with a
//! mandatory filter condition injected into every search and a
//! namespace-derived point id for every write, so no code path can issue an
//! unscoped operation. All calls go through a circuit breaker because the
//! remote index is a single point of failure for the pipeline.
//!
//! Payload keys `namespace` and `record_id` are reserved; records carrying
//! them in metadata are rejected.

use async_trait::async_trait;
use qdrant_client::qdrant::{
    value::Kind, Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter,
    PointId, PointStruct, SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use ragkit_core::{
    BackendStats, MetadataFilter, Namespace, RagkitError, Result, StorageConfig, VectorRecord,
    VectorSearchResult,
};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::breaker::CircuitBreaker;
use crate::validate;
use crate::VectorStoreBackend;

const PAYLOAD_NAMESPACE: &str = "namespace";
const PAYLOAD_RECORD_ID: &str = "record_id";

/// Qdrant vector store implementation
pub struct QdrantStore {
    client: Qdrant,
    collection: String,
    dimension: usize,
    max_metadata_bytes: usize,
    breaker: CircuitBreaker,
}

impl QdrantStore {
    /// Create a new Qdrant connection
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let url = config.qdrant_url.as_ref().ok_or_else(|| {
            RagkitError::Config("qdrant_url is not configured".to_string())
        })?;

        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| RagkitError::Database(format!("Qdrant connection failed: {e}")))?;

        Ok(Self {
            client,
            collection: config.qdrant_collection.clone(),
            dimension: config.vector_dimension,
            max_metadata_bytes: config.max_metadata_bytes,
            breaker: CircuitBreaker::new(
                config.breaker_failure_threshold,
                Duration::from_secs(config.breaker_cooldown_secs),
            ),
        })
    }

    /// Initialize collection (run once on setup)
    pub async fn init_collection(&self) -> Result<()> {
        let collections =
            self.client.list_collections().await.map_err(|e| {
                RagkitError::Database(format!("Failed to list collections: {e}"))
            })?;

        let exists = collections
            .collections
            .iter()
            .any(|c| c.name == self.collection);

        if !exists {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection).vectors_config(
                        VectorParamsBuilder::new(self.dimension as u64, Distance::Cosine),
                    ),
                )
                .await
                .map_err(|e| {
                    RagkitError::Database(format!("Failed to create collection: {e}"))
                })?;
        }

        Ok(())
    }

    /// Deterministic point id derived from (namespace, record id), so the
    /// same record id in different namespaces maps to distinct points.
    fn point_id(namespace: &Namespace, record_id: &str) -> PointId {
        Uuid::new_v5(
            &Uuid::NAMESPACE_OID,
            format!("{}/{record_id}", namespace.as_str()).as_bytes(),
        )
        .to_string()
        .into()
    }

    /// The namespace condition injected into every search and scroll.
    fn namespace_condition(namespace: &Namespace) -> Condition {
        Condition::matches(PAYLOAD_NAMESPACE, namespace.as_str().to_string())
    }

    fn filter_conditions(filter: &MetadataFilter) -> Result<Vec<Condition>> {
        let mut conditions = Vec::with_capacity(filter.equals.len());
        for (key, value) in &filter.equals {
            let condition = match value {
                serde_json::Value::Bool(b) => Condition::matches(key.clone(), *b),
                serde_json::Value::String(s) => Condition::matches(key.clone(), s.clone()),
                serde_json::Value::Number(n) => {
                    let i = n.as_i64().ok_or_else(|| {
                        RagkitError::Validation(format!(
                            "filter value for {key} must be an integer, bool, or string"
                        ))
                    })?;
                    Condition::matches(key.clone(), i)
                }
                _ => {
                    return Err(RagkitError::Validation(format!(
                        "filter value for {key} must be an integer, bool, or string"
                    )))
                }
            };
            conditions.push(condition);
        }
        Ok(conditions)
    }

    fn build_payload(
        record: &VectorRecord,
        namespace: &Namespace,
    ) -> Result<HashMap<String, qdrant_client::qdrant::Value>> {
        for reserved in [PAYLOAD_NAMESPACE, PAYLOAD_RECORD_ID] {
            if record.metadata.contains_key(reserved) {
                return Err(RagkitError::Validation(format!(
                    "metadata key {reserved:?} is reserved"
                )));
            }
        }

        let mut payload: HashMap<String, qdrant_client::qdrant::Value> = record
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone().into()))
            .collect();
        payload.insert(
            PAYLOAD_NAMESPACE.to_string(),
            serde_json::Value::String(namespace.as_str().to_string()).into(),
        );
        payload.insert(
            PAYLOAD_RECORD_ID.to_string(),
            serde_json::Value::String(record.id.clone()).into(),
        );
        Ok(payload)
    }

    fn guard<T>(&self, result: std::result::Result<T, RagkitError>) -> Result<T> {
        match result {
            Ok(v) => {
                self.breaker.record_success();
                Ok(v)
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(e)
            }
        }
    }
}

fn qdrant_value_to_json(value: &qdrant_client::qdrant::Value) -> serde_json::Value {
    match &value.kind {
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(*b),
        Some(Kind::IntegerValue(i)) => serde_json::Value::from(*i),
        Some(Kind::DoubleValue(d)) => {
            serde_json::Number::from_f64(*d).map_or(serde_json::Value::Null, serde_json::Value::Number)
        }
        Some(Kind::StringValue(s)) => serde_json::Value::String(s.clone()),
        Some(Kind::ListValue(list)) => {
            serde_json::Value::Array(list.values.iter().map(qdrant_value_to_json).collect())
        }
        Some(Kind::StructValue(map)) => serde_json::Value::Object(
            map.fields
                .iter()
                .map(|(k, v)| (k.clone(), qdrant_value_to_json(v)))
                .collect(),
        ),
        Some(Kind::NullValue(_)) | None => serde_json::Value::Null,
    }
}

#[async_trait]
impl VectorStoreBackend for QdrantStore {
    async fn upsert(&self, records: &[VectorRecord], namespace: &Namespace) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut points = Vec::with_capacity(records.len());
        for record in records {
            validate::validate_record(record, self.dimension, self.max_metadata_bytes)?;
            let payload = Self::build_payload(record, namespace)?;
            points.push(PointStruct::new(
                Self::point_id(namespace, &record.id),
                record.embedding.clone(),
                payload,
            ));
        }

        self.breaker.check()?;
        let result = self
            .client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points))
            .await
            .map(|_| ())
            .map_err(|e| RagkitError::Database(format!("Failed to upsert vectors: {e}")));
        self.guard(result)
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        namespace: &Namespace,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorSearchResult>> {
        validate::validate_vector(query, self.dimension)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut conditions = vec![Self::namespace_condition(namespace)];
        if let Some(filter) = filter {
            conditions.extend(Self::filter_conditions(filter)?);
        }

        self.breaker.check()?;
        let result = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection, query.to_vec(), top_k as u64)
                    .filter(Filter::must(conditions))
                    .with_payload(true),
            )
            .await
            .map_err(|e| RagkitError::Search(format!("Vector search failed: {e}")));
        let response = self.guard(result)?;

        let results = response
            .result
            .into_iter()
            .map(|point| {
                let mut metadata: HashMap<String, serde_json::Value> = point
                    .payload
                    .iter()
                    .map(|(k, v)| (k.clone(), qdrant_value_to_json(v)))
                    .collect();
                metadata.remove(PAYLOAD_NAMESPACE);
                let id = metadata
                    .remove(PAYLOAD_RECORD_ID)
                    .and_then(|v| v.as_str().map(|s| s.to_string()))
                    .unwrap_or_default();

                VectorSearchResult {
                    id,
                    score: point.score,
                    metadata,
                }
            })
            .collect();

        Ok(results)
    }

    async fn delete(&self, ids: &[String], namespace: &Namespace) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        for id in ids {
            validate::validate_id(id)?;
        }

        // Filter-based delete: the namespace condition is part of the
        // filter, so an id list can never touch another namespace.
        let filter = Filter::must([
            Self::namespace_condition(namespace),
            Condition::matches(PAYLOAD_RECORD_ID, ids.to_vec()),
        ]);

        self.breaker.check()?;
        let result = self
            .client
            .delete_points(DeletePointsBuilder::new(&self.collection).points(filter))
            .await
            .map(|_| ())
            .map_err(|e| RagkitError::Database(format!("Failed to delete vectors: {e}")));
        self.guard(result)
    }

    async fn stats(&self) -> Result<BackendStats> {
        self.breaker.check()?;
        let result = self
            .client
            .collection_info(&self.collection)
            .await
            .map_err(|e| RagkitError::Database(format!("Failed to get collection info: {e}")));
        let info = self.guard(result)?;

        Ok(BackendStats {
            total_vectors: info
                .result
                .and_then(|r| r.points_count)
                .unwrap_or_default(),
            // Not reported by the remote index; namespaces live in payload.
            namespace_count: 0,
            backend_name: self.name().to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "qdrant"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn namespace(s: &str) -> Namespace {
        Namespace::new(s).unwrap()
    }

    #[test]
    fn point_ids_differ_across_namespaces() {
        let a = QdrantStore::point_id(&namespace("chatbot_a"), "chunk-1");
        let b = QdrantStore::point_id(&namespace("chatbot_b"), "chunk-1");
        assert_ne!(format!("{a:?}"), format!("{b:?}"));

        // Deterministic for the same inputs
        let a2 = QdrantStore::point_id(&namespace("chatbot_a"), "chunk-1");
        assert_eq!(format!("{a:?}"), format!("{a2:?}"));
    }

    #[tokio::test]
    async fn zero_top_k_returns_empty_without_calling_out() {
        // Unreachable endpoint; the channel is lazy so construction works
        // and any actual call would fail.
        let store = QdrantStore::new(&StorageConfig {
            qdrant_url: Some("http://127.0.0.1:1".to_string()),
            vector_dimension: 3,
            ..StorageConfig::default()
        })
        .unwrap();

        let results = store
            .search(&[1.0, 0.0, 0.0], 0, &namespace("chatbot_a"), None)
            .await
            .unwrap();
        assert!(results.is_empty());
        assert!(!store.breaker.is_open());
    }

    #[test]
    fn reserved_metadata_keys_rejected() {
        let record = VectorRecord::new("r1", vec![1.0]).with_metadata("namespace", "evil");
        let err = QdrantStore::build_payload(&record, &namespace("chatbot_a")).unwrap_err();
        assert!(matches!(err, RagkitError::Validation(_)));
    }

    #[test]
    fn filter_conditions_reject_complex_values() {
        let filter = MetadataFilter::new().with("tags", serde_json::json!(["a", "b"]));
        assert!(QdrantStore::filter_conditions(&filter).is_err());

        let filter = MetadataFilter::citable_only().with("source_id", "upload-1");
        assert_eq!(QdrantStore::filter_conditions(&filter).unwrap().len(), 2);
    }

    #[test]
    fn qdrant_value_json_roundtrip() {
        let original = serde_json::json!({
            "content": "hello",
            "is_citable": true,
            "count": 3,
        });
        let qdrant: qdrant_client::qdrant::Value = original.clone().into();
        assert_eq!(qdrant_value_to_json(&qdrant), original);
    }
}
