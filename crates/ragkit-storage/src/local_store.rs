//! Local SQL fallback for the vector store
//!
//! Used when the remote ANN index is unreachable or not configured. Two
//! modes behind one type:
//!
//! - Postgres: native pgvector ordering (`embedding <=> query`), metadata
//!   filters pushed down via JSONB containment. Scales with the index.
//! - SQLite: full namespace scan with in-process cosine ranking. Correct but
//!   O(rows); a warning fires once a namespace crosses `max_scan_rows`.

use async_trait::async_trait;
use ragkit_core::{
    BackendStats, MetadataFilter, Namespace, RagkitError, Result, StorageConfig, VectorRecord,
    VectorSearchResult,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{PgPool, SqlitePool};
use std::collections::HashMap;
use tracing::warn;

use crate::validate;
use crate::{cosine_similarity, VectorStoreBackend};

enum LocalPool {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

/// SQL-backed vector store, the fallback behind the remote ANN index
pub struct LocalVectorStore {
    pool: LocalPool,
    dimension: usize,
    max_metadata_bytes: usize,
    max_scan_rows: u64,
}

impl LocalVectorStore {
    /// Connect to the configured database and create the schema if needed
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let url = &config.local_database_url;

        let pool = if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await
                .map_err(|e| RagkitError::Database(format!("Postgres connection failed: {e}")))?;
            LocalPool::Postgres(pool)
        } else if url.starts_with("sqlite:") {
            // One connection keeps an in-memory database alive across calls.
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect(url)
                .await
                .map_err(|e| RagkitError::Database(format!("SQLite connection failed: {e}")))?;
            LocalPool::Sqlite(pool)
        } else {
            return Err(RagkitError::Config(format!(
                "unsupported local database url: {url}"
            )));
        };

        let store = Self {
            pool,
            dimension: config.vector_dimension,
            max_metadata_bytes: config.max_metadata_bytes,
            max_scan_rows: config.max_scan_rows,
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        match &self.pool {
            LocalPool::Postgres(pool) => {
                sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
                    .execute(pool)
                    .await
                    .map_err(|e| {
                        RagkitError::Database(format!("Failed to enable pgvector: {e}"))
                    })?;
                sqlx::query(&format!(
                    "CREATE TABLE IF NOT EXISTS vector_records (
                        namespace TEXT NOT NULL,
                        id TEXT NOT NULL,
                        embedding vector({}) NOT NULL,
                        metadata JSONB NOT NULL,
                        PRIMARY KEY (namespace, id)
                    )",
                    self.dimension
                ))
                .execute(pool)
                .await
                .map_err(|e| RagkitError::Database(format!("Failed to create table: {e}")))?;
                sqlx::query(
                    "CREATE INDEX IF NOT EXISTS idx_vector_records_namespace
                     ON vector_records (namespace)",
                )
                .execute(pool)
                .await
                .map_err(|e| RagkitError::Database(format!("Failed to create index: {e}")))?;
            }
            LocalPool::Sqlite(pool) => {
                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS vector_records (
                        namespace TEXT NOT NULL,
                        id TEXT NOT NULL,
                        embedding TEXT NOT NULL,
                        metadata TEXT NOT NULL,
                        PRIMARY KEY (namespace, id)
                    )",
                )
                .execute(pool)
                .await
                .map_err(|e| RagkitError::Database(format!("Failed to create table: {e}")))?;
                sqlx::query(
                    "CREATE INDEX IF NOT EXISTS idx_vector_records_namespace
                     ON vector_records (namespace)",
                )
                .execute(pool)
                .await
                .map_err(|e| RagkitError::Database(format!("Failed to create index: {e}")))?;
            }
        }
        Ok(())
    }

    /// pgvector input literal, e.g. `[0.1,0.2,0.3]`
    fn pg_vector_literal(embedding: &[f32]) -> String {
        let mut out = String::with_capacity(embedding.len() * 10 + 2);
        out.push('[');
        for (i, v) in embedding.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&v.to_string());
        }
        out.push(']');
        out
    }

    fn filter_json(filter: Option<&MetadataFilter>) -> Option<String> {
        let filter = filter?;
        if filter.equals.is_empty() {
            return None;
        }
        let object: serde_json::Map<String, serde_json::Value> = filter
            .equals
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Some(serde_json::Value::Object(object).to_string())
    }

    fn decode_metadata(raw: &str) -> Result<HashMap<String, serde_json::Value>> {
        serde_json::from_str(raw)
            .map_err(|e| RagkitError::Database(format!("Corrupt metadata row: {e}")))
    }
}

#[async_trait]
impl VectorStoreBackend for LocalVectorStore {
    async fn upsert(&self, records: &[VectorRecord], namespace: &Namespace) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        for record in records {
            validate::validate_record(record, self.dimension, self.max_metadata_bytes)?;
        }

        match &self.pool {
            LocalPool::Postgres(pool) => {
                let mut tx = pool.begin().await.map_err(|e| {
                    RagkitError::Database(format!("Failed to begin transaction: {e}"))
                })?;
                for record in records {
                    let metadata = serde_json::to_string(&record.metadata)
                        .map_err(|e| RagkitError::Database(format!("Bad metadata: {e}")))?;
                    sqlx::query(
                        "INSERT INTO vector_records (namespace, id, embedding, metadata)
                         VALUES ($1, $2, $3::vector, $4::jsonb)
                         ON CONFLICT (namespace, id) DO UPDATE
                         SET embedding = EXCLUDED.embedding, metadata = EXCLUDED.metadata",
                    )
                    .bind(namespace.as_str())
                    .bind(&record.id)
                    .bind(Self::pg_vector_literal(&record.embedding))
                    .bind(metadata)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| RagkitError::Database(format!("Failed to upsert: {e}")))?;
                }
                tx.commit().await.map_err(|e| {
                    RagkitError::Database(format!("Failed to commit upsert: {e}"))
                })?;
            }
            LocalPool::Sqlite(pool) => {
                let mut tx = pool.begin().await.map_err(|e| {
                    RagkitError::Database(format!("Failed to begin transaction: {e}"))
                })?;
                for record in records {
                    let embedding = serde_json::to_string(&record.embedding)
                        .map_err(|e| RagkitError::Database(format!("Bad embedding: {e}")))?;
                    let metadata = serde_json::to_string(&record.metadata)
                        .map_err(|e| RagkitError::Database(format!("Bad metadata: {e}")))?;
                    sqlx::query(
                        "INSERT INTO vector_records (namespace, id, embedding, metadata)
                         VALUES (?, ?, ?, ?)
                         ON CONFLICT (namespace, id) DO UPDATE
                         SET embedding = excluded.embedding, metadata = excluded.metadata",
                    )
                    .bind(namespace.as_str())
                    .bind(&record.id)
                    .bind(embedding)
                    .bind(metadata)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| RagkitError::Database(format!("Failed to upsert: {e}")))?;
                }
                tx.commit().await.map_err(|e| {
                    RagkitError::Database(format!("Failed to commit upsert: {e}"))
                })?;
            }
        }
        Ok(())
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

        match &self.pool {
            LocalPool::Postgres(pool) => {
                let rows: Vec<(String, String, f64)> = sqlx::query_as(
                    "SELECT id, metadata::text, 1 - (embedding <=> $2::vector) AS score
                     FROM vector_records
                     WHERE namespace = $1
                       AND ($3::jsonb IS NULL OR metadata @> $3::jsonb)
                     ORDER BY embedding <=> $2::vector
                     LIMIT $4",
                )
                .bind(namespace.as_str())
                .bind(Self::pg_vector_literal(query))
                .bind(Self::filter_json(filter))
                .bind(top_k as i64)
                .fetch_all(pool)
                .await
                .map_err(|e| RagkitError::Search(format!("Vector search failed: {e}")))?;

                rows.into_iter()
                    .map(|(id, metadata, score)| {
                        Ok(VectorSearchResult {
                            id,
                            score: score as f32,
                            metadata: Self::decode_metadata(&metadata)?,
                        })
                    })
                    .collect()
            }
            LocalPool::Sqlite(pool) => {
                let rows: Vec<(String, String, String)> = sqlx::query_as(
                    "SELECT id, embedding, metadata FROM vector_records WHERE namespace = ?",
                )
                .bind(namespace.as_str())
                .fetch_all(pool)
                .await
                .map_err(|e| RagkitError::Search(format!("Vector search failed: {e}")))?;

                if rows.len() as u64 > self.max_scan_rows {
                    warn!(
                        namespace = namespace.as_str(),
                        rows = rows.len(),
                        "scanning search over large namespace; consider the remote backend"
                    );
                }

                let mut results = Vec::new();
                for (id, embedding, metadata) in rows {
                    let metadata = Self::decode_metadata(&metadata)?;
                    if let Some(filter) = filter {
                        if !filter.matches(&metadata) {
                            continue;
                        }
                    }
                    let embedding: Vec<f32> = serde_json::from_str(&embedding)
                        .map_err(|e| RagkitError::Database(format!("Corrupt embedding: {e}")))?;
                    results.push(VectorSearchResult {
                        id,
                        score: cosine_similarity(query, &embedding),
                        metadata,
                    });
                }

                results.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.id.cmp(&b.id))
                });
                results.truncate(top_k);
                Ok(results)
            }
        }
    }

    async fn delete(&self, ids: &[String], namespace: &Namespace) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        for id in ids {
            validate::validate_id(id)?;
        }

        match &self.pool {
            LocalPool::Postgres(pool) => {
                sqlx::query("DELETE FROM vector_records WHERE namespace = $1 AND id = ANY($2)")
                    .bind(namespace.as_str())
                    .bind(ids)
                    .execute(pool)
                    .await
                    .map_err(|e| RagkitError::Database(format!("Failed to delete: {e}")))?;
            }
            LocalPool::Sqlite(pool) => {
                let placeholders = vec!["?"; ids.len()].join(", ");
                let sql = format!(
                    "DELETE FROM vector_records WHERE namespace = ? AND id IN ({placeholders})"
                );
                let mut query = sqlx::query(&sql).bind(namespace.as_str());
                for id in ids {
                    query = query.bind(id);
                }
                query
                    .execute(pool)
                    .await
                    .map_err(|e| RagkitError::Database(format!("Failed to delete: {e}")))?;
            }
        }
        Ok(())
    }

    async fn stats(&self) -> Result<BackendStats> {
        let (total, namespaces): (i64, i64) = match &self.pool {
            LocalPool::Postgres(pool) => sqlx::query_as(
                "SELECT COUNT(*), COUNT(DISTINCT namespace) FROM vector_records",
            )
            .fetch_one(pool)
            .await
            .map_err(|e| RagkitError::Database(format!("Failed to get stats: {e}")))?,
            LocalPool::Sqlite(pool) => sqlx::query_as(
                "SELECT COUNT(*), COUNT(DISTINCT namespace) FROM vector_records",
            )
            .fetch_one(pool)
            .await
            .map_err(|e| RagkitError::Database(format!("Failed to get stats: {e}")))?,
        };

        Ok(BackendStats {
            total_vectors: total as u64,
            namespace_count: namespaces as u64,
            backend_name: self.name().to_string(),
        })
    }

    fn name(&self) -> &'static str {
        match &self.pool {
            LocalPool::Postgres(_) => "postgres",
            LocalPool::Sqlite(_) => "sqlite",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragkit_core::META_IS_CITABLE;

    fn test_config() -> StorageConfig {
        StorageConfig {
            vector_dimension: 3,
            ..StorageConfig::default()
        }
    }

    async fn store() -> LocalVectorStore {
        LocalVectorStore::connect(&test_config()).await.unwrap()
    }

    fn ns(s: &str) -> Namespace {
        Namespace::new(s).unwrap()
    }

    fn record(id: &str, embedding: Vec<f32>, citable: bool) -> VectorRecord {
        VectorRecord::new(id, embedding)
            .with_metadata("content", format!("content for {id}"))
            .with_metadata(META_IS_CITABLE, citable)
    }

    #[tokio::test]
    async fn search_ranks_by_cosine_similarity() {
        let store = store().await;
        let namespace = ns("chatbot_t1");
        store
            .upsert(
                &[
                    record("far", vec![0.0, 1.0, 0.0], true),
                    record("near", vec![1.0, 0.0, 0.0], true),
                    record("close", vec![0.9, 0.1, 0.0], true),
                ],
                &namespace,
            )
            .await
            .unwrap();

        let results = store
            .search(&[1.0, 0.0, 0.0], 2, &namespace, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "near");
        assert_eq!(results[1].id, "close");
        assert!(results[0].score > results[1].score);
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let store = store().await;
        let tenant_a = ns("chatbot_a");
        let tenant_b = ns("chatbot_b");
        store
            .upsert(&[record("only-a", vec![1.0, 0.0, 0.0], true)], &tenant_a)
            .await
            .unwrap();

        let results = store
            .search(&[1.0, 0.0, 0.0], 10, &tenant_b, None)
            .await
            .unwrap();
        assert!(results.is_empty());

        // Deleting through the wrong namespace leaves the record intact
        store
            .delete(&["only-a".to_string()], &tenant_b)
            .await
            .unwrap();
        let results = store
            .search(&[1.0, 0.0, 0.0], 10, &tenant_a, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn metadata_filter_excludes_non_matching() {
        let store = store().await;
        let namespace = ns("chatbot_t1");
        store
            .upsert(
                &[
                    record("public", vec![1.0, 0.0, 0.0], true),
                    record("private", vec![1.0, 0.0, 0.0], false),
                ],
                &namespace,
            )
            .await
            .unwrap();

        let filter = MetadataFilter::citable_only();
        let results = store
            .search(&[1.0, 0.0, 0.0], 10, &namespace, Some(&filter))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "public");
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_record() {
        let store = store().await;
        let namespace = ns("chatbot_t1");
        store
            .upsert(&[record("r1", vec![1.0, 0.0, 0.0], true)], &namespace)
            .await
            .unwrap();
        store
            .upsert(&[record("r1", vec![0.0, 1.0, 0.0], false)], &namespace)
            .await
            .unwrap();

        let results = store
            .search(&[0.0, 1.0, 0.0], 10, &namespace, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert_eq!(results[0].metadata[META_IS_CITABLE], false);
    }

    #[tokio::test]
    async fn delete_removes_records() {
        let store = store().await;
        let namespace = ns("chatbot_t1");
        store
            .upsert(
                &[
                    record("keep", vec![1.0, 0.0, 0.0], true),
                    record("drop", vec![0.0, 1.0, 0.0], true),
                ],
                &namespace,
            )
            .await
            .unwrap();

        store.delete(&["drop".to_string()], &namespace).await.unwrap();

        let results = store
            .search(&[0.0, 1.0, 0.0], 10, &namespace, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "keep");
    }

    #[tokio::test]
    async fn stats_count_rows_and_namespaces() {
        let store = store().await;
        store
            .upsert(&[record("a", vec![1.0, 0.0, 0.0], true)], &ns("chatbot_a"))
            .await
            .unwrap();
        store
            .upsert(&[record("b", vec![1.0, 0.0, 0.0], true)], &ns("chatbot_b"))
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_vectors, 2);
        assert_eq!(stats.namespace_count, 2);
        assert_eq!(stats.backend_name, "sqlite");
    }

    #[tokio::test]
    async fn rejects_wrong_dimension_and_non_finite() {
        let store = store().await;
        let namespace = ns("chatbot_t1");

        let err = store
            .upsert(&[record("bad", vec![1.0, 0.0], true)], &namespace)
            .await
            .unwrap_err();
        assert!(matches!(err, RagkitError::Validation(_)));

        let err = store
            .upsert(&[record("nan", vec![1.0, f32::NAN, 0.0], true)], &namespace)
            .await
            .unwrap_err();
        assert!(matches!(err, RagkitError::Validation(_)));

        let err = store
            .search(&[1.0, 0.0], 5, &namespace, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RagkitError::Validation(_)));
    }
}
