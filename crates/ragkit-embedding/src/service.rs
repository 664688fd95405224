//! Embedding service
//!
//! Orchestrates text-to-vector generation: deduplicates input, serves what
//! it can from cache, batches the rest into sequential backend calls with
//! bounded retry, gates every call on the daily budget, and merges results
//! back into the caller's input order.

use ragkit_core::{BatchEmbeddingResult, EmbeddingConfig, EmbeddingRecord, RagkitError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{cache_key, CacheStatsReport, EmbeddingCache};
use crate::client::{EmbeddingClient, EmbeddingResponse};
use crate::cost::CostTracker;

/// Rough token estimate for the budget gate (≈ 0.75 words per token).
/// Admission control only; recorded spend uses the backend's exact usage.
fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    ((words as f64 / 0.75).ceil() as usize).max(1)
}

/// Operational summary of the embedding service.
#[derive(Debug, Clone)]
pub struct EmbeddingServiceStats {
    pub cache: CacheStatsReport,
    pub spent_today_usd: f64,
    pub remaining_today_usd: f64,
}

/// Embedding generation with caching, dedup, batching, and cost budgeting.
pub struct EmbeddingService {
    client: Arc<dyn EmbeddingClient>,
    cache: EmbeddingCache,
    cost: Arc<CostTracker>,
    config: EmbeddingConfig,
}

impl EmbeddingService {
    pub fn new(
        client: Arc<dyn EmbeddingClient>,
        cache: EmbeddingCache,
        cost: Arc<CostTracker>,
        config: EmbeddingConfig,
    ) -> Self {
        Self {
            client,
            cache,
            cost,
            config,
        }
    }

    /// Model identifier of the underlying client.
    pub fn model(&self) -> &str {
        self.client.model()
    }

    /// Embedding dimension of the underlying client.
    pub fn dimension(&self) -> usize {
        self.client.dimension()
    }

    /// Embed a single text.
    pub async fn embed(&self, text: &str) -> Result<EmbeddingRecord> {
        let texts = [text.to_string()];
        let mut result = self.embed_batch(&texts).await?;
        result.embeddings.pop().ok_or_else(|| {
            let msg = result
                .failed_items
                .first()
                .map(|(_, e)| e.clone())
                .unwrap_or_else(|| "no embedding returned".to_string());
            RagkitError::Embedding(msg)
        })
    }

    /// Embed a batch of texts.
    ///
    /// Results come back in input order. Per-sub-batch failures are recorded
    /// in `failed_items` without discarding sub-batches that succeeded; if
    /// every sub-batch fails while uncached inputs existed, the whole call
    /// fails (service unreachable rather than content unembeddable).
    ///
    /// Hitting the daily budget cap is whole-call-fatal, even when earlier
    /// sub-batches in the same call succeeded: the call returns
    /// `BudgetExceeded` and no partial result. Work already done is not
    /// lost — it stays in the cache and on the ledger, so a retry after the
    /// cap resets serves those texts for free.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<BatchEmbeddingResult> {
        if texts.is_empty() {
            return Ok(BatchEmbeddingResult::default());
        }
        self.validate_inputs(texts)?;

        // Deduplicate to unique texts, remembering the mapping back to
        // original positions.
        let mut unique_texts: Vec<&str> = Vec::new();
        let mut original_to_unique: Vec<usize> = Vec::with_capacity(texts.len());
        if self.config.dedup_enabled {
            let mut seen: HashMap<&str, usize> = HashMap::new();
            for text in texts {
                let idx = *seen.entry(text.as_str()).or_insert_with(|| {
                    unique_texts.push(text.as_str());
                    unique_texts.len() - 1
                });
                original_to_unique.push(idx);
            }
        } else {
            for text in texts {
                unique_texts.push(text.as_str());
                original_to_unique.push(unique_texts.len() - 1);
            }
        }

        let model = self.client.model().to_string();

        // Cache pass: split uniques into hits and a residual list.
        let mut unique_results: Vec<Option<EmbeddingRecord>> = vec![None; unique_texts.len()];
        let mut unique_errors: Vec<Option<String>> = vec![None; unique_texts.len()];
        let mut uncached: Vec<usize> = Vec::new();
        for (i, text) in unique_texts.iter().enumerate() {
            match self.cache.get(text, &model).await {
                Some(record) => unique_results[i] = Some(record),
                None => uncached.push(i),
            }
        }

        tracing::debug!(
            total = texts.len(),
            unique = unique_texts.len(),
            uncached = uncached.len(),
            "embedding batch prepared"
        );

        let batch_size = self.config.max_batch_size.max(1);
        let total_batches = uncached.len().div_ceil(batch_size);
        let mut api_calls = 0usize;
        let mut total_tokens = 0usize;
        let mut total_cost = 0.0f64;
        let mut succeeded_batches = 0usize;

        // Sub-batches run sequentially with a small delay to respect
        // upstream rate limits.
        for (batch_no, chunk) in uncached.chunks(batch_size).enumerate() {
            let batch_texts: Vec<String> =
                chunk.iter().map(|&i| unique_texts[i].to_string()).collect();

            // Budget gate, checked before the call that would spend.
            let estimated_tokens: usize = batch_texts.iter().map(|t| estimate_tokens(t)).sum();
            let estimated_cost = self.cost.calculate_cost(estimated_tokens);
            if !self.cost.check_budget(estimated_cost) {
                return Err(RagkitError::BudgetExceeded {
                    estimated: estimated_cost,
                    remaining: self.cost.remaining_today(),
                });
            }

            if batch_no > 0 && self.config.inter_batch_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.inter_batch_delay_ms)).await;
            }

            match self.call_with_retry(&batch_texts, &mut api_calls).await {
                Ok(response) => {
                    if response.vectors.len() != batch_texts.len() {
                        let msg = format!(
                            "backend returned {} vectors for {} texts",
                            response.vectors.len(),
                            batch_texts.len()
                        );
                        tracing::warn!(batch = batch_no + 1, "{msg}");
                        for &i in chunk {
                            unique_errors[i] = Some(msg.clone());
                        }
                        continue;
                    }

                    succeeded_batches += 1;
                    let batch_cost = self.cost.calculate_cost(response.tokens_used);
                    self.cost.record(batch_cost);
                    total_cost += batch_cost;
                    total_tokens += response.tokens_used;

                    let per_item_tokens = response.tokens_used / batch_texts.len();
                    for (&i, vector) in chunk.iter().zip(response.vectors) {
                        let record = EmbeddingRecord {
                            text_hash: cache_key(unique_texts[i], &model),
                            model: model.clone(),
                            vector,
                            token_count: per_item_tokens,
                            cached: false,
                            cost_usd: self.cost.calculate_cost(per_item_tokens),
                        };
                        self.cache.put(unique_texts[i], record.clone()).await;
                        unique_results[i] = Some(record);
                    }
                }
                // Retrying an auth failure cannot succeed and continuing
                // would waste quota: abort the whole batch call.
                Err(e @ RagkitError::Auth(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        batch = batch_no + 1,
                        of = total_batches,
                        error = %e,
                        "embedding sub-batch failed"
                    );
                    for &i in chunk {
                        unique_errors[i] = Some(e.to_string());
                    }
                }
            }
        }

        // Zero successes with inputs present means the service was
        // unreachable, not that some content was unembeddable.
        if total_batches > 0 && succeeded_batches == 0 {
            return Err(RagkitError::Embedding(format!(
                "all {total_batches} embedding sub-batches failed"
            )));
        }

        // Merge cached and computed results back into input order. The first
        // occurrence of a computed unique carries its cost; duplicates are
        // dedup savings and reported as cache hits with zero cost.
        let mut result = BatchEmbeddingResult {
            api_calls,
            total_tokens,
            total_cost_usd: total_cost,
            ..Default::default()
        };
        let mut first_served = vec![false; unique_results.len()];
        for (orig_idx, &uniq) in original_to_unique.iter().enumerate() {
            match &unique_results[uniq] {
                Some(record) => {
                    let mut record = record.clone();
                    if !record.cached {
                        if first_served[uniq] {
                            record.cached = true;
                            record.cost_usd = 0.0;
                        } else {
                            first_served[uniq] = true;
                        }
                    }
                    result.embeddings.push(record);
                }
                None => {
                    let msg = unique_errors[uniq]
                        .clone()
                        .unwrap_or_else(|| "embedding unavailable".to_string());
                    result.failed_items.push((orig_idx, msg));
                }
            }
        }
        result.cache_hits = result.embeddings.iter().filter(|r| r.cached).count();

        Ok(result)
    }

    /// Operational summary: cache performance and today's spend.
    pub fn stats(&self) -> EmbeddingServiceStats {
        EmbeddingServiceStats {
            cache: self.cache.stats().report(),
            spent_today_usd: self.cost.spent_today(),
            remaining_today_usd: self.cost.remaining_today(),
        }
    }

    fn validate_inputs(&self, texts: &[String]) -> Result<()> {
        for (i, text) in texts.iter().enumerate() {
            if text.trim().is_empty() {
                return Err(RagkitError::Validation(format!(
                    "text at index {i} is empty"
                )));
            }
            if text.chars().count() > self.config.max_text_chars {
                return Err(RagkitError::Validation(format!(
                    "text at index {i} exceeds {} characters",
                    self.config.max_text_chars
                )));
            }
        }
        Ok(())
    }

    /// Bounded exponential-backoff retry, transient errors only.
    async fn call_with_retry(
        &self,
        texts: &[String],
        api_calls: &mut usize,
    ) -> Result<EmbeddingResponse> {
        let mut attempt = 0u32;
        loop {
            *api_calls += 1;
            match self.client.create_embeddings(texts).await {
                Ok(response) => return Ok(response),
                Err(e @ RagkitError::Auth(_)) => return Err(e),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self
                        .config
                        .retry_base_delay_ms
                        .saturating_mul(1u64 << (attempt - 1).min(16));
                    tracing::warn!(
                        attempt,
                        max = self.config.max_retries,
                        delay_ms = delay,
                        error = %e,
                        "transient embedding failure, backing off"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
