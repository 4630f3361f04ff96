// src/cache/semantic.rs
//
//! Semantic cache: classify a query against previously-cached queries by
//! cosine similarity of their embeddings rather than exact key match.
//! EXACT/HIGH matches are served directly; MEDIUM is recorded but never
//! served; LOW/MISS always fall through to a fresh search.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::cache::l1::L1Cache;
use crate::cache::l2::L2Cache;
use crate::cache::types::{
    embedding_cache_key, exact_search_cache_key, semantic_search_cache_key, CacheKey,
};
use crate::config::cache::SemanticCacheConfig;

/// Semantic-key payload: the cached value co-located with the embedding it
/// was cached under, so a similarity scan never needs a second round trip
/// to fetch the candidate's payload.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct SemanticCacheRecord<T> {
    query: String,
    embedding: Vec<f32>,
    value: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMatchTier {
    Exact,
    High,
    Medium,
    Low,
    Miss,
}

impl CacheMatchTier {
    pub fn is_usable(&self) -> bool {
        matches!(self, CacheMatchTier::Exact | CacheMatchTier::High)
    }

    pub fn needs_fresh_search(&self) -> bool {
        !self.is_usable()
    }
}

pub struct SemanticCacheResult<T> {
    pub tier: CacheMatchTier,
    pub similarity: f32,
    pub data: Option<T>,
}

/// Running counters backing the `total_requests = exact + high + medium + misses`
/// invariant.
#[derive(Default)]
pub struct SemanticCacheMetrics {
    pub total_requests: AtomicU64,
    pub exact_hits: AtomicU64,
    pub high_hits: AtomicU64,
    pub medium_hits: AtomicU64,
    pub misses: AtomicU64,
    pub embedding_cache_hits: AtomicU64,
    pub embedding_cache_misses: AtomicU64,
}

impl SemanticCacheMetrics {
    pub fn record(&self, tier: CacheMatchTier) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        match tier {
            CacheMatchTier::Exact => self.exact_hits.fetch_add(1, Ordering::Relaxed),
            CacheMatchTier::High => self.high_hits.fetch_add(1, Ordering::Relaxed),
            CacheMatchTier::Medium => self.medium_hits.fetch_add(1, Ordering::Relaxed),
            CacheMatchTier::Low | CacheMatchTier::Miss => self.misses.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let usable = self.exact_hits.load(Ordering::Relaxed) + self.high_hits.load(Ordering::Relaxed);
        usable as f64 / total as f64
    }
}

pub struct SemanticCache {
    l1: L1Cache,
    l2: L2Cache,
    config: SemanticCacheConfig,
    metrics: SemanticCacheMetrics,
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl SemanticCache {
    pub fn new(l1: L1Cache, l2: L2Cache, config: SemanticCacheConfig) -> Self {
        Self {
            l1,
            l2,
            config,
            metrics: SemanticCacheMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &SemanticCacheMetrics {
        &self.metrics
    }

    fn classify(&self, similarity: f32) -> CacheMatchTier {
        if similarity >= self.config.exact_threshold {
            CacheMatchTier::Exact
        } else if similarity >= self.config.high_threshold {
            CacheMatchTier::High
        } else if similarity >= self.config.medium_threshold {
            CacheMatchTier::Medium
        } else {
            CacheMatchTier::Low
        }
    }

    /// Exact-hash lookup first (fast path), then a semantic scan over the
    /// `search:sem:*` namespace by cosine similarity against `query_embedding`.
    /// A MEDIUM-tier match is classified and counted but its payload is never
    /// returned; only EXACT/HIGH matches come back usable.
    pub async fn lookup<T: DeserializeOwned + Serialize>(
        &self,
        query: &str,
        query_embedding: &[f32],
    ) -> SemanticCacheResult<T> {
        let exact_key = match exact_search_cache_key(query, &Value::Null) {
            Ok(k) => k,
            Err(_) => {
                self.metrics.record(CacheMatchTier::Miss);
                return SemanticCacheResult {
                    tier: CacheMatchTier::Miss,
                    similarity: 0.0,
                    data: None,
                };
            }
        };

        if let Some(data) = self.l2.get::<T>(&exact_key).await {
            debug!("semantic cache exact hit for query");
            self.metrics.record(CacheMatchTier::Exact);
            return SemanticCacheResult {
                tier: CacheMatchTier::Exact,
                similarity: 1.0,
                data: Some(data),
            };
        }

        let candidate_keys = self.l1.scan("search:sem:*", self.config.max_candidates).await;

        let mut best: Option<(f32, SemanticCacheRecord<T>)> = None;
        for candidate_key in &candidate_keys {
            let Some(record) = self.l1.get::<SemanticCacheRecord<T>>(&CacheKey(candidate_key.clone())).await else {
                continue;
            };
            let sim = cosine_similarity(query_embedding, &record.embedding);
            if best.as_ref().map(|(b, _)| sim > *b).unwrap_or(true) {
                best = Some((sim, record));
            }
        }

        let Some((similarity, record)) = best else {
            self.metrics.record(CacheMatchTier::Miss);
            return SemanticCacheResult {
                tier: CacheMatchTier::Miss,
                similarity: 0.0,
                data: None,
            };
        };

        let tier = self.classify(similarity);
        self.metrics.record(tier);

        if !tier.is_usable() {
            return SemanticCacheResult {
                tier,
                similarity,
                data: None,
            };
        }

        if self.config.promote_high_to_exact && tier == CacheMatchTier::High {
            self.l2
                .set(&exact_key, &record.value, self.config.search_result_ttl_seconds)
                .await;
        }

        SemanticCacheResult {
            tier,
            similarity,
            data: Some(record.value),
        }
    }

    /// Write `value` under both the exact-hash key and the embedding's
    /// semantic key, so a later near-duplicate query can still find it via
    /// similarity scan. Gated by `semantic_threshold`, the same threshold the
    /// tiered cache's `cache_if_relevant` enforces, so a low-confidence result
    /// never seeds either index.
    pub async fn store<T: Serialize + Clone>(
        &self,
        query: &str,
        query_embedding: &[f32],
        value: &T,
        max_score: f32,
    ) {
        if max_score < self.config.semantic_threshold {
            debug!(max_score, "skipping semantic cache write, result below threshold");
            return;
        }

        if let Ok(key) = exact_search_cache_key(query, &Value::Null) {
            self.l2
                .set(&key, value, self.config.search_result_ttl_seconds)
                .await;
        }

        if let Ok(key) = semantic_search_cache_key(query_embedding) {
            let record = SemanticCacheRecord {
                query: query.to_string(),
                embedding: query_embedding.to_vec(),
                value: value.clone(),
            };
            self.l1
                .set(&key, &record, self.config.search_result_ttl_seconds)
                .await;
        }
    }

    pub async fn get_cached_embedding(&self, text: &str) -> Option<Vec<f32>> {
        let key = embedding_cache_key(text).ok()?;
        let result = self.l2.get::<Vec<f32>>(&key).await;
        if result.is_some() {
            self.metrics.embedding_cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.embedding_cache_misses.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    pub async fn store_embedding(&self, text: &str, embedding: &[f32]) {
        if let Ok(key) = embedding_cache_key(text) {
            self.l2
                .set(&key, &embedding.to_vec(), self.config.embedding_ttl_seconds)
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_identical_vectors() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal_vectors() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_zero_norm_guarded() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn tier_classification_boundaries() {
        let config = SemanticCacheConfig {
            exact_threshold: 0.98,
            high_threshold: 0.93,
            medium_threshold: 0.88,
            search_result_ttl_seconds: 300,
            embedding_ttl_seconds: 3600,
            max_candidates: 100,
            enable_metrics: true,
            cache_medium_similarity: false,
            promote_high_to_exact: true,
            semantic_threshold: 0.85,
        };
        // classify() needs an instance; construct one with a dummy pool-free L2
        // is not possible without a pool, so just check threshold ordering logic
        // directly here instead of through the struct.
        assert!(config.medium_threshold < config.high_threshold);
        assert!(config.high_threshold < config.exact_threshold);
    }
}
