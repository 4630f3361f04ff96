// src/config/cache.rs
// L1 (Redis), L2 (Postgres), tiered and semantic cache configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TieredCacheConfig {
    pub l1_enabled: bool,
    pub l2_enabled: bool,
    pub l1_ttl_seconds: u64,
    pub l2_ttl_seconds: u64,
    pub promote_to_l1: bool,
    pub semantic_threshold: f32,
}

impl TieredCacheConfig {
    pub fn from_env() -> Self {
        Self {
            l1_enabled: super::helpers::env_bool("CACHE_L1_ENABLED", true),
            l2_enabled: super::helpers::env_bool("CACHE_L2_ENABLED", true),
            l1_ttl_seconds: super::helpers::env_u64("CACHE_L1_TTL", 300),
            l2_ttl_seconds: super::helpers::env_u64("CACHE_L2_TTL", 3600),
            promote_to_l1: super::helpers::env_bool("CACHE_PROMOTE_TO_L1", true),
            semantic_threshold: super::helpers::env_f64("CACHE_SEMANTIC_THRESHOLD", 0.85) as f32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticCacheConfig {
    pub exact_threshold: f32,
    pub high_threshold: f32,
    pub medium_threshold: f32,
    pub search_result_ttl_seconds: u64,
    pub embedding_ttl_seconds: u64,
    pub max_candidates: usize,
    pub enable_metrics: bool,
    /// Whether a MEDIUM-tier match is still persisted as a new cache entry
    /// even though it is never served back to the caller.
    pub cache_medium_similarity: bool,
    pub promote_high_to_exact: bool,
    /// Minimum `max_score` a result needs before `SemanticCache::store`
    /// writes it at all — the same gate `TieredCacheConfig::semantic_threshold`
    /// applies to plain tiered-cache writes.
    pub semantic_threshold: f32,
}

impl SemanticCacheConfig {
    pub fn from_env() -> Self {
        Self {
            exact_threshold: super::helpers::env_f64("SEMANTIC_CACHE_EXACT_THRESHOLD", 0.98) as f32,
            high_threshold: super::helpers::env_f64("SEMANTIC_CACHE_HIGH_THRESHOLD", 0.93) as f32,
            medium_threshold: super::helpers::env_f64("SEMANTIC_CACHE_MEDIUM_THRESHOLD", 0.88) as f32,
            search_result_ttl_seconds: super::helpers::env_u64("SEMANTIC_CACHE_RESULT_TTL", 300),
            embedding_ttl_seconds: super::helpers::env_u64("SEMANTIC_CACHE_EMBEDDING_TTL", 3600),
            max_candidates: super::helpers::env_usize("SEMANTIC_CACHE_MAX_CANDIDATES", 100),
            enable_metrics: super::helpers::env_bool("SEMANTIC_CACHE_ENABLE_METRICS", true),
            cache_medium_similarity: super::helpers::env_bool(
                "SEMANTIC_CACHE_MEDIUM_SIMILARITY",
                false,
            ),
            promote_high_to_exact: super::helpers::env_bool(
                "SEMANTIC_CACHE_PROMOTE_HIGH_TO_EXACT",
                true,
            ),
            semantic_threshold: super::helpers::env_f64("CACHE_SEMANTIC_THRESHOLD", 0.85) as f32,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.medium_threshold)
            || !(0.0..=1.0).contains(&self.high_threshold)
            || !(0.0..=1.0).contains(&self.exact_threshold)
        {
            return Err(anyhow::anyhow!("semantic cache thresholds must be in [0, 1]"));
        }
        if !(self.medium_threshold <= self.high_threshold && self.high_threshold <= self.exact_threshold) {
            return Err(anyhow::anyhow!(
                "semantic cache thresholds must satisfy medium <= high <= exact"
            ));
        }
        Ok(())
    }
}
