// src/config/search.rs
// Hybrid search engine weights, RRF constant and reranker circuit breaker.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridSearchConfig {
    pub dense_weight: f64,
    pub sparse_weight: f64,
    pub fuzzy_weight: f64,
    pub rrf_k: f64,
    pub sub_search_timeout_seconds: u64,
    pub default_limit: usize,
}

impl HybridSearchConfig {
    pub fn from_env() -> Self {
        Self {
            dense_weight: super::helpers::env_f64("HYBRID_DENSE_WEIGHT", 0.5),
            sparse_weight: super::helpers::env_f64("HYBRID_SPARSE_WEIGHT", 0.3),
            fuzzy_weight: super::helpers::env_f64("HYBRID_FUZZY_WEIGHT", 0.2),
            rrf_k: super::helpers::env_f64("HYBRID_RRF_K", 60.0),
            sub_search_timeout_seconds: super::helpers::env_u64("HYBRID_SUBSEARCH_TIMEOUT", 30),
            default_limit: super::helpers::env_usize("HYBRID_DEFAULT_LIMIT", 20),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let total = self.dense_weight + self.sparse_weight + self.fuzzy_weight;
        if (total - 1.0).abs() > 1e-5 {
            return Err(anyhow::anyhow!(
                "hybrid search weights must sum to 1.0, got {}",
                total
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    pub enabled: bool,
    pub cross_encoder_url: Option<String>,
    pub failure_threshold: u32,
    pub open_duration_seconds: u64,
    pub half_open_max_probes: u32,
    pub half_open_required_successes: u32,
    pub timeout_seconds: u64,
    /// Reranked candidates scoring below this are dropped before truncating
    /// to `top_k`.
    pub score_threshold: f64,
    /// `search_with_reranking` widens the candidate pool to `top_k *
    /// candidate_multiplier` before handing it to the reranker.
    pub candidate_multiplier: usize,
    /// Documents per outbound cross-encoder request; batches run concurrently.
    pub cross_encoder_batch_size: usize,
    /// Throttle on outbound cross-encoder HTTP calls.
    pub cross_encoder_requests_per_minute: u32,
}

impl RerankerConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: super::helpers::env_bool("RERANKER_ENABLED", true),
            cross_encoder_url: std::env::var("RERANKER_CROSS_ENCODER_URL").ok(),
            failure_threshold: super::helpers::env_u32("RERANKER_FAILURE_THRESHOLD", 5),
            open_duration_seconds: super::helpers::env_u64("RERANKER_OPEN_DURATION", 30),
            half_open_max_probes: super::helpers::env_u32("RERANKER_HALF_OPEN_MAX_PROBES", 2),
            half_open_required_successes: super::helpers::env_u32(
                "RERANKER_HALF_OPEN_REQUIRED_SUCCESSES",
                2,
            ),
            timeout_seconds: super::helpers::env_u64("RERANKER_TIMEOUT", 10),
            score_threshold: super::helpers::env_f64("RERANKER_SCORE_THRESHOLD", 0.5),
            candidate_multiplier: super::helpers::env_usize("RERANKER_CANDIDATE_MULTIPLIER", 3),
            cross_encoder_batch_size: super::helpers::env_usize("RERANKER_CROSS_ENCODER_BATCH_SIZE", 10),
            cross_encoder_requests_per_minute: super::helpers::env_u32(
                "RERANKER_CROSS_ENCODER_REQUESTS_PER_MINUTE",
                120,
            ),
        }
    }
}
