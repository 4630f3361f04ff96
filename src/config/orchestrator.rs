// src/config/orchestrator.rs
// Query expansion and parallel fan-out search configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionConfig {
    pub default_variations: usize,
    pub cache_capacity: usize,
}

impl ExpansionConfig {
    pub fn from_env() -> Self {
        Self {
            default_variations: super::helpers::env_usize("EXPANSION_DEFAULT_VARIATIONS", 5),
            cache_capacity: super::helpers::env_usize("EXPANSION_CACHE_CAPACITY", 512),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelSearchConfig {
    pub max_concurrency: usize,
    pub per_call_timeout_seconds: u64,
    pub min_similarity: f32,
    /// Queries shorter than this (in chars) skip expansion entirely and
    /// fan out as a single, unexpanded query.
    pub min_query_length: usize,
}

impl ParallelSearchConfig {
    pub fn from_env() -> Self {
        Self {
            max_concurrency: super::helpers::env_usize("PARALLEL_SEARCH_MAX_CONCURRENCY", 10),
            per_call_timeout_seconds: super::helpers::env_u64("PARALLEL_SEARCH_TIMEOUT", 30),
            min_similarity: super::helpers::env_f64("PARALLEL_SEARCH_MIN_SIMILARITY", 0.0) as f32,
            min_query_length: super::helpers::env_usize("PARALLEL_SEARCH_MIN_QUERY_LENGTH", 3),
        }
    }
}
