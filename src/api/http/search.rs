// src/api/http/search.rs
// Retrieval API: POST /search and POST /expand.

use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::cache::types::query_cache_key;
use crate::cache::CacheLookupResult;
use crate::error::{RagCoreError, RagResult};
use crate::orchestrator::{AggregationPolicy, ExpansionStrategy};
use crate::search::{SearchMethod, SearchResult};
use crate::state::AppState;

fn default_top_k() -> usize {
    20
}

fn default_method() -> String {
    "hybrid_rpc".to_string()
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_method")]
    pub method: String,
    pub namespace: Option<String>,
    pub metadata_filter: Option<serde_json::Value>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub rerank: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub total_results: usize,
    pub page: usize,
    pub page_size: usize,
    pub filters_applied: serde_json::Value,
}

/// POST /search. Checks the tiered exact-key cache, then the semantic cache
/// (by embedding similarity), before falling through to a live search; both
/// caches are written back afterwards, gated on the result set's max score.
pub async fn search(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> RagResult<Json<SearchResponse>> {
    if request.query.trim().is_empty() {
        return Err(RagCoreError::InvalidInput("query must not be empty".to_string()));
    }

    let cache_params = serde_json::json!({
        "method": request.method,
        "top_k": request.top_k,
        "rerank": request.rerank,
    });
    let tiered_key = query_cache_key(&request.query, &cache_params)
        .map_err(|e| RagCoreError::Fatal(e.to_string()))?;

    let tiered_hit: CacheLookupResult<SearchResponse> = state.tiered_cache.get(&tiered_key).await;
    if let Some(cached) = tiered_hit.value {
        return Ok(Json(cached));
    }

    let query_embedding = state.embeddings.embed(&request.query).await.ok();

    if let Some(embedding) = &query_embedding {
        let semantic = state
            .semantic_cache
            .lookup::<SearchResponse>(&request.query, embedding)
            .await;
        if semantic.tier.is_usable() {
            if let Some(cached) = semantic.data {
                return Ok(Json(cached));
            }
        }
    }

    let results = if request.rerank {
        let method = SearchMethod::from_str(&request.method).ok_or_else(|| {
            RagCoreError::InvalidInput(format!("unknown search method: {}", request.method))
        })?;
        state
            .search_engine
            .search_with_reranking(&request.query, method, request.top_k)
            .await
            .map(|(results, _metrics)| results)
            .map_err(|e| RagCoreError::Unavailable(e.to_string()))?
    } else {
        match request.method.as_str() {
            "dense" => state.search_engine.dense(&request.query, request.top_k).await,
            "sparse" => state.search_engine.sparse(&request.query, request.top_k).await,
            "fuzzy" => state.search_engine.fuzzy(&request.query, request.top_k).await,
            "ilike" => state.search_engine.ilike(&request.query, request.top_k).await,
            "hybrid" => state.search_engine.hybrid(&request.query, request.top_k).await,
            "hybrid_rpc" => state.search_engine.hybrid_rpc(&request.query, request.top_k).await,
            other => {
                return Err(RagCoreError::InvalidInput(format!("unknown search method: {other}")));
            }
        }
        .map_err(|e| RagCoreError::Unavailable(e.to_string()))?
    };

    let max_score = results.iter().map(|r| r.score).fold(0.0_f64, f64::max);
    let total_results = results.len();
    let response = SearchResponse {
        results,
        total_results,
        page: 1,
        page_size: request.top_k,
        filters_applied: request.metadata_filter.clone().unwrap_or(serde_json::Value::Null),
    };

    state
        .tiered_cache
        .cache_if_relevant(&tiered_key, &response, max_score as f32)
        .await;
    if let Some(embedding) = &query_embedding {
        state
            .semantic_cache
            .store(&request.query, embedding, &response, max_score as f32)
            .await;
    }

    Ok(Json(response))
}

fn default_expansion_count() -> usize {
    5
}

#[derive(Debug, Deserialize)]
pub struct ExpandRequest {
    pub query: String,
    #[serde(default = "default_expansion_count")]
    pub n: usize,
    pub strategy: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExpandResponse {
    pub original: String,
    pub variations: Vec<String>,
    pub tokens_used: i64,
    pub duration_ms: u128,
}

/// POST /expand
pub async fn expand(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExpandRequest>,
) -> RagResult<Json<ExpandResponse>> {
    if request.query.trim().is_empty() {
        return Err(RagCoreError::InvalidInput("query must not be empty".to_string()));
    }

    let strategy = match &request.strategy {
        Some(s) => Some(ExpansionStrategy::from_str(s).ok_or_else(|| {
            RagCoreError::InvalidInput(format!("unknown expansion strategy: {s}"))
        })?),
        None => None,
    };

    let started = Instant::now();
    let expanded = state.expander.expand(&request.query, request.n, strategy).await;
    let variations = expanded.into_iter().map(|e| e.text).collect();

    Ok(Json(ExpandResponse {
        original: request.query,
        variations,
        tokens_used: 0,
        duration_ms: started.elapsed().as_millis(),
    }))
}

fn default_policy() -> String {
    "score_weighted".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ParallelSearchRequest {
    pub query: String,
    #[serde(default = "default_expansion_count")]
    pub variation_count: usize,
    #[serde(default = "default_policy")]
    pub policy: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Serialize)]
pub struct ParallelSearchResponse {
    pub results: Vec<SearchResult>,
    pub total_results: usize,
    pub variations_searched: Vec<String>,
}

/// POST /search/parallel — expand `query` into variations, fan each out to
/// the hybrid engine, and aggregate under `policy`.
pub async fn parallel_search(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ParallelSearchRequest>,
) -> RagResult<Json<ParallelSearchResponse>> {
    if request.query.trim().is_empty() {
        return Err(RagCoreError::InvalidInput("query must not be empty".to_string()));
    }

    let policy = match request.policy.as_str() {
        "score_weighted" => AggregationPolicy::ScoreWeighted,
        "frequency" => AggregationPolicy::Frequency,
        "max_score" => AggregationPolicy::MaxScore,
        other => {
            return Err(RagCoreError::InvalidInput(format!("unknown aggregation policy: {other}")));
        }
    };

    let outcome = state
        .orchestrator
        .search(&request.query, request.variation_count, policy, request.top_k)
        .await;

    let mut results: Vec<SearchResult> = outcome
        .results
        .into_iter()
        .map(|aggregated| {
            let mut result = aggregated.result;
            result.score = aggregated.aggregate_score;
            result.method = SearchMethod::ParallelAggregated;
            result
        })
        .collect();
    SearchResult::assign_ranks(&mut results);
    let total_results = results.len();

    Ok(Json(ParallelSearchResponse {
        results,
        total_results,
        variations_searched: outcome.variations_searched,
    }))
}
