// src/orchestrator/parallel.rs
// Fans a set of expanded queries out to the search engine concurrently,
// bounded by a semaphore, then aggregates per-query result lists into one
// deduplicated, ranked list.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::warn;

use crate::config::orchestrator::ParallelSearchConfig;
use crate::orchestrator::expansion::QueryExpander;
use crate::search::{HybridSearchEngine, SearchResult};
use crate::utils::with_timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationPolicy {
    ScoreWeighted,
    Frequency,
    MaxScore,
}

/// Per-chunk diagnostic trail, useful for explaining why a result surfaced.
#[derive(Debug, Clone)]
pub struct AggregatedResult {
    pub result: SearchResult,
    pub contributing_queries: usize,
    pub aggregate_score: f64,
}

/// Outcome of a full expand-then-fan-out-then-aggregate search: the merged
/// ranking plus which query variations actually contributed to it.
#[derive(Debug, Clone)]
pub struct ParallelSearchResult {
    pub results: Vec<AggregatedResult>,
    pub variations_searched: Vec<String>,
    pub policy: AggregationPolicy,
}

pub struct ParallelSearchOrchestrator {
    engine: Arc<HybridSearchEngine>,
    expander: Arc<QueryExpander>,
    config: ParallelSearchConfig,
}

impl ParallelSearchOrchestrator {
    pub fn new(
        engine: Arc<HybridSearchEngine>,
        expander: Arc<QueryExpander>,
        config: ParallelSearchConfig,
    ) -> Self {
        Self {
            engine,
            expander,
            config,
        }
    }

    /// Expand `query` into `variation_count` variations, fan each out to the
    /// search engine, and merge the results under `policy`. Queries shorter
    /// than `min_query_length` skip expansion entirely and search only the
    /// literal query. The original query is always included among the
    /// variations searched, even when expansion also produces it verbatim.
    pub async fn search(
        &self,
        query: &str,
        variation_count: usize,
        policy: AggregationPolicy,
        limit: usize,
    ) -> ParallelSearchResult {
        let variations: Vec<String> = if query.chars().count() < self.config.min_query_length {
            vec![query.to_string()]
        } else {
            let mut texts: Vec<String> = self
                .expander
                .expand(query, variation_count, None)
                .await
                .into_iter()
                .map(|expanded| expanded.text)
                .collect();
            if !texts.iter().any(|t| t == query) {
                texts.insert(0, query.to_string());
            }
            texts
        };

        let per_query_results = self.fan_out(&variations, limit).await;
        let results = self.aggregate(per_query_results, policy, limit);

        ParallelSearchResult {
            results,
            variations_searched: variations,
            policy,
        }
    }

    /// Run `hybrid()` for every query in `queries`, bounded by
    /// `max_concurrency` concurrent in-flight searches and
    /// `per_call_timeout_seconds` per call. A query that errors or times out
    /// contributes nothing and is logged, never fails the batch.
    pub async fn fan_out(&self, queries: &[String], limit: usize) -> Vec<Vec<SearchResult>> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let timeout = Duration::from_secs(self.config.per_call_timeout_seconds);

        let tasks = queries.iter().map(|query| {
            let semaphore = semaphore.clone();
            let engine = self.engine.clone();
            let query = query.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                match with_timeout(timeout, engine.hybrid(&query, limit), "parallel_search_query").await {
                    Ok(results) => results,
                    Err(err) => {
                        warn!(query, error = %err, "fan-out query failed or timed out");
                        Vec::new()
                    }
                }
            }
        });

        futures::future::join_all(tasks).await
    }

    /// Merge per-query result lists into one ranked list, deduplicated by
    /// chunk_id, filtered by `min_similarity`, truncated to `limit`.
    pub fn aggregate(
        &self,
        per_query_results: Vec<Vec<SearchResult>>,
        policy: AggregationPolicy,
        limit: usize,
    ) -> Vec<AggregatedResult> {
        aggregate_results(per_query_results, policy, self.config.min_similarity, limit)
    }
}

/// Pure aggregation logic, factored out of `ParallelSearchOrchestrator` so it
/// can be exercised without a live search engine.
struct Accumulator {
    result: SearchResult,
    contributing_queries: usize,
    weighted_sum: f64,
    weight_sum: f64,
    max_score: f64,
}

/// Weight of the variation at `index` within `per_query_results` (the query's
/// own rank among the variations searched, not a per-result rank within its
/// own list). Variation 0 (the original query, by convention) carries full
/// weight; later variations count for progressively less.
fn variation_weight(index: usize) -> f64 {
    1.0 / (1.0 + 0.5 * index as f64)
}

pub fn aggregate_results(
    per_query_results: Vec<Vec<SearchResult>>,
    policy: AggregationPolicy,
    min_similarity: f32,
    limit: usize,
) -> Vec<AggregatedResult> {
    let total_variations = per_query_results.len().max(1);
    let mut by_chunk: HashMap<String, Accumulator> = HashMap::new();

    for (index, results) in per_query_results.iter().enumerate() {
        let weight = variation_weight(index);
        for result in results {
            by_chunk
                .entry(result.chunk_id.clone())
                .and_modify(|existing| {
                    existing.contributing_queries += 1;
                    existing.weighted_sum += result.score * weight;
                    existing.weight_sum += weight;
                    existing.max_score = existing.max_score.max(result.score);
                })
                .or_insert_with(|| Accumulator {
                    result: result.clone(),
                    contributing_queries: 1,
                    weighted_sum: result.score * weight,
                    weight_sum: weight,
                    max_score: result.score,
                });
        }
    }

    let mut aggregated: Vec<AggregatedResult> = by_chunk
        .into_values()
        .map(|a| {
            let aggregate_score = match policy {
                AggregationPolicy::ScoreWeighted => {
                    if a.weight_sum > 0.0 {
                        a.weighted_sum / a.weight_sum
                    } else {
                        0.0
                    }
                }
                AggregationPolicy::Frequency => a.contributing_queries as f64 / total_variations as f64,
                AggregationPolicy::MaxScore => a.max_score,
            };
            AggregatedResult {
                result: a.result,
                contributing_queries: a.contributing_queries,
                aggregate_score,
            }
        })
        .filter(|a| a.result.score as f32 >= min_similarity)
        .collect();

    aggregated.sort_by(|a, b| {
        b.aggregate_score
            .partial_cmp(&a.aggregate_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.result.chunk_id.cmp(&b.result.chunk_id))
    });
    aggregated.truncate(limit);
    aggregated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchMethod;
    use serde_json::Value;

    fn result(chunk_id: &str, score: f64) -> SearchResult {
        SearchResult {
            chunk_id: chunk_id.to_string(),
            file_id: "f".to_string(),
            content: String::new(),
            score,
            rank: 0,
            method: SearchMethod::Hybrid,
            metadata: Value::Null,
            dense_score: None,
            sparse_score: None,
            fuzzy_score: None,
            rrf_score: None,
        }
    }

    #[test]
    fn aggregate_dedups_chunk_across_queries() {
        let per_query = vec![
            vec![result("a", 0.8), result("b", 0.5)],
            vec![result("a", 0.6)],
        ];
        let aggregated = aggregate_results(per_query, AggregationPolicy::Frequency, 0.0, 10);
        let a = aggregated.iter().find(|r| r.result.chunk_id == "a").unwrap();
        assert_eq!(a.contributing_queries, 2);
    }

    #[test]
    fn aggregate_filters_below_min_similarity() {
        let per_query = vec![vec![result("a", 0.9), result("b", 0.1)]];
        let aggregated = aggregate_results(per_query, AggregationPolicy::MaxScore, 0.5, 10);
        assert_eq!(aggregated.len(), 1);
        assert_eq!(aggregated[0].result.chunk_id, "a");
    }

    #[test]
    fn aggregate_truncates_to_limit() {
        let per_query = vec![vec![result("a", 0.9), result("b", 0.8), result("c", 0.7)]];
        let aggregated = aggregate_results(per_query, AggregationPolicy::MaxScore, 0.0, 2);
        assert_eq!(aggregated.len(), 2);
    }

    #[test]
    fn score_weighted_averages_not_sums_across_variations() {
        let per_query = vec![vec![result("a", 0.9)], vec![result("a", 0.85)]];
        let aggregated = aggregate_results(per_query, AggregationPolicy::ScoreWeighted, 0.0, 10);
        let a = &aggregated[0];
        assert!((a.aggregate_score - 0.880).abs() < 1e-3);
    }

    #[test]
    fn frequency_divides_by_total_variations_searched() {
        let per_query = vec![
            vec![result("a", 0.9)],
            vec![result("a", 0.8)],
            vec![result("b", 0.5)],
        ];
        let aggregated = aggregate_results(per_query, AggregationPolicy::Frequency, 0.0, 10);
        let a = aggregated.iter().find(|r| r.result.chunk_id == "a").unwrap();
        assert!((a.aggregate_score - (2.0 / 3.0)).abs() < 1e-9);
    }
}
