// src/search/types.rs
// Shared data model for the hybrid search engine.

use serde::{Deserialize, Serialize};

/// A retrievable unit of text, as stored in the vector/full-text index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub file_id: String,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    Dense,
    Sparse,
    Fuzzy,
    Ilike,
    Hybrid,
    HybridRpc,
    ParallelAggregated,
}

impl SearchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMethod::Dense => "dense",
            SearchMethod::Sparse => "sparse",
            SearchMethod::Fuzzy => "fuzzy",
            SearchMethod::Ilike => "ilike",
            SearchMethod::Hybrid => "hybrid",
            SearchMethod::HybridRpc => "hybrid_rpc",
            SearchMethod::ParallelAggregated => "parallel_aggregated",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "dense" => Some(SearchMethod::Dense),
            "sparse" => Some(SearchMethod::Sparse),
            "fuzzy" => Some(SearchMethod::Fuzzy),
            "ilike" => Some(SearchMethod::Ilike),
            "hybrid" => Some(SearchMethod::Hybrid),
            "hybrid_rpc" => Some(SearchMethod::HybridRpc),
            "parallel_aggregated" => Some(SearchMethod::ParallelAggregated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub file_id: String,
    pub content: String,
    pub score: f64,
    pub rank: usize,
    pub method: SearchMethod,
    pub metadata: serde_json::Value,
    pub dense_score: Option<f64>,
    pub sparse_score: Option<f64>,
    pub fuzzy_score: Option<f64>,
    pub rrf_score: Option<f64>,
}

impl SearchResult {
    /// Assign contiguous 1..N ranks matching the order of `results`, the
    /// invariant every stage of the pipeline must preserve.
    pub fn assign_ranks(results: &mut [SearchResult]) {
        for (i, r) in results.iter_mut().enumerate() {
            r.rank = i + 1;
        }
    }
}

/// Per-method timing/count counters, returned alongside results when the
/// caller asks for metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchMetrics {
    pub queries_total: u64,
    pub avg_latency_ms: f64,
    pub method_counts: std::collections::HashMap<String, u64>,
}

/// Computes NDCG@k from a relevance-judged ranking. `relevances[i]` is the
/// graded relevance of the result at rank `i` (0-indexed, already sorted by
/// the engine's own score).
pub fn ndcg_at_k(relevances: &[f64], k: usize) -> f64 {
    let k = k.min(relevances.len());
    if k == 0 {
        return 0.0;
    }

    let dcg: f64 = relevances[..k]
        .iter()
        .enumerate()
        .map(|(i, rel)| (2f64.powf(*rel) - 1.0) / (i as f64 + 2.0).log2())
        .sum();

    let mut ideal = relevances[..k].to_vec();
    ideal.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    let idcg: f64 = ideal
        .iter()
        .enumerate()
        .map(|(i, rel)| (2f64.powf(*rel) - 1.0) / (i as f64 + 2.0).log2())
        .sum();

    if idcg == 0.0 {
        0.0
    } else {
        dcg / idcg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ndcg_perfect_ranking_is_one() {
        let relevances = vec![3.0, 2.0, 1.0, 0.0];
        assert!((ndcg_at_k(&relevances, 4) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn ndcg_worse_ranking_is_less_than_one() {
        let relevances = vec![0.0, 1.0, 2.0, 3.0];
        assert!(ndcg_at_k(&relevances, 4) < 1.0);
    }

    #[test]
    fn search_method_from_str_round_trips() {
        for method in [
            SearchMethod::Dense,
            SearchMethod::Sparse,
            SearchMethod::Fuzzy,
            SearchMethod::Ilike,
            SearchMethod::Hybrid,
            SearchMethod::HybridRpc,
            SearchMethod::ParallelAggregated,
        ] {
            assert_eq!(SearchMethod::from_str(method.as_str()), Some(method));
        }
        assert_eq!(SearchMethod::from_str("bogus"), None);
    }

    #[test]
    fn assign_ranks_is_contiguous() {
        let mut results = vec![
            SearchResult {
                chunk_id: "b".into(),
                file_id: "f".into(),
                content: String::new(),
                score: 0.5,
                rank: 99,
                method: SearchMethod::Dense,
                metadata: serde_json::Value::Null,
                dense_score: None,
                sparse_score: None,
                fuzzy_score: None,
                rrf_score: None,
            },
            SearchResult {
                chunk_id: "a".into(),
                file_id: "f".into(),
                content: String::new(),
                score: 0.9,
                rank: 3,
                method: SearchMethod::Dense,
                metadata: serde_json::Value::Null,
                dense_score: None,
                sparse_score: None,
                fuzzy_score: None,
                rrf_score: None,
            },
        ];
        SearchResult::assign_ranks(&mut results);
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[1].rank, 2);
    }
}
