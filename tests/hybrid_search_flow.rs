// tests/hybrid_search_flow.rs
// End-to-end round trip across dense/sparse/fuzzy fusion and the reranker
// fallback chain, without any live Postgres/Redis/LLM infrastructure.

use ragcore::config::search::RerankerConfig;
use ragcore::search::{
    bm25, fuzzy, reciprocal_rank_fusion, Chunk, CrossEncoder, Reranker, RrfWeights, SearchMethod,
    SearchResult,
};
use serde_json::json;

fn chunk(id: &str, content: &str) -> Chunk {
    Chunk {
        chunk_id: id.to_string(),
        file_id: "file-1".to_string(),
        content: content.to_string(),
        embedding: None,
        metadata: json!({}),
    }
}

fn dense_result(chunk_id: &str, score: f64, rank: usize) -> SearchResult {
    SearchResult {
        chunk_id: chunk_id.to_string(),
        file_id: "file-1".to_string(),
        content: "dense hit".to_string(),
        score,
        rank,
        method: SearchMethod::Dense,
        metadata: json!({}),
        dense_score: Some(score),
        sparse_score: None,
        fuzzy_score: None,
        rrf_score: None,
    }
}

struct FakeCrossEncoder {
    scores: Vec<f64>,
}

#[async_trait::async_trait]
impl CrossEncoder for FakeCrossEncoder {
    async fn score(&self, _query: &str, documents: &[String]) -> anyhow::Result<Vec<f64>> {
        assert_eq!(documents.len(), self.scores.len());
        Ok(self.scores.clone())
    }
}

#[test]
fn bm25_and_fuzzy_feed_into_rrf_fusion() {
    let chunks = vec![
        chunk("a", "rust async runtime scheduler"),
        chunk("b", "python garbage collector internals"),
        chunk("c", "rust async scheduler design"),
    ];

    let sparse = bm25::search("rust async scheduler", &chunks, 10);
    let fuzzy_results = fuzzy::search("rust async scheduller", &chunks, 0.2, 10);
    let dense = vec![dense_result("c", 0.92, 0), dense_result("a", 0.80, 1)];

    assert!(!sparse.is_empty());
    assert!(!fuzzy_results.is_empty());

    let fused = reciprocal_rank_fusion(
        &[
            (SearchMethod::Dense, dense),
            (SearchMethod::Sparse, sparse),
            (SearchMethod::Fuzzy, fuzzy_results),
        ],
        RrfWeights {
            dense: 0.5,
            sparse: 0.3,
            fuzzy: 0.2,
        },
        60.0,
    );

    assert!(!fused.is_empty());
    // every fused result was contributed by at least one method
    for window in fused.windows(2) {
        assert!(window[0].rrf_score.unwrap() >= window[1].rrf_score.unwrap());
    }
    // chunk "c" appears in both dense (rank 0) and sparse/fuzzy candidates,
    // so it should outrank a result that only ever showed up once.
    let top = &fused[0];
    assert!(top.rrf_score.unwrap() > 0.0);
}

#[tokio::test]
async fn reranker_uses_cross_encoder_when_breaker_closed() {
    let config = RerankerConfig {
        enabled: true,
        cross_encoder_url: None,
        failure_threshold: 3,
        open_duration_seconds: 30,
        half_open_max_probes: 1,
        half_open_required_successes: 1,
        timeout_seconds: 5,
    };

    let results = vec![
        dense_result("low", 0.1, 0),
        dense_result("high", 0.2, 1),
    ];

    let encoder = Box::new(FakeCrossEncoder {
        scores: vec![0.2, 0.9],
    });
    let reranker = Reranker::new(config, Some(encoder), None);

    let reranked = reranker.rerank("some query", results).await;
    assert_eq!(reranked[0].chunk_id, "high");
    assert_eq!(reranked[1].chunk_id, "low");
    // ranks were recomputed to match the new order
    assert_eq!(reranked[0].rank, 0);
    assert_eq!(reranked[1].rank, 1);
}

#[tokio::test]
async fn reranker_falls_back_to_original_order_without_any_backend() {
    let config = RerankerConfig {
        enabled: true,
        cross_encoder_url: None,
        failure_threshold: 3,
        open_duration_seconds: 30,
        half_open_max_probes: 1,
        half_open_required_successes: 1,
        timeout_seconds: 5,
    };

    let results = vec![dense_result("first", 0.9, 0), dense_result("second", 0.1, 1)];
    let reranker = Reranker::new(config, None, None);

    let untouched = reranker.rerank("some query", results).await;
    assert_eq!(untouched[0].chunk_id, "first");
    assert_eq!(untouched[1].chunk_id, "second");
}
