// src/search/bm25.rs
// BM25 sparse-term scoring, used as the full-text leg of hybrid search and
// as the standalone sparse/fallback method when a dense index is down.

use std::collections::HashMap;

use crate::search::types::{Chunk, SearchMethod, SearchResult};

pub const BM25_K1: f64 = 1.5;
pub const BM25_B: f64 = 0.75;
pub const BM25_AVG_DOC_LEN: f64 = 500.0;

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn term_frequencies(tokens: &[String]) -> HashMap<&str, usize> {
    let mut freqs: HashMap<&str, usize> = HashMap::new();
    for token in tokens {
        *freqs.entry(token.as_str()).or_insert(0) += 1;
    }
    freqs
}

/// Score a single document against a query using the simplified BM25 this
/// fallback path uses: term-frequency saturation and length normalization
/// only, no IDF or collection-wide statistics. Normalized by query length so
/// scores are comparable across queries of different lengths.
fn bm25_score(query_terms: &[String], doc_tokens: &[String]) -> f64 {
    if doc_tokens.is_empty() || query_terms.is_empty() {
        return 0.0;
    }

    let doc_len = doc_tokens.len() as f64;
    let term_freqs = term_frequencies(doc_tokens);

    let score: f64 = query_terms
        .iter()
        .map(|term| {
            let tf = term_freqs.get(term.as_str()).copied().unwrap_or(0) as f64;
            if tf == 0.0 {
                return 0.0;
            }
            let numerator = tf * (BM25_K1 + 1.0);
            let denominator = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * (doc_len / BM25_AVG_DOC_LEN));
            numerator / denominator
        })
        .sum();

    score / query_terms.len() as f64
}

/// Rank `chunks` against `query` with the simplified BM25 fallback (no IDF,
/// no collection-wide document frequency).
pub fn search(query: &str, chunks: &[Chunk], limit: usize) -> Vec<SearchResult> {
    let query_terms = tokenize(query);
    if query_terms.is_empty() || chunks.is_empty() {
        return Vec::new();
    }

    let tokenized: Vec<Vec<String>> = chunks.iter().map(|c| tokenize(&c.content)).collect();

    let mut scored: Vec<SearchResult> = chunks
        .iter()
        .zip(tokenized.iter())
        .map(|(chunk, tokens)| {
            let score = bm25_score(&query_terms, tokens);
            SearchResult {
                chunk_id: chunk.chunk_id.clone(),
                file_id: chunk.file_id.clone(),
                content: chunk.content.clone(),
                score,
                rank: 0,
                method: SearchMethod::Sparse,
                metadata: chunk.metadata.clone(),
                dense_score: None,
                sparse_score: Some(score),
                fuzzy_score: None,
                rrf_score: None,
            }
        })
        .filter(|r| r.score > 0.0)
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    scored.truncate(limit);
    SearchResult::assign_ranks(&mut scored);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn chunk(id: &str, content: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            file_id: "f1".to_string(),
            content: content.to_string(),
            embedding: None,
            metadata: Value::Null,
        }
    }

    #[test]
    fn ranks_exact_term_match_above_unrelated_document() {
        let chunks = vec![
            chunk("a", "the quick brown fox jumps over the lazy dog"),
            chunk("b", "completely unrelated text about gardening"),
        ];
        let results = search("quick fox", &chunks, 10);
        assert_eq!(results[0].chunk_id, "a");
        assert!(results.len() <= 2);
    }

    #[test]
    fn empty_query_returns_no_results() {
        let chunks = vec![chunk("a", "some content")];
        assert!(search("", &chunks, 10).is_empty());
    }

    #[test]
    fn results_are_capped_at_limit() {
        let chunks: Vec<Chunk> = (0..5).map(|i| chunk(&format!("c{i}"), "shared keyword term")).collect();
        let results = search("shared keyword", &chunks, 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[1].rank, 2);
    }
}
