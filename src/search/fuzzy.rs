// src/search/fuzzy.rs
// Fuzzy match fallback, used when neither the dense index nor BM25 can serve
// a query (e.g. very short queries, typo-heavy input). Pre-filters by a
// case-insensitive substring match, then ranks survivors by a tokenized
// edit-distance ratio so word order doesn't sink an otherwise-close match.

use crate::search::types::{Chunk, SearchMethod, SearchResult};

/// Sort a string's whitespace-separated tokens so comparisons are
/// insensitive to word order, matching what a token-sort ratio scores.
fn token_sorted(text: &str) -> String {
    let mut tokens: Vec<&str> = text.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

fn token_sort_ratio(a: &str, b: &str) -> f64 {
    let a = token_sorted(&a.to_lowercase());
    let b = token_sorted(&b.to_lowercase());
    strsim::normalized_levenshtein(&a, &b)
}

/// Rank `chunks` against `query`: first keep only chunks whose content
/// contains `query` as a case-insensitive substring, then score survivors by
/// token-sort ratio and drop anything below `min_similarity`.
pub fn search(query: &str, chunks: &[Chunk], min_similarity: f64, limit: usize) -> Vec<SearchResult> {
    if query.trim().is_empty() {
        return Vec::new();
    }
    let query_lower = query.to_lowercase();

    let mut scored: Vec<SearchResult> = chunks
        .iter()
        .filter(|chunk| chunk.content.to_lowercase().contains(&query_lower))
        .filter_map(|chunk| {
            let score = token_sort_ratio(query, &chunk.content);
            if score < min_similarity {
                return None;
            }
            Some(SearchResult {
                chunk_id: chunk.chunk_id.clone(),
                file_id: chunk.file_id.clone(),
                content: chunk.content.clone(),
                score,
                rank: 0,
                method: SearchMethod::Fuzzy,
                metadata: chunk.metadata.clone(),
                dense_score: None,
                sparse_score: None,
                fuzzy_score: Some(score),
                rrf_score: None,
            })
        })
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
    fn substring_match_with_reordered_words_scores_highly() {
        let chunks = vec![chunk("a", "brown fox the quick one")];
        let results = search("quick", &chunks, 0.1, 10);
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn content_without_the_substring_is_excluded() {
        let chunks = vec![chunk("a", "completely different subject matter entirely")];
        let results = search("quick brown fox", &chunks, 0.0, 10);
        assert!(results.is_empty());
    }

    #[test]
    fn word_order_does_not_change_the_score() {
        let chunks = vec![
            chunk("a", "the quick brown fox jumps"),
            chunk("b", "fox brown quick the jumps"),
        ];
        let results = search("jumps", &chunks, 0.0, 10);
        assert_eq!(results.len(), 2);
        assert!((results[0].score - results[1].score).abs() < 1e-9);
    }

    #[test]
    fn empty_query_returns_no_results() {
        let chunks = vec![chunk("a", "content")];
        assert!(search("", &chunks, 0.0, 10).is_empty());
    }
}
