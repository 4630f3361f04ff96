// tests/compaction_support_flow.rs
// Round trip across the pieces of the compaction pipeline that don't
// require a live Postgres/Redis connection: token accounting, checkpoint
// auto-tagging, and parallel-search result aggregation.

use chrono::Utc;
use ragcore::compactor::checkpoint::{detect_auto_tag, AutoTag};
use ragcore::compactor::{count_message_tokens, usage_percent, usage_status, ContextMessage, UsageStatus};
use ragcore::orchestrator::{aggregate_results, AggregationPolicy};
use ragcore::search::{SearchMethod, SearchResult};
use serde_json::json;

fn message(role: &str, content: &str) -> ContextMessage {
    ContextMessage {
        id: uuid::Uuid::new_v4().to_string(),
        role: role.to_string(),
        content: content.to_string(),
        token_count: count_message_tokens(role, content) as i64,
        is_protected: false,
        position: 0,
        created_at: Utc::now(),
    }
}

#[test]
fn token_accounting_feeds_usage_status_boundaries() {
    let messages = vec![
        message("user", "what is the plan for tomorrow's release?"),
        message("assistant", "we ship the retrieval core at noon"),
    ];
    let total: i64 = messages.iter().map(|m| m.token_count).sum();
    assert!(total > 0);

    let max_tokens = total as usize;
    let percent = usage_percent(total as usize, max_tokens);
    assert_eq!(usage_status(percent, 70.0, 85.0), UsageStatus::Critical);

    let roomy_percent = usage_percent(total as usize, max_tokens * 10);
    assert_eq!(usage_status(roomy_percent, 70.0, 85.0), UsageStatus::Normal);
}

#[test]
fn checkpoint_auto_tag_prioritizes_error_over_decision() {
    let messages = vec![
        message("assistant", "we decided to go with the tiered cache approach"),
        message("user", "traceback: panicked at index out of bounds"),
    ];
    assert_eq!(detect_auto_tag(&messages), Some(AutoTag::ErrorResolution));
}

#[test]
fn checkpoint_auto_tag_detects_code_fence() {
    let messages = vec![message("assistant", "here's the fix:\n```rust\nfn main() {}\n```")];
    assert_eq!(detect_auto_tag(&messages), Some(AutoTag::Code));
}

fn dense_hit(chunk_id: &str, score: f64, rank: usize) -> SearchResult {
    SearchResult {
        chunk_id: chunk_id.to_string(),
        file_id: "f".to_string(),
        content: "content".to_string(),
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

#[test]
fn parallel_aggregation_dedups_across_expanded_queries() {
    let per_query = vec![
        vec![dense_hit("shared", 0.8, 0), dense_hit("only_in_q1", 0.5, 1)],
        vec![dense_hit("shared", 0.6, 0), dense_hit("only_in_q2", 0.4, 1)],
    ];

    let aggregated = aggregate_results(per_query, AggregationPolicy::Frequency, 0.0, 10);

    let shared = aggregated.iter().find(|a| a.result.chunk_id == "shared").unwrap();
    assert_eq!(shared.contributing_queries, 2);

    let only_one = aggregated.iter().find(|a| a.result.chunk_id == "only_in_q1").unwrap();
    assert_eq!(only_one.contributing_queries, 1);

    // deduped: exactly three distinct chunks survive, not four
    assert_eq!(aggregated.len(), 3);
}
