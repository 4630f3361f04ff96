// src/metrics/mod.rs
// Prometheus metrics for the retrieval and caching core.

use axum::{http::StatusCode, response::IntoResponse};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::info;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics exporter
pub fn init_metrics() {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    PROMETHEUS_HANDLE
        .set(handle)
        .expect("Prometheus handle already initialized");

    info!("Prometheus metrics initialized");
}

/// GET /metrics - Prometheus metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Metrics not initialized".to_string(),
        ),
    }
}

pub fn record_request(request_type: &str) {
    counter!("ragcore_requests_total", "type" => request_type.to_string()).increment(1);
}

pub fn record_request_duration(request_type: &str, duration_seconds: f64) {
    histogram!("ragcore_request_duration_seconds", "type" => request_type.to_string())
        .record(duration_seconds);
}

/// Record an L1/L2 cache lookup outcome
pub fn record_cache_level_result(level: &'static str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("ragcore_cache_total", "level" => level, "result" => result).increment(1);
}

/// Record a semantic cache tier classification
pub fn record_semantic_cache_tier(tier: &'static str) {
    counter!("ragcore_semantic_cache_total", "tier" => tier).increment(1);
}

/// Record one RRF fusion invocation across N retrieval methods
pub fn record_rrf_fusion(methods: usize) {
    counter!("ragcore_rrf_fusions_total").increment(1);
    histogram!("ragcore_rrf_fusion_methods").record(methods as f64);
}

/// Record a reranker circuit-breaker state transition
pub fn record_circuit_breaker_transition(from: &'static str, to: &'static str) {
    counter!("ragcore_circuit_breaker_transitions_total", "from" => from, "to" => to)
        .increment(1);
}

/// Record a completed context-compaction cycle
pub fn record_compaction(duration_seconds: f64, tokens_before: i64, tokens_after: i64) {
    counter!("ragcore_compactions_total").increment(1);
    histogram!("ragcore_compaction_duration_seconds").record(duration_seconds);
    gauge!("ragcore_compaction_tokens_saved").set((tokens_before - tokens_after) as f64);
}

pub fn record_checkpoint_created() {
    counter!("ragcore_checkpoints_total", "action" => "created").increment(1);
}

pub fn record_checkpoint_restored() {
    counter!("ragcore_checkpoints_total", "action" => "restored").increment(1);
}

pub fn record_search_method(method: &'static str, latency_seconds: f64) {
    counter!("ragcore_search_method_total", "method" => method).increment(1);
    histogram!("ragcore_search_method_duration_seconds", "method" => method)
        .record(latency_seconds);
}

/// Helper for timing request handlers; records duration on drop
pub struct RequestTimer {
    start: Instant,
    request_type: String,
}

impl RequestTimer {
    pub fn new(request_type: &str) -> Self {
        record_request(request_type);
        Self {
            start: Instant::now(),
            request_type: request_type.to_string(),
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_request_duration(&self.request_type, duration);
    }
}
