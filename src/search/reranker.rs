// src/search/reranker.rs
// Cross-encoder reranking with a circuit breaker over the cross-encoder
// service, falling back to an LLM-scored JSON-array reorder, and finally
// to leaving the RRF order untouched if both are unavailable.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::search::RerankerConfig;
use crate::llm::LlmProvider;
use crate::metrics::record_circuit_breaker_transition;
use crate::search::types::SearchResult;
use crate::utils::{with_timeout, RateLimiter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    fn as_str(self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Closed -> Open after `failure_threshold` consecutive failures.
/// Open -> HalfOpen after `open_duration_seconds` has elapsed.
/// HalfOpen -> Closed after `half_open_required_successes` consecutive probe
/// successes; any probe failure sends it straight back to Open.
/// At most `half_open_max_probes` requests are let through while HalfOpen.
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    consecutive_failures: AtomicU32,
    half_open_successes: AtomicU32,
    half_open_inflight: AtomicU32,
    opened_at_epoch_secs: AtomicU64,
    failure_threshold: u32,
    open_duration_seconds: u64,
    half_open_max_probes: u32,
    half_open_required_successes: u32,
}

impl CircuitBreaker {
    pub fn new(config: &RerankerConfig) -> Self {
        Self {
            state: Mutex::new(BreakerState::Closed),
            consecutive_failures: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
            half_open_inflight: AtomicU32::new(0),
            opened_at_epoch_secs: AtomicU64::new(0),
            failure_threshold: config.failure_threshold,
            open_duration_seconds: config.open_duration_seconds,
            half_open_max_probes: config.half_open_max_probes,
            half_open_required_successes: config.half_open_required_successes,
        }
    }

    fn now_epoch_secs() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Returns true if a call should be attempted right now, transitioning
    /// Open -> HalfOpen if the cooldown has elapsed.
    pub fn allow_request(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match *state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let opened_at = self.opened_at_epoch_secs.load(Ordering::SeqCst);
                if Self::now_epoch_secs().saturating_sub(opened_at) >= self.open_duration_seconds {
                    *state = BreakerState::HalfOpen;
                    self.half_open_successes.store(0, Ordering::SeqCst);
                    self.half_open_inflight.store(0, Ordering::SeqCst);
                    record_circuit_breaker_transition("open", "half_open");
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                let inflight = self.half_open_inflight.fetch_add(1, Ordering::SeqCst);
                if inflight < self.half_open_max_probes {
                    true
                } else {
                    self.half_open_inflight.fetch_sub(1, Ordering::SeqCst);
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap();
        match *state {
            BreakerState::Closed => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
            }
            BreakerState::HalfOpen => {
                let successes = self.half_open_successes.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.half_open_required_successes {
                    *state = BreakerState::Closed;
                    self.consecutive_failures.store(0, Ordering::SeqCst);
                    record_circuit_breaker_transition("half_open", "closed");
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap();
        match *state {
            BreakerState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.failure_threshold {
                    *state = BreakerState::Open;
                    self.opened_at_epoch_secs
                        .store(Self::now_epoch_secs(), Ordering::SeqCst);
                    record_circuit_breaker_transition("closed", "open");
                }
            }
            BreakerState::HalfOpen => {
                *state = BreakerState::Open;
                self.opened_at_epoch_secs
                    .store(Self::now_epoch_secs(), Ordering::SeqCst);
                record_circuit_breaker_transition("half_open", "open");
            }
            BreakerState::Open => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        *self.state.lock().unwrap()
    }
}

#[async_trait::async_trait]
pub trait CrossEncoder: Send + Sync {
    async fn score(&self, query: &str, documents: &[String]) -> anyhow::Result<Vec<f64>>;
}

pub struct HttpCrossEncoder {
    client: reqwest::Client,
    url: String,
}

impl HttpCrossEncoder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("failed to build reqwest client"),
            url: url.into(),
        }
    }
}

#[async_trait::async_trait]
impl CrossEncoder for HttpCrossEncoder {
    async fn score(&self, query: &str, documents: &[String]) -> anyhow::Result<Vec<f64>> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({"query": query, "documents": documents}))
            .send()
            .await?;
        let json: serde_json::Value = response.json().await?;
        json["scores"]
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("cross-encoder response missing scores"))?
            .iter()
            .map(|v| v.as_f64().ok_or_else(|| anyhow::anyhow!("non-numeric score")))
            .collect()
    }
}

pub struct Reranker {
    config: RerankerConfig,
    breaker: CircuitBreaker,
    cross_encoder: Option<Box<dyn CrossEncoder>>,
    llm: Option<std::sync::Arc<dyn LlmProvider>>,
    rate_limiter: Option<RateLimiter>,
}

impl Reranker {
    pub fn new(
        config: RerankerConfig,
        cross_encoder: Option<Box<dyn CrossEncoder>>,
        llm: Option<std::sync::Arc<dyn LlmProvider>>,
    ) -> Self {
        let breaker = CircuitBreaker::new(&config);
        let rate_limiter = RateLimiter::new(config.cross_encoder_requests_per_minute).ok();
        Self {
            config,
            breaker,
            cross_encoder,
            llm,
            rate_limiter,
        }
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    /// Candidates scoring below this after reranking are dropped.
    pub fn score_threshold(&self) -> f64 {
        self.config.score_threshold
    }

    /// How much wider than `top_k` the candidate pool should be before reranking.
    pub fn candidate_multiplier(&self) -> usize {
        self.config.candidate_multiplier.max(1)
    }

    /// Reorders `results` by relevance to `query`. Falls through
    /// cross-encoder -> LLM fallback -> original RRF order, logging at each
    /// degradation step but never failing the overall search.
    pub async fn rerank(&self, query: &str, results: Vec<SearchResult>) -> Vec<SearchResult> {
        self.rerank_tracked(query, results).await.0
    }

    /// Like `rerank`, but also reports whether a real relevance score was
    /// applied (cross-encoder or LLM), as opposed to falling through to the
    /// original order unchanged — callers that filter by score threshold need
    /// to know not to apply that filter to untouched scores.
    pub async fn rerank_tracked(&self, query: &str, mut results: Vec<SearchResult>) -> (Vec<SearchResult>, bool) {
        if !self.config.enabled || results.is_empty() {
            return (results, false);
        }

        if let Some(encoder) = &self.cross_encoder {
            if self.breaker.allow_request() {
                let documents: Vec<String> = results.iter().map(|r| r.content.clone()).collect();
                match self.score_in_batches(encoder.as_ref(), query, &documents).await {
                    Ok(scores) if scores.len() == results.len() => {
                        self.breaker.record_success();
                        for (result, score) in results.iter_mut().zip(scores.into_iter()) {
                            result.score = score;
                        }
                        results.sort_by(|a, b| {
                            b.score
                                .partial_cmp(&a.score)
                                .unwrap_or(std::cmp::Ordering::Equal)
                                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
                        });
                        SearchResult::assign_ranks(&mut results);
                        return (results, true);
                    }
                    Ok(_) => {
                        self.breaker.record_failure();
                        warn!("cross-encoder returned mismatched score count, falling back");
                    }
                    Err(err) => {
                        self.breaker.record_failure();
                        warn!(error = %err, "cross-encoder call failed or timed out, falling back");
                    }
                }
            } else {
                debug!("cross-encoder circuit breaker open, skipping to fallback");
            }
        }

        if let Some(llm) = &self.llm {
            match self.llm_fallback_rerank(llm.as_ref(), query, &results).await {
                Ok(order) if order.len() == results.len() => {
                    return (Self::reorder_by_indices(results, order), true);
                }
                Ok(_) => warn!("LLM reranker fallback returned wrong-length ordering"),
                Err(err) => warn!(error = %err, "LLM reranker fallback failed"),
            }
        }

        (results, false)
    }

    /// Scores `documents` against `query` in parallel batches of
    /// `cross_encoder_batch_size`, each throttled by the shared rate limiter
    /// so a large candidate pool doesn't burst the cross-encoder service.
    async fn score_in_batches(
        &self,
        encoder: &dyn CrossEncoder,
        query: &str,
        documents: &[String],
    ) -> anyhow::Result<Vec<f64>> {
        let batch_size = self.config.cross_encoder_batch_size.max(1);
        let timeout = Duration::from_secs(self.config.timeout_seconds);

        let batches = documents.chunks(batch_size).map(|batch| async move {
            if let Some(limiter) = &self.rate_limiter {
                let _ = limiter.acquire().await;
            }
            with_timeout(timeout, encoder.score(query, batch), "cross_encoder_rerank_batch").await
        });

        let batch_results = futures::future::join_all(batches).await;
        let mut scores = Vec::with_capacity(documents.len());
        for batch_result in batch_results {
            scores.extend(batch_result?);
        }
        Ok(scores)
    }

    async fn llm_fallback_rerank(
        &self,
        llm: &dyn LlmProvider,
        query: &str,
        results: &[SearchResult],
    ) -> anyhow::Result<Vec<usize>> {
        let numbered: String = results
            .iter()
            .enumerate()
            .map(|(i, r)| format!("[{i}] {}", r.content))
            .collect::<Vec<_>>()
            .join("\n");

        let system = "You rerank search results by relevance. Respond with a JSON array of \
            zero-based indices, most relevant first, containing every index exactly once."
            .to_string();
        let user = format!("Query: {query}\n\nResults:\n{numbered}");

        let response = llm
            .chat(vec![crate::llm::Message::user(user)], system)
            .await?;

        let order: Vec<usize> = serde_json::from_str(response.content.trim())
            .map_err(|e| anyhow::anyhow!("could not parse reranker JSON array: {e}"))?;
        Ok(order)
    }

    fn reorder_by_indices(results: Vec<SearchResult>, order: Vec<usize>) -> Vec<SearchResult> {
        let mut slots: Vec<Option<SearchResult>> = results.into_iter().map(Some).collect();
        let mut reordered = Vec::with_capacity(slots.len());
        for index in order {
            if let Some(slot) = slots.get_mut(index).and_then(|s| s.take()) {
                reordered.push(slot);
            }
        }
        SearchResult::assign_ranks(&mut reordered);
        reordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RerankerConfig {
        RerankerConfig {
            enabled: true,
            cross_encoder_url: None,
            failure_threshold: 3,
            open_duration_seconds: 30,
            half_open_max_probes: 2,
            half_open_required_successes: 2,
            timeout_seconds: 10,
            score_threshold: 0.5,
            candidate_multiplier: 3,
            cross_encoder_batch_size: 10,
            cross_encoder_requests_per_minute: 120,
        }
    }

    #[test]
    fn breaker_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(&test_config());
        assert_eq!(breaker.state(), BreakerState::Closed);
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn breaker_stays_closed_below_threshold() {
        let breaker = CircuitBreaker::new(&test_config());
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.allow_request());
    }

    #[test]
    fn half_open_probe_failure_reopens_immediately() {
        let breaker = CircuitBreaker::new(&test_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        breaker.opened_at_epoch_secs.store(0, Ordering::SeqCst);
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn half_open_closes_after_required_successes() {
        let breaker = CircuitBreaker::new(&test_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        breaker.opened_at_epoch_secs.store(0, Ordering::SeqCst);
        assert!(breaker.allow_request());
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    struct BatchRecordingEncoder {
        batch_sizes: std::sync::Mutex<Vec<usize>>,
    }

    #[async_trait::async_trait]
    impl CrossEncoder for BatchRecordingEncoder {
        async fn score(&self, _query: &str, documents: &[String]) -> anyhow::Result<Vec<f64>> {
            self.batch_sizes.lock().unwrap().push(documents.len());
            Ok(documents.iter().map(|_| 0.9).collect())
        }
    }

    fn result(chunk_id: &str) -> SearchResult {
        SearchResult {
            chunk_id: chunk_id.to_string(),
            file_id: "f".to_string(),
            content: "some content".to_string(),
            score: 0.1,
            rank: 0,
            method: crate::search::types::SearchMethod::Hybrid,
            metadata: serde_json::Value::Null,
            dense_score: None,
            sparse_score: None,
            fuzzy_score: None,
            rrf_score: None,
        }
    }

    #[tokio::test]
    async fn cross_encoder_calls_are_split_into_configured_batches() {
        let mut config = test_config();
        config.cross_encoder_batch_size = 4;
        let encoder = BatchRecordingEncoder {
            batch_sizes: std::sync::Mutex::new(Vec::new()),
        };
        let reranker = Reranker::new(config, Some(Box::new(encoder)), None);

        let results: Vec<SearchResult> = (0..10).map(|i| result(&i.to_string())).collect();
        let (reranked, was_reranked) = reranker.rerank_tracked("query", results).await;

        assert!(was_reranked);
        assert_eq!(reranked.len(), 10);
    }

    struct AlwaysFailingEncoder;

    #[async_trait::async_trait]
    impl CrossEncoder for AlwaysFailingEncoder {
        async fn score(&self, _query: &str, _documents: &[String]) -> anyhow::Result<Vec<f64>> {
            Err(anyhow::anyhow!("cross-encoder unreachable"))
        }
    }

    #[tokio::test]
    async fn rerank_tracked_reports_untouched_on_total_failure() {
        let reranker = Reranker::new(test_config(), Some(Box::new(AlwaysFailingEncoder)), None);
        let results = vec![result("a"), result("b")];
        let (reranked, was_reranked) = reranker.rerank_tracked("query", results).await;
        assert!(!was_reranked);
        assert_eq!(reranked.len(), 2);
    }
}
