// src/search/engine.rs
// Orchestrates the six search methods over a Postgres-backed chunk store:
// dense (pgvector), sparse (BM25 over candidates), fuzzy (trigram), ilike
// (plain substring fallback), hybrid (dense+sparse+fuzzy fused by RRF, then
// reranked) and hybrid_rpc (single round trip to a DB-side fusion function).

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::warn;

use crate::config::search::HybridSearchConfig;
use crate::llm::EmbeddingClient;
use crate::metrics::record_search_method;
use crate::search::reranker::Reranker;
use crate::search::rrf::{reciprocal_rank_fusion, RrfWeights};
use crate::search::types::{Chunk, SearchMethod, SearchMetrics, SearchResult};
use crate::search::{bm25, fuzzy};
use crate::utils::with_timeout;

/// Data access seam for chunk retrieval. A real implementation queries
/// Postgres directly; tests substitute an in-memory fake.
#[async_trait]
pub trait ChunkRepository: Send + Sync {
    async fn dense_candidates(&self, embedding: &[f32], limit: usize) -> anyhow::Result<Vec<(Chunk, f64)>>;
    async fn keyword_candidates(&self, query: &str, limit: usize) -> anyhow::Result<Vec<Chunk>>;
    async fn ilike_candidates(&self, query: &str, limit: usize) -> anyhow::Result<Vec<Chunk>>;
    async fn hybrid_rpc(&self, query: &str, embedding: &[f32], limit: usize) -> anyhow::Result<Vec<SearchResult>>;
}

pub struct PgChunkRepository {
    pool: PgPool,
}

impl PgChunkRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the `chunks` table, its vector extension and its indexes if
    /// they don't already exist. Idempotent, safe to call on every boot.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                chunk_id TEXT PRIMARY KEY,
                file_id TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding vector(1024),
                metadata JSONB NOT NULL DEFAULT '{}'::jsonb
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS chunks_embedding_hnsw_idx ON chunks \
             USING hnsw (embedding vector_cosine_ops)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS chunks_content_tsv_idx ON chunks \
             USING GIN (to_tsvector('english', content))",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_chunk(row: &sqlx::postgres::PgRow) -> anyhow::Result<Chunk> {
    use sqlx::Row;
    let metadata: Option<serde_json::Value> = row.try_get("metadata")?;
    Ok(Chunk {
        chunk_id: row.try_get("chunk_id")?,
        file_id: row.try_get("file_id")?,
        content: row.try_get("content")?,
        embedding: None,
        metadata: metadata.unwrap_or(serde_json::Value::Null),
    })
}

#[async_trait]
impl ChunkRepository for PgChunkRepository {
    async fn dense_candidates(&self, embedding: &[f32], limit: usize) -> anyhow::Result<Vec<(Chunk, f64)>> {
        use sqlx::Row;
        let vector = pgvector::Vector::from(embedding.to_vec());
        let rows = sqlx::query(
            "SELECT chunk_id, file_id, content, metadata, 1 - (embedding <=> $1) AS similarity \
             FROM chunks ORDER BY embedding <=> $1 LIMIT $2",
        )
        .bind(vector)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let similarity: Option<f64> = row.try_get("similarity")?;
                Ok((row_to_chunk(row)?, similarity.unwrap_or(0.0)))
            })
            .collect()
    }

    async fn keyword_candidates(&self, query: &str, limit: usize) -> anyhow::Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT chunk_id, file_id, content, metadata FROM chunks \
             WHERE to_tsvector('english', content) @@ plainto_tsquery('english', $1) LIMIT $2",
        )
        .bind(query)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_chunk).collect()
    }

    async fn ilike_candidates(&self, query: &str, limit: usize) -> anyhow::Result<Vec<Chunk>> {
        let pattern = format!("%{query}%");
        let rows = sqlx::query(
            "SELECT chunk_id, file_id, content, metadata FROM chunks WHERE content ILIKE $1 LIMIT $2",
        )
        .bind(pattern)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_chunk).collect()
    }

    async fn hybrid_rpc(&self, query: &str, embedding: &[f32], limit: usize) -> anyhow::Result<Vec<SearchResult>> {
        use sqlx::Row;
        let vector = pgvector::Vector::from(embedding.to_vec());
        let rows = sqlx::query(
            "SELECT chunk_id, file_id, content, metadata, rrf_score FROM hybrid_search($1, $2, $3)",
        )
        .bind(query)
        .bind(vector)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut results: Vec<SearchResult> = rows
            .iter()
            .map(|row| {
                let rrf_score: Option<f64> = row.try_get("rrf_score")?;
                let chunk = row_to_chunk(row)?;
                Ok::<_, anyhow::Error>(SearchResult {
                    chunk_id: chunk.chunk_id,
                    file_id: chunk.file_id,
                    content: chunk.content,
                    score: rrf_score.unwrap_or(0.0),
                    rank: 0,
                    method: SearchMethod::HybridRpc,
                    metadata: chunk.metadata,
                    dense_score: None,
                    sparse_score: None,
                    fuzzy_score: None,
                    rrf_score,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        SearchResult::assign_ranks(&mut results);
        Ok(results)
    }
}

pub struct HybridSearchEngine {
    repository: Arc<dyn ChunkRepository>,
    embeddings: Arc<dyn EmbeddingClient>,
    reranker: Arc<Reranker>,
    config: HybridSearchConfig,
}

impl HybridSearchEngine {
    pub fn new(
        repository: Arc<dyn ChunkRepository>,
        embeddings: Arc<dyn EmbeddingClient>,
        reranker: Arc<Reranker>,
        config: HybridSearchConfig,
    ) -> Self {
        Self {
            repository,
            embeddings,
            reranker,
            config,
        }
    }

    fn sub_search_timeout(&self) -> Duration {
        Duration::from_secs(self.config.sub_search_timeout_seconds)
    }

    pub async fn dense(&self, query: &str, limit: usize) -> anyhow::Result<Vec<SearchResult>> {
        let started = Instant::now();
        let embedding = self.embeddings.embed(query).await?;
        let candidates = self.repository.dense_candidates(&embedding, limit).await?;
        let mut results: Vec<SearchResult> = candidates
            .into_iter()
            .map(|(chunk, similarity)| SearchResult {
                chunk_id: chunk.chunk_id,
                file_id: chunk.file_id,
                content: chunk.content,
                score: similarity,
                rank: 0,
                method: SearchMethod::Dense,
                metadata: chunk.metadata,
                dense_score: Some(similarity),
                sparse_score: None,
                fuzzy_score: None,
                rrf_score: None,
            })
            .collect();
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        SearchResult::assign_ranks(&mut results);
        record_search_method("dense", started.elapsed().as_secs_f64());
        Ok(results)
    }

    pub async fn sparse(&self, query: &str, limit: usize) -> anyhow::Result<Vec<SearchResult>> {
        let started = Instant::now();
        let candidates = self.repository.keyword_candidates(query, limit * 5).await?;
        let results = bm25::search(query, &candidates, limit);
        record_search_method("sparse", started.elapsed().as_secs_f64());
        Ok(results)
    }

    pub async fn fuzzy(&self, query: &str, limit: usize) -> anyhow::Result<Vec<SearchResult>> {
        let started = Instant::now();
        let candidates = self.repository.keyword_candidates(query, limit * 5).await?;
        let results = fuzzy::search(query, &candidates, 0.1, limit);
        record_search_method("fuzzy", started.elapsed().as_secs_f64());
        Ok(results)
    }

    /// Rerank an already-retrieved result list against `query`. Exposed so
    /// callers of the non-hybrid methods can opt into reranking explicitly.
    pub async fn reranker_rerank(&self, query: &str, results: Vec<SearchResult>) -> Vec<SearchResult> {
        self.reranker.rerank(query, results).await
    }

    pub async fn ilike(&self, query: &str, limit: usize) -> anyhow::Result<Vec<SearchResult>> {
        let started = Instant::now();
        let candidates = self.repository.ilike_candidates(query, limit).await?;
        let mut results: Vec<SearchResult> = candidates
            .into_iter()
            .map(|chunk| SearchResult {
                chunk_id: chunk.chunk_id,
                file_id: chunk.file_id,
                content: chunk.content,
                score: 1.0,
                rank: 0,
                method: SearchMethod::Ilike,
                metadata: chunk.metadata,
                dense_score: None,
                sparse_score: None,
                fuzzy_score: None,
                rrf_score: None,
            })
            .collect();
        SearchResult::assign_ranks(&mut results);
        record_search_method("ilike", started.elapsed().as_secs_f64());
        Ok(results)
    }

    /// Fan out dense, sparse and fuzzy concurrently, each bounded by
    /// `sub_search_timeout_seconds`. A sub-search that fails or times out
    /// contributes an empty list rather than failing the whole query.
    pub async fn hybrid(&self, query: &str, limit: usize) -> anyhow::Result<Vec<SearchResult>> {
        let started = Instant::now();
        let timeout = self.sub_search_timeout();

        let (dense, sparse, fuzzy) = tokio::join!(
            with_timeout(timeout, self.dense(query, limit), "dense_search"),
            with_timeout(timeout, self.sparse(query, limit), "sparse_search"),
            with_timeout(timeout, self.fuzzy(query, limit), "fuzzy_search"),
        );

        let dense = degrade_to_empty(dense, "dense");
        let sparse = degrade_to_empty(sparse, "sparse");
        let fuzzy = degrade_to_empty(fuzzy, "fuzzy");

        let weights = RrfWeights {
            dense: self.config.dense_weight,
            sparse: self.config.sparse_weight,
            fuzzy: self.config.fuzzy_weight,
        };

        let fused = reciprocal_rank_fusion(
            &[
                (SearchMethod::Dense, dense),
                (SearchMethod::Sparse, sparse),
                (SearchMethod::Fuzzy, fuzzy),
            ],
            weights,
            self.config.rrf_k,
        );

        record_search_method("hybrid", started.elapsed().as_secs_f64());
        Ok(fused)
    }

    /// Retrieve via `method`, widened to `top_k * candidate_multiplier`
    /// candidates, then rerank and truncate back to `top_k`. The
    /// `score_threshold` filter only applies when the reranker actually
    /// produced real scores; if it fell through untouched, the candidates
    /// still carry their original method's score scale and filtering against
    /// a reranker-tuned threshold would be meaningless.
    pub async fn search_with_reranking(
        &self,
        query: &str,
        method: SearchMethod,
        top_k: usize,
    ) -> anyhow::Result<(Vec<SearchResult>, SearchMetrics)> {
        let started = Instant::now();
        let candidate_k = top_k * self.reranker.candidate_multiplier();

        let candidates = match method {
            SearchMethod::Dense => self.dense(query, candidate_k).await?,
            SearchMethod::Sparse => self.sparse(query, candidate_k).await?,
            SearchMethod::Fuzzy => self.fuzzy(query, candidate_k).await?,
            SearchMethod::Ilike => self.ilike(query, candidate_k).await?,
            SearchMethod::Hybrid => self.hybrid(query, candidate_k).await?,
            SearchMethod::HybridRpc => self.hybrid_rpc(query, candidate_k).await?,
            SearchMethod::ParallelAggregated => self.hybrid(query, candidate_k).await?,
        };

        let (mut reranked, was_reranked) = self.reranker.rerank_tracked(query, candidates).await;

        if was_reranked {
            let threshold = self.reranker.score_threshold();
            reranked.retain(|r| r.score >= threshold);
        }

        reranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        reranked.truncate(top_k);
        SearchResult::assign_ranks(&mut reranked);

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        record_search_method(method.as_str(), started.elapsed().as_secs_f64());

        let mut method_counts = std::collections::HashMap::new();
        method_counts.insert(method.as_str().to_string(), 1);
        let metrics = SearchMetrics {
            queries_total: 1,
            avg_latency_ms: elapsed_ms,
            method_counts,
        };

        Ok((reranked, metrics))
    }

    /// Single round trip to a DB-side fusion function, used when the
    /// application wants fusion computed server-side instead of fanning out
    /// three separate queries.
    pub async fn hybrid_rpc(&self, query: &str, limit: usize) -> anyhow::Result<Vec<SearchResult>> {
        let started = Instant::now();
        let embedding = self.embeddings.embed(query).await?;
        let results = self.repository.hybrid_rpc(query, &embedding, limit).await?;
        record_search_method("hybrid_rpc", started.elapsed().as_secs_f64());
        Ok(results)
    }
}

fn degrade_to_empty(outcome: anyhow::Result<Vec<SearchResult>>, method: &str) -> Vec<SearchResult> {
    match outcome {
        Ok(results) => results,
        Err(err) => {
            warn!(method, error = %err, "sub-search failed, contributing no results");
            Vec::new()
        }
    }
}
