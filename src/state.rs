// src/state.rs
// Shared application state: one singleton per service, constructed once at
// boot and handed to every HTTP handler via axum's `State` extractor.

use std::sync::Arc;

use redis::aio::ConnectionManager;
use sqlx::PgPool;

use crate::cache::{L1Cache, SemanticCache, TieredCache};
use crate::compactor::{CheckpointStore, CompactionLock, CompactorService, ProgressPublisher};
use crate::config::RagConfig;
use crate::llm::{EmbeddingClient, LlmProvider};
use crate::orchestrator::{ParallelSearchOrchestrator, QueryExpander};
use crate::search::HybridSearchEngine;

pub struct AppState {
    pub config: RagConfig,
    pub pg_pool: PgPool,
    pub tiered_cache: TieredCache,
    pub semantic_cache: SemanticCache,
    pub search_engine: Arc<HybridSearchEngine>,
    pub orchestrator: ParallelSearchOrchestrator,
    pub expander: Arc<QueryExpander>,
    pub compactor: CompactorService,
    pub embeddings: Arc<dyn EmbeddingClient>,
    pub llm: Arc<dyn LlmProvider>,
}

impl AppState {
    pub async fn new(
        config: RagConfig,
        pg_pool: PgPool,
        redis_conn: ConnectionManager,
        search_engine: Arc<HybridSearchEngine>,
        embeddings: Arc<dyn EmbeddingClient>,
        llm: Arc<dyn LlmProvider>,
    ) -> anyhow::Result<Self> {
        let l1 = L1Cache::from_connection(redis_conn.clone());
        let l2_for_tiered = crate::cache::L2Cache::new(pg_pool.clone());
        l2_for_tiered.migrate().await?;

        let l1_for_semantic = L1Cache::from_connection(redis_conn.clone());
        let tiered_cache = TieredCache::new(Some(l1), Some(l2_for_tiered), config.tiered_cache.clone());

        let l2_for_semantic = crate::cache::L2Cache::new(pg_pool.clone());
        let semantic_cache =
            SemanticCache::new(l1_for_semantic, l2_for_semantic, config.semantic_cache.clone());

        let expander = Arc::new(QueryExpander::new(llm.clone(), config.expansion.clone()));
        let orchestrator = ParallelSearchOrchestrator::new(
            search_engine.clone(),
            expander.clone(),
            config.parallel_search.clone(),
        );

        let checkpoints = CheckpointStore::new(pg_pool.clone());
        let lock = CompactionLock::new(redis_conn.clone());
        let progress = ProgressPublisher::new(redis_conn.clone());
        let compactor = CompactorService::new(
            pg_pool.clone(),
            lock,
            progress,
            checkpoints,
            llm.clone(),
            config.compactor.clone(),
        );

        Ok(Self {
            config,
            pg_pool,
            tiered_cache,
            semantic_cache,
            search_engine,
            orchestrator,
            expander,
            compactor,
            embeddings,
            llm,
        })
    }
}
