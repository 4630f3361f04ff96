// src/main.rs
// Boots configuration, the connection pools and every singleton service,
// then serves the HTTP API.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ragcore::config::helpers::env_or;
use ragcore::config::RagConfig;
use ragcore::llm::{HttpEmbeddingClient, HttpLlmProvider};
use ragcore::metrics::init_metrics;
use ragcore::search::{HttpCrossEncoder, HybridSearchEngine, PgChunkRepository, Reranker};
use ragcore::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RagConfig::from_env();
    config.validate()?;
    info!("configuration loaded and validated");

    init_metrics();

    let pg_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    info!("connected to postgres");

    let redis_client = redis::Client::open(config.redis.url.clone())?;
    let redis_conn = redis_client.get_connection_manager().await?;
    info!("connected to redis");

    let llm_base_url = env_or("LLM_BASE_URL", "http://localhost:11434/v1");
    let llm_api_key = env_or("LLM_API_KEY", "");
    let llm_model = env_or("LLM_MODEL", "gpt-4o-mini");
    let llm: Arc<dyn ragcore::llm::LlmProvider> =
        Arc::new(HttpLlmProvider::new(llm_base_url, llm_api_key, llm_model));

    let embedding_base_url = env_or("EMBEDDING_BASE_URL", "http://localhost:11434/v1");
    let embedding_api_key = env_or("EMBEDDING_API_KEY", "");
    let embedding_model = env_or("EMBEDDING_MODEL", "text-embedding-3-small");
    let embedding_dimensions: usize = env_or("EMBEDDING_DIMENSIONS", "1024").parse().unwrap_or(1024);
    let embeddings: Arc<dyn ragcore::llm::EmbeddingClient> = Arc::new(HttpEmbeddingClient::new(
        embedding_base_url,
        embedding_api_key,
        embedding_model,
        embedding_dimensions,
    ));

    let cross_encoder = config
        .reranker
        .cross_encoder_url
        .clone()
        .map(|url| Box::new(HttpCrossEncoder::new(url)) as Box<dyn ragcore::search::CrossEncoder>);
    let reranker = Arc::new(Reranker::new(config.reranker.clone(), cross_encoder, Some(llm.clone())));

    let repository = PgChunkRepository::new(pg_pool.clone());
    repository.migrate().await?;
    let repository = Arc::new(repository);
    let search_engine = Arc::new(HybridSearchEngine::new(
        repository,
        embeddings.clone(),
        reranker,
        config.hybrid_search.clone(),
    ));

    let state = Arc::new(
        AppState::new(config.clone(), pg_pool, redis_conn, search_engine, embeddings, llm).await?,
    );

    let recovered = state.compactor.recover_abnormal_checkpoints().await?;
    if recovered > 0 {
        info!(recovered, "checkpoints pending abnormal-close recovery");
    }

    let bind_address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!(bind_address, "ragcore-server listening");

    axum::serve(listener, ragcore::api::router(state)).await?;
    Ok(())
}
