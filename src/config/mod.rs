// src/config/mod.rs
// Central configuration, composed from one domain struct per component.

pub mod cache;
pub mod compactor;
pub mod helpers;
pub mod orchestrator;
pub mod search;
pub mod server;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

lazy_static! {
    pub static ref CONFIG: RagConfig = RagConfig::from_env();
}

/// Main configuration structure - composes all domain configs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    pub server: server::ServerConfig,
    pub database: server::DatabaseConfig,
    pub redis: server::RedisConfig,
    pub logging: server::LoggingConfig,
    pub tiered_cache: cache::TieredCacheConfig,
    pub semantic_cache: cache::SemanticCacheConfig,
    pub hybrid_search: search::HybridSearchConfig,
    pub reranker: search::RerankerConfig,
    pub expansion: orchestrator::ExpansionConfig,
    pub parallel_search: orchestrator::ParallelSearchConfig,
    pub compactor: compactor::CompactorConfig,
}

impl RagConfig {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            server: server::ServerConfig::from_env(),
            database: server::DatabaseConfig::from_env(),
            redis: server::RedisConfig::from_env(),
            logging: server::LoggingConfig::from_env(),
            tiered_cache: cache::TieredCacheConfig::from_env(),
            semantic_cache: cache::SemanticCacheConfig::from_env(),
            hybrid_search: search::HybridSearchConfig::from_env(),
            reranker: search::RerankerConfig::from_env(),
            expansion: orchestrator::ExpansionConfig::from_env(),
            parallel_search: orchestrator::ParallelSearchConfig::from_env(),
            compactor: compactor::CompactorConfig::from_env(),
        }
    }

    /// Fail fast on a startup-invalid configuration (spec Fatal kind).
    pub fn validate(&self) -> anyhow::Result<()> {
        self.database.validate()?;
        self.redis.validate()?;
        self.semantic_cache.validate()?;
        self.hybrid_search.validate()?;
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        self.server.bind_address()
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
