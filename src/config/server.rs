// src/config/server.rs
// HTTP server, Postgres and Redis connection configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: super::helpers::env_or("RAGCORE_HOST", "0.0.0.0"),
            port: super::helpers::env_u16("RAGCORE_PORT", 8080),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        Self {
            url: super::helpers::require_env("DATABASE_URL"),
            max_connections: super::helpers::env_u32("RAGCORE_PG_MAX_CONNECTIONS", 10),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.trim().is_empty() {
            return Err(anyhow::anyhow!("DATABASE_URL must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

impl RedisConfig {
    pub fn from_env() -> Self {
        Self {
            url: super::helpers::require_env("REDIS_URL"),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.trim().is_empty() {
            return Err(anyhow::anyhow!("REDIS_URL must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self {
            level: super::helpers::env_or("RAGCORE_LOG_LEVEL", "info"),
        }
    }
}
