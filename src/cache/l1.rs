// src/cache/l1.rs
// L1 cache: a volatile Redis-backed key/value store with short TTLs.

use redis::aio::ConnectionManager;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::cache::types::CacheKey;

/// Health snapshot returned by `L1Cache::info`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct L1Health {
    pub connected: bool,
}

/// Wraps a Redis connection manager. Every failure is converted to a miss
/// at the call site — an unreachable Redis must never fail a request, only
/// degrade it. A failure is logged once per call, not retried inline.
#[derive(Clone)]
pub struct L1Cache {
    conn: ConnectionManager,
}

impl L1Cache {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = match redis::cmd("GET")
            .arg(key.as_str())
            .query_async(&mut conn)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                warn!("L1 cache unavailable on get({}): {}", key, e);
                return None;
            }
        };

        match raw {
            Some(s) => match serde_json::from_str(&s) {
                Ok(value) => {
                    debug!("L1 hit: {}", key);
                    Some(value)
                }
                Err(e) => {
                    warn!("L1 cache entry for {} failed to deserialize: {}", key, e);
                    None
                }
            },
            None => {
                debug!("L1 miss: {}", key);
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T, ttl_seconds: u64) {
        let mut conn = self.conn.clone();
        let serialized = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                warn!("L1 cache failed to serialize value for {}: {}", key, e);
                return;
            }
        };

        let result: redis::RedisResult<()> = redis::cmd("SET")
            .arg(key.as_str())
            .arg(serialized)
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await;

        if let Err(e) = result {
            warn!("L1 cache unavailable on set({}): {}", key, e);
        }
    }

    pub async fn delete(&self, key: &CacheKey) {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = redis::cmd("DEL")
            .arg(key.as_str())
            .query_async(&mut conn)
            .await;
        if let Err(e) = result {
            warn!("L1 cache unavailable on delete({}): {}", key, e);
        }
    }

    /// Scan for up to `limit` keys matching a prefix-style glob (e.g.
    /// `search:sem:*`). Used by the semantic cache to discover similarity
    /// candidates without the caller having to track its own key index.
    /// Cursors until Redis reports `0` or `limit` is reached; an error at any
    /// point returns whatever was already collected.
    pub async fn scan(&self, pattern: &str, limit: usize) -> Vec<String> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let result: redis::RedisResult<(u64, Vec<String>)> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await;

            match result {
                Ok((next_cursor, batch)) => {
                    keys.extend(batch);
                    cursor = next_cursor;
                }
                Err(e) => {
                    warn!("L1 cache unavailable on scan({}): {}", pattern, e);
                    break;
                }
            }

            if keys.len() >= limit || cursor == 0 {
                break;
            }
        }

        keys.truncate(limit);
        keys
    }

    pub async fn info(&self) -> L1Health {
        let mut conn = self.conn.clone();
        let pong: redis::RedisResult<String> =
            redis::cmd("PING").query_async(&mut conn).await;
        L1Health {
            connected: pong.is_ok(),
        }
    }
}
