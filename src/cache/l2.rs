// src/cache/l2.rs
// L2 cache: durable Postgres-backed key/value store with longer TTLs.

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};

use crate::cache::types::CacheKey;

#[derive(Debug, Clone, serde::Serialize)]
pub struct L2Health {
    pub connected: bool,
    pub row_count: i64,
}

/// Wraps a Postgres pool against a `cache_entries` table. Like `L1Cache`,
/// failures degrade to a miss rather than propagate.
#[derive(Clone)]
pub struct L2Cache {
    pool: PgPool,
}

impl L2Cache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                value JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                expires_at TIMESTAMPTZ,
                access_count BIGINT NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let row = match sqlx::query(
            "SELECT value, expires_at FROM cache_entries WHERE key = $1",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        {
            Ok(row) => row,
            Err(e) => {
                warn!("L2 cache unavailable on get({}): {}", key, e);
                return None;
            }
        };

        let row = row?;
        let expires_at: Option<chrono::DateTime<Utc>> = row.get("expires_at");
        if let Some(exp) = expires_at {
            if Utc::now() >= exp {
                debug!("L2 entry expired: {}", key);
                self.delete(key).await;
                return None;
            }
        }

        self.record_access(key).await;

        let value: serde_json::Value = row.get("value");
        match serde_json::from_value(value) {
            Ok(v) => {
                debug!("L2 hit: {}", key);
                Some(v)
            }
            Err(e) => {
                warn!("L2 entry for {} failed to deserialize: {}", key, e);
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T, ttl_seconds: u64) {
        let serialized = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                warn!("L2 cache failed to serialize value for {}: {}", key, e);
                return;
            }
        };
        let expires_at = Utc::now() + chrono::Duration::seconds(ttl_seconds as i64);

        let result = sqlx::query(
            r#"
            INSERT INTO cache_entries (key, value, created_at, expires_at, access_count)
            VALUES ($1, $2, now(), $3, 0)
            ON CONFLICT (key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at,
                access_count = cache_entries.access_count + 1
            "#,
        )
        .bind(key.as_str())
        .bind(serialized)
        .bind(expires_at)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!("L2 cache unavailable on set({}): {}", key, e);
        }
    }

    pub async fn delete(&self, key: &CacheKey) {
        let result = sqlx::query("DELETE FROM cache_entries WHERE key = $1")
            .bind(key.as_str())
            .execute(&self.pool)
            .await;
        if let Err(e) = result {
            warn!("L2 cache unavailable on delete({}): {}", key, e);
        }
    }

    async fn record_access(&self, key: &CacheKey) {
        let _ = sqlx::query(
            "UPDATE cache_entries SET access_count = access_count + 1 WHERE key = $1",
        )
        .bind(key.as_str())
        .execute(&self.pool)
        .await;
    }

    /// Delete every entry whose TTL has elapsed. Returns the number removed.
    pub async fn cleanup_expired(&self) -> anyhow::Result<i64> {
        let result = sqlx::query(
            "DELETE FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at < now()",
        )
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected() as i64;
        if deleted > 0 {
            info!("L2 cleaned up {} expired entries", deleted);
        }
        Ok(deleted)
    }

    /// Ops-facing extra, not spec-mandated: keep the table bounded by
    /// evicting the least-recently-touched rows past `max_entries`.
    pub async fn cleanup_lru(&self, max_entries: i64) -> anyhow::Result<i64> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM cache_entries")
            .fetch_one(&self.pool)
            .await?
            .get("count");

        if count <= max_entries {
            return Ok(0);
        }

        let to_delete = count - max_entries;
        let result = sqlx::query(
            r#"
            DELETE FROM cache_entries
            WHERE key IN (
                SELECT key FROM cache_entries
                ORDER BY access_count ASC, created_at ASC
                LIMIT $1
            )
            "#,
        )
        .bind(to_delete)
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected() as i64;
        if deleted > 0 {
            info!("L2 evicted {} LRU entries (limit {})", deleted, max_entries);
        }
        Ok(deleted)
    }

    pub async fn info(&self) -> L2Health {
        match sqlx::query("SELECT COUNT(*) AS count FROM cache_entries")
            .fetch_one(&self.pool)
            .await
        {
            Ok(row) => L2Health {
                connected: true,
                row_count: row.get("count"),
            },
            Err(_) => L2Health {
                connected: false,
                row_count: 0,
            },
        }
    }
}
