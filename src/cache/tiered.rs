// src/cache/tiered.rs
//
//! Two-level caching strategy: check L1 (fast, volatile) first, fall back
//! to L2 (durable, longer TTL) on miss, and promote L2 hits back into L1
//! so the next lookup is fast again.

use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::cache::l1::L1Cache;
use crate::cache::l2::L2Cache;
use crate::cache::types::CacheKey;
use crate::config::cache::TieredCacheConfig;
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLevel {
    L1,
    L2,
    None,
}

pub struct CacheLookupResult<T> {
    pub value: Option<T>,
    pub level: CacheLevel,
}

impl<T> CacheLookupResult<T> {
    pub fn is_hit(&self) -> bool {
        self.level != CacheLevel::None
    }
}

pub struct TieredCache {
    l1: Option<L1Cache>,
    l2: Option<L2Cache>,
    config: TieredCacheConfig,
}

impl TieredCache {
    pub fn new(l1: Option<L1Cache>, l2: Option<L2Cache>, config: TieredCacheConfig) -> Self {
        Self { l1, l2, config }
    }

    pub async fn get<T: DeserializeOwned + Serialize>(&self, key: &CacheKey) -> CacheLookupResult<T> {
        if self.config.l1_enabled {
            if let Some(l1) = &self.l1 {
                if let Some(value) = l1.get::<T>(key).await {
                    metrics::record_cache_level_result("l1", true);
                    return CacheLookupResult {
                        value: Some(value),
                        level: CacheLevel::L1,
                    };
                }
                metrics::record_cache_level_result("l1", false);
            }
        }

        if self.config.l2_enabled {
            if let Some(l2) = &self.l2 {
                if let Some(value) = l2.get::<T>(key).await {
                    metrics::record_cache_level_result("l2", true);
                    if self.config.promote_to_l1 {
                        if let Some(l1) = &self.l1 {
                            debug!("promoting {} from L2 to L1", key);
                            l1.set(key, &value, self.config.l1_ttl_seconds).await;
                        }
                    }
                    return CacheLookupResult {
                        value: Some(value),
                        level: CacheLevel::L2,
                    };
                }
                metrics::record_cache_level_result("l2", false);
            }
        }

        CacheLookupResult {
            value: None,
            level: CacheLevel::None,
        }
    }

    /// Write-through: populate both levels so a subsequent lookup is an L1 hit.
    pub async fn put<T: Serialize>(&self, key: &CacheKey, value: &T) {
        if self.config.l1_enabled {
            if let Some(l1) = &self.l1 {
                l1.set(key, value, self.config.l1_ttl_seconds).await;
            }
        }
        if self.config.l2_enabled {
            if let Some(l2) = &self.l2 {
                l2.set(key, value, self.config.l2_ttl_seconds).await;
            }
        }
    }

    /// Threshold-gated write: only persists `value` when `max_score` clears
    /// `semantic_threshold`, so a low-confidence result never pollutes the
    /// cache for a later, unrelated lookup. Returns whether it wrote.
    pub async fn cache_if_relevant<T: Serialize>(&self, key: &CacheKey, value: &T, max_score: f32) -> bool {
        if max_score < self.config.semantic_threshold {
            debug!(
                max_score,
                threshold = self.config.semantic_threshold,
                "skipping cache write, result below semantic threshold"
            );
            return false;
        }
        self.put(key, value).await;
        true
    }

    pub async fn invalidate(&self, key: &CacheKey) {
        if let Some(l1) = &self.l1 {
            l1.delete(key).await;
        }
        if let Some(l2) = &self.l2 {
            l2.delete(key).await;
        }
    }

    /// Connectivity snapshot for the `/health` endpoint.
    pub async fn l1_health(&self) -> crate::cache::l1::L1Health {
        match &self.l1 {
            Some(l1) => l1.info().await,
            None => crate::cache::l1::L1Health { connected: false },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_level_is_hit() {
        let result: CacheLookupResult<i32> = CacheLookupResult {
            value: Some(1),
            level: CacheLevel::L1,
        };
        assert!(result.is_hit());

        let miss: CacheLookupResult<i32> = CacheLookupResult {
            value: None,
            level: CacheLevel::None,
        };
        assert!(!miss.is_hit());
    }

    #[tokio::test]
    async fn cache_if_relevant_skips_write_below_threshold() {
        // Scenario S4: max_score 0.70 < semantic_threshold 0.85 must not write,
        // at either cache level.
        let config = TieredCacheConfig {
            l1_enabled: false,
            l2_enabled: false,
            l1_ttl_seconds: 60,
            l2_ttl_seconds: 60,
            promote_to_l1: false,
            semantic_threshold: 0.85,
        };
        let cache = TieredCache::new(None, None, config);
        let key = CacheKey::new("search:exact", "deadbeef");
        let wrote = cache.cache_if_relevant(&key, &"result", 0.70).await;
        assert!(!wrote);
    }

    #[tokio::test]
    async fn cache_if_relevant_writes_at_or_above_threshold() {
        let config = TieredCacheConfig {
            l1_enabled: false,
            l2_enabled: false,
            l1_ttl_seconds: 60,
            l2_ttl_seconds: 60,
            promote_to_l1: false,
            semantic_threshold: 0.85,
        };
        let cache = TieredCache::new(None, None, config);
        let key = CacheKey::new("search:exact", "deadbeef");
        let wrote = cache.cache_if_relevant(&key, &"result", 0.9).await;
        assert!(wrote);
    }
}
