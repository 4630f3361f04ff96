// src/cache/types.rs
// Shared cache entry / key types used by every cache level.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Namespaced cache key, e.g. `query:<hex>` or `embedding:<hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(pub String);

impl CacheKey {
    pub fn new(namespace: &str, hash: &str) -> Self {
        Self(format!("{namespace}:{hash}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hash an arbitrary serializable payload into a hex SHA-256 digest, the
/// shared building block for every cache-key namespace (`query:<hex>`,
/// `embedding:<hex>`, `search:exact:<hex>`, `search:sem:<hex>`).
pub fn hash_payload<T: Serialize>(payload: &T) -> anyhow::Result<String> {
    let json = serde_json::to_string(payload)?;
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn query_cache_key(query: &str, params: &Value) -> anyhow::Result<CacheKey> {
    let hash = hash_payload(&(query, params))?;
    Ok(CacheKey::new("query", &hash))
}

pub fn embedding_cache_key(text: &str) -> anyhow::Result<CacheKey> {
    let hash = hash_payload(&text)?;
    Ok(CacheKey::new("embedding", &hash))
}

pub fn exact_search_cache_key(query: &str, params: &Value) -> anyhow::Result<CacheKey> {
    let hash = hash_payload(&(query, params))?;
    Ok(CacheKey::new("search:exact", &hash))
}

pub fn semantic_search_cache_key(embedding: &[f32]) -> anyhow::Result<CacheKey> {
    let hash = hash_payload(&embedding)?;
    Ok(CacheKey::new("search:sem", &hash))
}

/// A stored cache payload: the serialized result plus the tiny bit of
/// metadata every level needs to decide freshness / tier classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub access_count: i64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if now >= exp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_is_deterministic() {
        let a = hash_payload(&json!({"q": "hello"})).unwrap();
        let b = hash_payload(&json!({"q": "hello"})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn hash_differs_on_content() {
        let a = hash_payload(&"hello").unwrap();
        let b = hash_payload(&"hello!").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn key_namespacing() {
        let k = query_cache_key("hello", &json!({})).unwrap();
        assert!(k.as_str().starts_with("query:"));
        let k = exact_search_cache_key("hello", &json!({})).unwrap();
        assert!(k.as_str().starts_with("search:exact:"));
    }
}
