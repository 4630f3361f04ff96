// src/compactor/locks.rs
// Distributed lock, held in Redis with a TTL fallback so a crashed holder
// never deadlocks a conversation's compaction.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::warn;

pub struct CompactionLock {
    conn: ConnectionManager,
}

impl CompactionLock {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn key(conversation_id: &str) -> String {
        format!("lock:compaction:{conversation_id}")
    }

    /// Attempt to acquire the lock with `SET key value NX PX ttl_ms`.
    /// Returns true if this call won the lock.
    pub async fn try_acquire(&self, conversation_id: &str, ttl_seconds: u64, holder: &str) -> bool {
        let mut conn = self.conn.clone();
        let key = Self::key(conversation_id);
        let result: redis::RedisResult<bool> = redis::cmd("SET")
            .arg(&key)
            .arg(holder)
            .arg("NX")
            .arg("PX")
            .arg(ttl_seconds * 1000)
            .query_async(&mut conn)
            .await
            .map(|v: Option<String>| v.is_some());

        match result {
            Ok(acquired) => acquired,
            Err(err) => {
                warn!(conversation_id, error = %err, "compaction lock acquire failed, treating as held");
                false
            }
        }
    }

    /// Release only if we are the current holder (compare-and-delete via a
    /// value check, since a Lua script isn't wired in here).
    pub async fn release(&self, conversation_id: &str, holder: &str) {
        let mut conn = self.conn.clone();
        let key = Self::key(conversation_id);
        let current: redis::RedisResult<Option<String>> = conn.get(&key).await;
        if let Ok(Some(value)) = current {
            if value == holder {
                let _: redis::RedisResult<()> = conn.del(&key).await;
            }
        }
    }

    pub async fn is_held(&self, conversation_id: &str) -> bool {
        let mut conn = self.conn.clone();
        let key = Self::key(conversation_id);
        matches!(conn.exists::<_, bool>(&key).await, Ok(true))
    }
}
