// src/compactor/progress.rs
// Progress reporting for a compaction in flight, published to Redis under
// `progress:<conversation_id>` so a caller can poll without blocking on the
// compaction itself.

use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionStage {
    Preparing,
    Snapshotting,
    Summarizing,
    Writing,
    Done,
}

impl CompactionStage {
    pub fn percent(&self) -> u8 {
        match self {
            CompactionStage::Preparing => 10,
            CompactionStage::Snapshotting => 30,
            CompactionStage::Summarizing => 60,
            CompactionStage::Writing => 85,
            CompactionStage::Done => 100,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompactionStage::Preparing => "preparing",
            CompactionStage::Snapshotting => "snapshotting",
            CompactionStage::Summarizing => "summarizing",
            CompactionStage::Writing => "writing",
            CompactionStage::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub stage: String,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

pub struct ProgressPublisher {
    conn: ConnectionManager,
}

impl ProgressPublisher {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn key(conversation_id: &str) -> String {
        format!("progress:{conversation_id}")
    }

    pub async fn publish(&self, conversation_id: &str, stage: CompactionStage) {
        let update = ProgressUpdate {
            percent: stage.percent(),
            stage: stage.as_str().to_string(),
            updated_at: chrono::Utc::now(),
        };

        let Ok(payload) = serde_json::to_string(&update) else {
            warn!(conversation_id, "failed to serialize compaction progress");
            return;
        };

        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = redis::cmd("SET")
            .arg(Self::key(conversation_id))
            .arg(payload)
            .arg("EX")
            .arg(300)
            .query_async(&mut conn)
            .await;

        if let Err(err) = result {
            warn!(conversation_id, error = %err, "failed to publish compaction progress");
        }
    }

    pub async fn read(&self, conversation_id: &str) -> Option<ProgressUpdate> {
        let mut conn = self.conn.clone();
        let raw: redis::RedisResult<Option<String>> = redis::cmd("GET")
            .arg(Self::key(conversation_id))
            .query_async(&mut conn)
            .await;

        raw.ok().flatten().and_then(|s| serde_json::from_str(&s).ok())
    }
}
