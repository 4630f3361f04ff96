// src/compactor/checkpoint.rs
// Conversation-message checkpoints: a reversible snapshot taken before every
// compaction, capped per conversation and expiring after 30 days.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{PgPool, Row};
use tracing::{info, warn};

use crate::compactor::context::ContextMessage;
use crate::metrics::{record_checkpoint_created, record_checkpoint_restored};

const CODE_FENCE_MARKERS: &[&str] = &["```"];
const DECISION_PHRASES: &[&str] = &[
    "let's go with",
    "we'll use",
    "decided to",
    "the plan is",
    "i'll choose",
    "going with",
];
const ERROR_PHRASES: &[&str] = &[
    "traceback",
    "error:",
    "exception",
    "failed with",
    "stack trace",
];
const MILESTONE_PHRASES: &[&str] = &[
    "all tests pass",
    "done",
    "completed",
    "finished implementing",
    "ready for review",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoTag {
    Code,
    Decision,
    ErrorResolution,
    Milestone,
}

impl AutoTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoTag::Code => "code",
            AutoTag::Decision => "decision",
            AutoTag::ErrorResolution => "error_resolution",
            AutoTag::Milestone => "milestone",
        }
    }
}

/// Scan the last five messages for the strongest matching heuristic,
/// checked in this priority order: code fence, error, decision, milestone.
pub fn detect_auto_tag(messages: &[ContextMessage]) -> Option<AutoTag> {
    let recent = messages.iter().rev().take(5);
    let mut found_decision = false;
    let mut found_milestone = false;

    for message in recent {
        let lower = message.content.to_lowercase();
        if CODE_FENCE_MARKERS.iter().any(|m| lower.contains(m)) {
            return Some(AutoTag::Code);
        }
        if ERROR_PHRASES.iter().any(|p| lower.contains(p)) {
            return Some(AutoTag::ErrorResolution);
        }
        if !found_decision && DECISION_PHRASES.iter().any(|p| lower.contains(p)) {
            found_decision = true;
        }
        if !found_milestone && MILESTONE_PHRASES.iter().any(|p| lower.contains(p)) {
            found_milestone = true;
        }
    }

    if found_decision {
        Some(AutoTag::Decision)
    } else if found_milestone {
        Some(AutoTag::Milestone)
    } else {
        None
    }
}

#[derive(Debug, Clone)]
pub struct SessionCheckpoint {
    pub id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub checkpoint_data: serde_json::Value,
    pub token_count: i64,
    pub label: Option<String>,
    pub auto_tag: Option<String>,
    pub is_abnormal_close: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub struct CheckpointStore {
    pool: PgPool,
}

impl CheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_checkpoints (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                checkpoint_data JSONB NOT NULL,
                token_count BIGINT NOT NULL DEFAULT 0,
                label TEXT,
                auto_tag TEXT,
                is_abnormal_close BOOLEAN NOT NULL DEFAULT false,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                expires_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Create a checkpoint, mark it abnormal-close-pending, then cap the
    /// conversation's checkpoint count at 50 (oldest first).
    pub async fn create(
        &self,
        conversation_id: &str,
        user_id: &str,
        messages: &[ContextMessage],
        label: Option<&str>,
        cap: i64,
        expiry_days: i64,
    ) -> anyhow::Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let auto_tag = detect_auto_tag(messages).map(|t| t.as_str().to_string());
        let token_count: i64 = messages.iter().map(|m| m.token_count).sum();
        let checkpoint_data = serde_json::to_value(messages)?;
        let expires_at = Utc::now() + ChronoDuration::days(expiry_days);

        sqlx::query(
            r#"
            INSERT INTO session_checkpoints
                (id, conversation_id, user_id, checkpoint_data, token_count, label, auto_tag, is_abnormal_close, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, true, $8)
            "#,
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(user_id)
        .bind(&checkpoint_data)
        .bind(token_count)
        .bind(label)
        .bind(&auto_tag)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        self.evict_beyond_cap(conversation_id, cap).await?;
        record_checkpoint_created();

        info!(conversation_id, checkpoint_id = %id, auto_tag = ?auto_tag, "created checkpoint");
        Ok(id)
    }

    async fn evict_beyond_cap(&self, conversation_id: &str, cap: i64) -> anyhow::Result<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM session_checkpoints
            WHERE id IN (
                SELECT id FROM session_checkpoints
                WHERE conversation_id = $1
                ORDER BY created_at DESC
                OFFSET $2
            )
            "#,
        )
        .bind(conversation_id)
        .bind(cap)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            info!(
                conversation_id,
                evicted = result.rows_affected(),
                "evicted checkpoints beyond cap"
            );
        }
        Ok(())
    }

    pub async fn list(&self, conversation_id: &str, limit: i64) -> anyhow::Result<Vec<SessionCheckpoint>> {
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, user_id, checkpoint_data, token_count, label, auto_tag,
                   is_abnormal_close, created_at, expires_at
            FROM session_checkpoints
            WHERE conversation_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_checkpoint).collect()
    }

    pub async fn get(&self, checkpoint_id: &str) -> anyhow::Result<Option<SessionCheckpoint>> {
        let row = sqlx::query(
            r#"
            SELECT id, conversation_id, user_id, checkpoint_data, token_count, label, auto_tag,
                   is_abnormal_close, created_at, expires_at
            FROM session_checkpoints
            WHERE id = $1
            "#,
        )
        .bind(checkpoint_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_checkpoint).transpose()
    }

    fn row_to_checkpoint(row: &sqlx::postgres::PgRow) -> anyhow::Result<SessionCheckpoint> {
        Ok(SessionCheckpoint {
            id: row.try_get("id")?,
            conversation_id: row.try_get("conversation_id")?,
            user_id: row.try_get("user_id")?,
            checkpoint_data: row.try_get("checkpoint_data")?,
            token_count: row.try_get("token_count")?,
            label: row.try_get("label")?,
            auto_tag: row.try_get("auto_tag")?,
            is_abnormal_close: row.try_get("is_abnormal_close")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }

    /// Restore the messages snapshotted in a checkpoint, in the same
    /// insert-then-delete order the compaction write path uses.
    pub async fn restore(&self, checkpoint_id: &str) -> anyhow::Result<Vec<ContextMessage>> {
        let checkpoint = self
            .get(checkpoint_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("checkpoint not found: {checkpoint_id}"))?;

        let messages: Vec<ContextMessage> = serde_json::from_value(checkpoint.checkpoint_data)?;

        let mut tx = self.pool.begin().await?;

        let context_id: String = sqlx::query("SELECT id FROM conversation_contexts WHERE conversation_id = $1")
            .bind(&checkpoint.conversation_id)
            .fetch_one(&mut *tx)
            .await?
            .try_get("id")?;

        let original_ids: Vec<String> = sqlx::query("SELECT id FROM context_messages WHERE context_id = $1")
            .bind(&context_id)
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|r| r.try_get::<String, _>("id"))
            .collect::<Result<_, _>>()?;

        for (position, message) in messages.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO context_messages
                    (id, context_id, role, content, token_count, is_protected, position)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&context_id)
            .bind(&message.role)
            .bind(&message.content)
            .bind(message.token_count)
            .bind(message.is_protected)
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }

        for id in &original_ids {
            sqlx::query("DELETE FROM context_messages WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        sqlx::query("UPDATE session_checkpoints SET is_abnormal_close = false WHERE id = $1")
            .bind(checkpoint_id)
            .execute(&self.pool)
            .await?;
        record_checkpoint_restored();

        Ok(messages)
    }

    /// Flip a checkpoint's abnormal-close flag off once a compaction
    /// commits cleanly; it was set on creation as a crash-recovery marker.
    pub async fn acknowledge(&self, checkpoint_id: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE session_checkpoints SET is_abnormal_close = false WHERE id = $1")
            .bind(checkpoint_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Startup scan for checkpoints whose compaction never acknowledged
    /// completion, offered to callers for recovery.
    pub async fn recover_abnormal_checkpoints(&self) -> anyhow::Result<Vec<SessionCheckpoint>> {
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, user_id, checkpoint_data, token_count, label, auto_tag,
                   is_abnormal_close, created_at, expires_at
            FROM session_checkpoints
            WHERE is_abnormal_close = true
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let checkpoints: Vec<SessionCheckpoint> =
            rows.iter().map(Self::row_to_checkpoint).collect::<anyhow::Result<_>>()?;

        if !checkpoints.is_empty() {
            warn!(
                count = checkpoints.len(),
                "found checkpoints pending abnormal-close recovery at startup"
            );
        }
        Ok(checkpoints)
    }

    pub async fn cleanup_expired(&self) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM session_checkpoints WHERE expires_at < now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(role: &str, content: &str) -> ContextMessage {
        ContextMessage {
            id: uuid::Uuid::new_v4().to_string(),
            role: role.to_string(),
            content: content.to_string(),
            token_count: 10,
            is_protected: false,
            position: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn detects_code_tag_from_fence() {
        let messages = vec![message("assistant", "here's the fix:\n```rust\nfn x() {}\n```")];
        assert_eq!(detect_auto_tag(&messages), Some(AutoTag::Code));
    }

    #[test]
    fn detects_error_tag_over_decision_priority() {
        let messages = vec![message("user", "we decided to go with option B"), message("assistant", "Traceback: panic at line 4")];
        assert_eq!(detect_auto_tag(&messages), Some(AutoTag::ErrorResolution));
    }

    #[test]
    fn detects_milestone_tag() {
        let messages = vec![message("assistant", "all tests pass now, ready for review")];
        assert_eq!(detect_auto_tag(&messages), Some(AutoTag::Milestone));
    }

    #[test]
    fn no_tag_when_nothing_matches() {
        let messages = vec![message("user", "what's the weather like")];
        assert_eq!(detect_auto_tag(&messages), None);
    }
}
