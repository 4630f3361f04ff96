// src/compactor/context.rs
// Conversation context window state and the eight-step compaction
// algorithm: lock, snapshot, checkpoint, partition, summarize, replace,
// recompute totals, release.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use crate::compactor::checkpoint::CheckpointStore;
use crate::compactor::locks::CompactionLock;
use crate::compactor::progress::{CompactionStage, ProgressPublisher};
use crate::compactor::tokens::{count_message_tokens, usage_percent, usage_status, UsageStatus};
use crate::config::compactor::CompactorConfig;
use crate::llm::{LlmProvider, Message};
use crate::metrics::record_compaction;

const MIN_MESSAGES_FOR_COMPACTION: usize = 4;
const COOLDOWN_SECONDS: i64 = 30;
const PROTECTED_PREFIXES: &[&str] = &[
    "/system", "/config", "/mode", "/project", "/setup", "/context", "/init", "/persona",
];

const SUMMARY_SYSTEM_PROMPT: &str = "Summarize the following conversation messages into a single \
    concise summary. You must preserve: code snippets verbatim, decisions made, unresolved errors, \
    file paths mentioned, and milestones reached. Respond with only the summary text.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMessage {
    pub id: String,
    pub role: String,
    pub content: String,
    pub token_count: i64,
    pub is_protected: bool,
    pub position: i32,
    pub created_at: DateTime<Utc>,
}

impl ContextMessage {
    fn is_structurally_protected(&self) -> bool {
        self.is_protected
            || self.role == "system"
            || self.position == 0
            || PROTECTED_PREFIXES
                .iter()
                .any(|prefix| self.content.trim_start().starts_with(prefix))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextWindowStatus {
    pub conversation_id: String,
    pub current_tokens: i64,
    pub max_tokens: usize,
    pub usage_percent: f32,
    pub status: String,
    pub next_compaction_estimate: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompactionResult {
    pub success: bool,
    pub reason: Option<String>,
    pub messages_before: usize,
    pub messages_after: usize,
    pub tokens_before: i64,
    pub tokens_after: i64,
    pub checkpoint_id: Option<String>,
}

#[derive(Debug, Default)]
struct CompactionBookkeeping {
    last_compaction_at: std::collections::HashMap<String, DateTime<Utc>>,
}

pub struct CompactorService {
    pool: PgPool,
    lock: CompactionLock,
    progress: ProgressPublisher,
    checkpoints: CheckpointStore,
    llm: Arc<dyn LlmProvider>,
    config: CompactorConfig,
    bookkeeping: RwLock<CompactionBookkeeping>,
}

impl CompactorService {
    pub fn new(
        pool: PgPool,
        lock: CompactionLock,
        progress: ProgressPublisher,
        checkpoints: CheckpointStore,
        llm: Arc<dyn LlmProvider>,
        config: CompactorConfig,
    ) -> Self {
        Self {
            pool,
            lock,
            progress,
            checkpoints,
            llm,
            config,
            bookkeeping: RwLock::new(CompactionBookkeeping::default()),
        }
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Creates `conversation_contexts`/`context_messages` if they don't
    /// already exist. Idempotent, safe to call on every boot.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_contexts (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL UNIQUE,
                total_tokens BIGINT NOT NULL DEFAULT 0,
                last_compaction_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS context_messages (
                id TEXT PRIMARY KEY,
                context_id TEXT NOT NULL REFERENCES conversation_contexts(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                token_count BIGINT NOT NULL,
                is_protected BOOLEAN NOT NULL DEFAULT false,
                position INT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (context_id, position)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn recover_abnormal_checkpoints(&self) -> anyhow::Result<usize> {
        self.migrate().await?;
        self.checkpoints.migrate().await?;
        let pending = self.checkpoints.recover_abnormal_checkpoints().await?;
        Ok(pending.len())
    }

    async fn load_messages(&self, conversation_id: &str) -> anyhow::Result<Vec<ContextMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT m.id, m.role, m.content, m.token_count, m.is_protected, m.position, m.created_at
            FROM context_messages m
            JOIN conversation_contexts c ON c.id = m.context_id
            WHERE c.conversation_id = $1
            ORDER BY m.position ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ContextMessage {
                    id: row.try_get("id")?,
                    role: row.try_get("role")?,
                    content: row.try_get("content")?,
                    token_count: row.try_get("token_count")?,
                    is_protected: row.try_get("is_protected")?,
                    position: row.try_get("position")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    pub async fn status(&self, conversation_id: &str) -> anyhow::Result<ContextWindowStatus> {
        let messages = self.load_messages(conversation_id).await?;
        let current_tokens: i64 = messages.iter().map(|m| m.token_count).sum();
        let percent = usage_percent(current_tokens as usize, self.config.max_tokens);
        let status = usage_status(
            percent,
            self.config.warning_usage_percent,
            self.config.critical_usage_percent,
        );

        let next_compaction_estimate = if status != UsageStatus::Critical {
            let remaining_percent =
                (self.config.compaction_trigger_percent - percent).max(0.0);
            let remaining_tokens =
                (remaining_percent / 100.0) * self.config.max_tokens as f32;
            Some(format!("~{} tokens until compaction", remaining_tokens.round() as i64))
        } else {
            Some("compaction due now".to_string())
        };

        Ok(ContextWindowStatus {
            conversation_id: conversation_id.to_string(),
            current_tokens,
            max_tokens: self.config.max_tokens,
            usage_percent: percent,
            status: status.as_str().to_string(),
            next_compaction_estimate,
        })
    }

    pub async fn record_message(
        &self,
        conversation_id: &str,
        role: &str,
        content: &str,
        is_protected: bool,
    ) -> anyhow::Result<(String, i64, bool)> {
        let token_count = count_message_tokens(role, content) as i64;
        let next_position: i32 = sqlx::query(
            r#"
            SELECT COALESCE(MAX(m.position), -1) + 1 AS next_position
            FROM context_messages m
            JOIN conversation_contexts c ON c.id = m.context_id
            WHERE c.conversation_id = $1
            "#,
        )
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await?
        .try_get("next_position")?;

        let message_id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO context_messages (id, context_id, role, content, token_count, is_protected, position)
            SELECT $1, id, $2, $3, $4, $5, $6 FROM conversation_contexts WHERE conversation_id = $7
            "#,
        )
        .bind(&message_id)
        .bind(role)
        .bind(content)
        .bind(token_count)
        .bind(is_protected)
        .bind(next_position)
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;

        let should_compact = self.should_compact(conversation_id).await.unwrap_or(false);
        Ok((message_id, token_count, should_compact))
    }

    /// All four conditions must hold (spec §4.7 "Token budget").
    pub async fn should_compact(&self, conversation_id: &str) -> anyhow::Result<bool> {
        let messages = self.load_messages(conversation_id).await?;
        if messages.len() < MIN_MESSAGES_FOR_COMPACTION {
            return Ok(false);
        }

        let current_tokens: i64 = messages.iter().map(|m| m.token_count).sum();
        let threshold_tokens =
            (self.config.max_tokens as f32 * self.config.compaction_trigger_percent / 100.0) as i64;
        if current_tokens < threshold_tokens {
            return Ok(false);
        }

        if self.lock.is_held(conversation_id).await {
            return Ok(false);
        }

        let last_compaction = self.bookkeeping.read().last_compaction_at.get(conversation_id).copied();
        if let Some(last) = last_compaction {
            if (Utc::now() - last).num_seconds() < COOLDOWN_SECONDS {
                return Ok(false);
            }
        }

        Ok(true)
    }

    pub async fn compact(
        &self,
        conversation_id: &str,
        user_id: &str,
        trigger: &str,
    ) -> anyhow::Result<CompactionResult> {
        let holder = Uuid::new_v4().to_string();

        if !self
            .lock
            .try_acquire(conversation_id, self.config.lock_ttl_seconds, &holder)
            .await
        {
            return Ok(CompactionResult {
                success: false,
                reason: Some("in_progress".to_string()),
                messages_before: 0,
                messages_after: 0,
                tokens_before: 0,
                tokens_after: 0,
                checkpoint_id: None,
            });
        }

        let result = self.compact_locked(conversation_id, user_id, trigger).await;

        self.lock.release(conversation_id, &holder).await;
        self.bookkeeping
            .write()
            .last_compaction_at
            .insert(conversation_id.to_string(), Utc::now());

        result
    }

    async fn compact_locked(
        &self,
        conversation_id: &str,
        user_id: &str,
        _trigger: &str,
    ) -> anyhow::Result<CompactionResult> {
        let started = std::time::Instant::now();
        self.progress.publish(conversation_id, CompactionStage::Preparing).await;

        self.progress.publish(conversation_id, CompactionStage::Snapshotting).await;
        let messages = self.load_messages(conversation_id).await?;
        let tokens_before: i64 = messages.iter().map(|m| m.token_count).sum();
        let messages_before = messages.len();

        let checkpoint_id = self
            .checkpoints
            .create(
                conversation_id,
                user_id,
                &messages,
                Some("pre_compaction"),
                self.config.checkpoint_cap_per_conversation as i64,
                self.config.checkpoint_expiry_days,
            )
            .await?;

        let (protected, recent, summarizable) = partition_messages(
            messages,
            self.config.protected_recent_messages,
        );

        if summarizable.is_empty() {
            self.progress.publish(conversation_id, CompactionStage::Done).await;
            self.checkpoints.acknowledge(&checkpoint_id).await?;
            return Ok(CompactionResult {
                success: true,
                reason: Some("nothing_to_summarize".to_string()),
                messages_before,
                messages_after: messages_before,
                tokens_before,
                tokens_after: tokens_before,
                checkpoint_id: Some(checkpoint_id),
            });
        }

        self.progress.publish(conversation_id, CompactionStage::Summarizing).await;
        // Anchor the summary at the position the summarized block started, so
        // sorting protected/recent/summary by original position reproduces
        // their relative temporal order instead of always pushing protected
        // messages after the summary.
        let anchor_position = summarizable.iter().map(|m| m.position).min().unwrap_or(0);
        let mut summary_message = self.summarize(&summarizable).await?;
        summary_message.position = anchor_position;

        self.progress.publish(conversation_id, CompactionStage::Writing).await;
        let mut surviving = Vec::with_capacity(protected.len() + recent.len() + 1);
        surviving.extend(protected);
        surviving.extend(recent);
        surviving.push(summary_message);
        surviving.sort_by_key(|m| m.position);

        self.replace_messages(conversation_id, &surviving).await?;

        let tokens_after: i64 = surviving.iter().map(|m| m.token_count).sum();
        let messages_after = surviving.len();

        sqlx::query(
            "UPDATE conversation_contexts SET total_tokens = $1, last_compaction_at = now() WHERE conversation_id = $2",
        )
        .bind(tokens_after)
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;

        self.checkpoints.acknowledge(&checkpoint_id).await?;
        self.progress.publish(conversation_id, CompactionStage::Done).await;

        record_compaction(started.elapsed().as_secs_f64(), tokens_before, tokens_after);
        info!(conversation_id, tokens_before, tokens_after, "compaction complete");

        Ok(CompactionResult {
            success: true,
            reason: None,
            messages_before,
            messages_after,
            tokens_before,
            tokens_after,
            checkpoint_id: Some(checkpoint_id),
        })
    }

    async fn summarize(&self, messages: &[ContextMessage]) -> anyhow::Result<ContextMessage> {
        let serialized = messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");

        let response = self
            .llm
            .chat(vec![Message::user(serialized)], SUMMARY_SYSTEM_PROMPT.to_string())
            .await?;

        Ok(ContextMessage {
            id: Uuid::new_v4().to_string(),
            role: "assistant".to_string(),
            content: response.content,
            token_count: count_message_tokens("assistant", &response.content.clone()) as i64,
            is_protected: false,
            position: 0,
            created_at: Utc::now(),
        })
    }

    /// Insert the surviving rows with fresh contiguous positions, then
    /// delete the originals, so a mid-failure never loses data.
    async fn replace_messages(&self, conversation_id: &str, surviving: &[ContextMessage]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        let context_id: String = sqlx::query("SELECT id FROM conversation_contexts WHERE conversation_id = $1")
            .bind(conversation_id)
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

        for (position, message) in surviving.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO context_messages (id, context_id, role, content, token_count, is_protected, position)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
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
        Ok(())
    }
}

/// Partition into protected / recent / summarizable, per spec §4.7 step 4.
/// `recent` takes the last `preserve_recent` messages by position that
/// aren't already protected; everything else summarizable.
fn partition_messages(
    messages: Vec<ContextMessage>,
    preserve_recent: usize,
) -> (Vec<ContextMessage>, Vec<ContextMessage>, Vec<ContextMessage>) {
    let mut protected = Vec::new();
    let mut remainder = Vec::new();

    for message in messages {
        if message.is_structurally_protected() {
            protected.push(message);
        } else {
            remainder.push(message);
        }
    }

    let recent_start = remainder.len().saturating_sub(preserve_recent);
    let summarizable = remainder.drain(..recent_start).collect();
    let recent = remainder;

    (protected, recent, summarizable)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(position: i32, role: &str, content: &str, is_protected: bool) -> ContextMessage {
        ContextMessage {
            id: Uuid::new_v4().to_string(),
            role: role.to_string(),
            content: content.to_string(),
            token_count: 10,
            is_protected,
            position,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn system_message_is_always_protected() {
        let messages = vec![message(0, "system", "you are a helpful assistant", false)];
        let (protected, recent, summarizable) = partition_messages(messages, 2);
        assert_eq!(protected.len(), 1);
        assert!(recent.is_empty());
        assert!(summarizable.is_empty());
    }

    #[test]
    fn first_position_is_always_protected_regardless_of_role() {
        let messages = vec![message(0, "user", "hello", false)];
        let (protected, _, _) = partition_messages(messages, 2);
        assert_eq!(protected.len(), 1);
    }

    #[test]
    fn slash_command_prefix_is_protected() {
        let messages = vec![message(3, "user", "/system set mode strict", false)];
        let (protected, _, _) = partition_messages(messages, 0);
        assert_eq!(protected.len(), 1);
    }

    #[test]
    fn recent_keeps_last_n_by_position() {
        let messages = vec![
            message(0, "system", "sys", false),
            message(1, "user", "a", false),
            message(2, "assistant", "b", false),
            message(3, "user", "c", false),
        ];
        let (protected, recent, summarizable) = partition_messages(messages, 2);
        assert_eq!(protected.len(), 1);
        assert_eq!(recent.len(), 2);
        assert_eq!(summarizable.len(), 1);
        assert_eq!(recent[0].position, 2);
        assert_eq!(recent[1].position, 3);
    }

    /// Scenario S5: system message at position 0 must survive ahead of the
    /// summary, not after it, even though protected messages are collected
    /// before the summary exists.
    #[test]
    fn surviving_order_anchors_summary_at_summarized_block_position() {
        let messages = vec![
            message(0, "system", "you are helpful", false),
            message(1, "user", "what's 2+2?", false),
            message(2, "assistant", "4", false),
            message(3, "user", "thanks", false),
            message(4, "assistant", "welcome", false),
        ];
        let (protected, recent, summarizable) = partition_messages(messages, 1);
        assert_eq!(protected.len(), 1);
        assert_eq!(recent.len(), 1);
        assert_eq!(summarizable.len(), 3);

        let anchor_position = summarizable.iter().map(|m| m.position).min().unwrap();
        let mut summary = message(anchor_position, "assistant", "summary", false);
        summary.position = anchor_position;

        let mut surviving = Vec::new();
        surviving.extend(protected);
        surviving.extend(recent);
        surviving.push(summary);
        surviving.sort_by_key(|m| m.position);

        assert_eq!(surviving[0].role, "system");
        assert_eq!(surviving[1].content, "summary");
        assert_eq!(surviving[2].role, "assistant");
        assert_eq!(surviving[2].content, "welcome");
    }
}
