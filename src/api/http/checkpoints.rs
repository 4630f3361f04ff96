// src/api/http/checkpoints.rs
// Checkpoint listing and restore.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use crate::compactor::{ContextMessage, SessionCheckpoint};
use crate::error::{RagCoreError, RagResult};
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: i64 = 50;

#[derive(Debug, Serialize)]
pub struct CheckpointSummary {
    pub id: String,
    pub label: Option<String>,
    pub auto_tag: Option<String>,
    pub token_count: i64,
    pub is_abnormal_close: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<SessionCheckpoint> for CheckpointSummary {
    fn from(checkpoint: SessionCheckpoint) -> Self {
        Self {
            id: checkpoint.id,
            label: checkpoint.label,
            auto_tag: checkpoint.auto_tag,
            token_count: checkpoint.token_count,
            is_abnormal_close: checkpoint.is_abnormal_close,
            created_at: checkpoint.created_at,
        }
    }
}

/// GET /checkpoints/{conversation_id}
pub async fn list_checkpoints(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
) -> RagResult<Json<Vec<CheckpointSummary>>> {
    let checkpoints = state
        .compactor
        .checkpoints()
        .list(&conversation_id, DEFAULT_LIST_LIMIT)
        .await
        .map_err(|e| RagCoreError::Unavailable(e.to_string()))?;

    Ok(Json(checkpoints.into_iter().map(CheckpointSummary::from).collect()))
}

#[derive(Debug, Serialize)]
pub struct RestoreResponse {
    pub checkpoint_id: String,
    pub messages_restored: usize,
}

/// POST /checkpoints/{conversation_id}/restore/{checkpoint_id}
pub async fn restore_checkpoint(
    State(state): State<Arc<AppState>>,
    Path((_conversation_id, checkpoint_id)): Path<(String, String)>,
) -> RagResult<Json<RestoreResponse>> {
    let restored: Vec<ContextMessage> = state
        .compactor
        .checkpoints()
        .restore(&checkpoint_id)
        .await
        .map_err(|e| RagCoreError::Unavailable(e.to_string()))?;

    Ok(Json(RestoreResponse {
        checkpoint_id,
        messages_restored: restored.len(),
    }))
}
