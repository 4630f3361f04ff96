// src/api/http/context.rs
// Chat/context API: context window status, message ingestion and
// compaction.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::compactor::{CompactionResult, ContextWindowStatus};
use crate::error::{RagCoreError, RagResult};
use crate::state::AppState;

/// GET /context-window/{conversation_id}
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
) -> RagResult<Json<ContextWindowStatus>> {
    let status = state
        .compactor
        .status(&conversation_id)
        .await
        .map_err(|e| RagCoreError::Unavailable(e.to_string()))?;
    Ok(Json(status))
}

#[derive(Debug, Deserialize)]
pub struct AddMessageRequest {
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub is_protected: bool,
}

#[derive(Debug, Serialize)]
pub struct AddMessageResponse {
    pub message_id: String,
    pub token_count: i64,
    pub context_status: ContextWindowStatus,
    pub compaction_triggered: bool,
}

/// POST /context-window/{conversation_id}/messages
pub async fn add_message(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    Json(request): Json<AddMessageRequest>,
) -> RagResult<Json<AddMessageResponse>> {
    if request.content.trim().is_empty() {
        return Err(RagCoreError::InvalidInput("content must not be empty".to_string()));
    }

    let (message_id, token_count, compaction_triggered) = state
        .compactor
        .record_message(&conversation_id, &request.role, &request.content, request.is_protected)
        .await
        .map_err(|e| RagCoreError::Unavailable(e.to_string()))?;

    let context_status = state
        .compactor
        .status(&conversation_id)
        .await
        .map_err(|e| RagCoreError::Unavailable(e.to_string()))?;

    Ok(Json(AddMessageResponse {
        message_id,
        token_count,
        context_status,
        compaction_triggered,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CompactRequest {
    pub trigger: String,
}

/// POST /context-window/{conversation_id}/compact
///
/// Progress is published to `progress:<conversation_id>` as the operation
/// runs; this handler returns the final `CompactionResult` once complete.
/// A caller wanting live progress polls `GET /context-window/{id}` or reads
/// the progress key directly rather than holding this request open.
pub async fn compact(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    Json(request): Json<CompactRequest>,
) -> RagResult<Json<CompactionResult>> {
    let user_id = conversation_id.clone();
    let result = state
        .compactor
        .compact(&conversation_id, &user_id, &request.trigger)
        .await
        .map_err(|e| RagCoreError::Unavailable(e.to_string()))?;
    Ok(Json(result))
}
