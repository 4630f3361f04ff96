// src/error.rs
// Error taxonomy shared across every component (spec error taxonomy in full spec).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Kinds of failure a component can surface. Every component maps its internal
/// errors onto one of these so callers (and HTTP handlers) can react by kind
/// rather than by matching error strings.
#[derive(thiserror::Error, Debug)]
pub enum RagCoreError {
    /// A dependency (Redis, Postgres, an LLM provider, the reranker) did not
    /// respond. Callers should degrade (treat as a cache miss, skip a search
    /// method) rather than fail the whole request.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The caller supplied something structurally wrong (empty query, weights
    /// that don't sum to 1.0, a negative budget).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The referenced entity (conversation, checkpoint, chunk) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The requested operation conflicts with current state (e.g. a
    /// compaction already in progress for this conversation).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Stored data failed an invariant check on read (non-contiguous
    /// positions, a checkpoint whose payload doesn't deserialize).
    #[error("corruption: {0}")]
    Corruption(String),

    /// Startup-time failure that should prevent the process from serving
    /// traffic at all (bad config, unreachable primary database).
    #[error("fatal: {0}")]
    Fatal(String),
}

pub type RagResult<T> = Result<T, RagCoreError>;

impl RagCoreError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RagCoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RagCoreError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RagCoreError::NotFound(_) => StatusCode::NOT_FOUND,
            RagCoreError::Conflict(_) => StatusCode::CONFLICT,
            RagCoreError::Corruption(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RagCoreError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RagCoreError::Unavailable(_) => "unavailable",
            RagCoreError::InvalidInput(_) => "invalid_input",
            RagCoreError::NotFound(_) => "not_found",
            RagCoreError::Conflict(_) => "conflict",
            RagCoreError::Corruption(_) => "corruption",
            RagCoreError::Fatal(_) => "fatal",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

impl IntoResponse for RagCoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let kind = self.kind();
        let body = ErrorBody {
            error: self.to_string(),
            kind,
        };
        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for RagCoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => RagCoreError::NotFound("row not found".to_string()),
            other => RagCoreError::Unavailable(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for RagCoreError {
    fn from(e: redis::RedisError) -> Self {
        RagCoreError::Unavailable(e.to_string())
    }
}
