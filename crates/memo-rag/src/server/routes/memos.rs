//! Memo ingestion and deletion endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::types::{DeleteMemoResponse, IngestMemoRequest, IngestMemoResponse};

use super::{ApiJson, Identity};

const MAX_MEMO_ID_LEN: usize = 128;

fn validate_memo_id(memo_id: &str) -> Result<()> {
    let valid_chars = memo_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if memo_id.is_empty() || memo_id.len() > MAX_MEMO_ID_LEN || !valid_chars {
        return Err(Error::validation(format!(
            "memoId must be 1-{} characters of letters, digits, '-', '_' or '.'",
            MAX_MEMO_ID_LEN
        )));
    }
    Ok(())
}

/// POST /api/memos - Chunk, embed, and store a memo transcript
pub async fn ingest_memo(
    State(state): State<AppState>,
    Identity(identity): Identity,
    ApiJson(request): ApiJson<IngestMemoRequest>,
) -> Result<(StatusCode, Json<IngestMemoResponse>)> {
    let memo_id = match request.memo_id {
        Some(id) => id.trim().to_string(),
        None => Uuid::new_v4().to_string(),
    };
    validate_memo_id(&memo_id)?;

    let chunks = state
        .ingestor()
        .ingest(&identity, &memo_id, &request.transcript)
        .await?;

    Ok((StatusCode::CREATED, Json(IngestMemoResponse { memo_id, chunks })))
}

/// DELETE /api/memos/:id - Soft-delete a memo
pub async fn delete_memo(
    State(state): State<AppState>,
    Identity(identity): Identity,
    Path(memo_id): Path<String>,
) -> Result<Json<DeleteMemoResponse>> {
    validate_memo_id(&memo_id)?;

    let chunks_deleted = state.ingestor().delete(&identity, &memo_id).await?;

    Ok(Json(DeleteMemoResponse {
        memo_id,
        chunks_deleted,
    }))
}
