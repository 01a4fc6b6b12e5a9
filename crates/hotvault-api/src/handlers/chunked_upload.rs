//! Chunked upload handlers for files too large for one request.
//!
//! The client declares the file geometry, sends each chunk as a raw body in any
//! order, then asks for completion. Assembly and publication run in the background
//! and report through the regular job status endpoint.

use std::sync::Arc;

use axum::{
    extract::{rejection::BytesRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use hotvault_core::models::{
    ChunkReceipt, ChunkedUploadSnapshot, InitiateChunkedUpload, UploadStage,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Principal;
use crate::error::{HttpAppError, ValidatedJson};
use crate::handlers::upload::JobAccepted;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct InitChunkedUploadResponse {
    pub upload_id: Uuid,
    pub total_chunks: u32,
}

#[tracing::instrument(skip(state, request), fields(user_id = principal.user_id))]
pub async fn init_chunked_upload(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    ValidatedJson(request): ValidatedJson<InitiateChunkedUpload>,
) -> Result<impl IntoResponse, HttpAppError> {
    let total_chunks = request.total_chunks;
    let upload_id = state.chunked.initiate(principal.user_id, request).await?;

    Ok((
        StatusCode::CREATED,
        Json(InitChunkedUploadResponse {
            upload_id,
            total_chunks,
        }),
    ))
}

/// Store one chunk. The route caps the body at `MAX_CHUNK_SIZE_MB`.
pub async fn upload_chunk(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path((upload_id, index)): Path<(Uuid, u32)>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<ChunkReceipt>, HttpAppError> {
    let body = body?;
    let receipt = state
        .chunked
        .accept_chunk(upload_id, principal.user_id, index, body)
        .await?;
    Ok(Json(receipt))
}

#[tracing::instrument(skip(state), fields(user_id = principal.user_id))]
pub async fn complete_chunked_upload(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(upload_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpAppError> {
    let job_id = state.chunked.complete(upload_id, principal.user_id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(JobAccepted {
            job_id,
            status: UploadStage::Uploading,
        }),
    ))
}

pub async fn get_chunked_upload_status(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(upload_id): Path<Uuid>,
) -> Result<Json<ChunkedUploadSnapshot>, HttpAppError> {
    let snapshot = state.chunked.status(upload_id, principal.user_id).await?;
    Ok(Json(snapshot))
}
