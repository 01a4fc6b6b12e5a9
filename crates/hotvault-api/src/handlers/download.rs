use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, Response, StatusCode},
};
use hotvault_core::AppError;

use crate::auth::Principal;
use crate::error::HttpAppError;
use crate::state::AppState;

/// Stream a piece fetched back from the storage service as an attachment.
#[tracing::instrument(skip(state), fields(user_id = principal.user_id))]
pub async fn download_piece(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(cid): Path<String>,
) -> Result<Response<Body>, HttpAppError> {
    let download = state.pieces.download(principal.user_id, &cid).await?;

    let content_disposition = format!(
        "attachment; filename=\"{}\"",
        download.filename.replace('"', "\\\"")
    );
    let size = download.size.to_string();

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, size)
        .header(header::CONTENT_DISPOSITION, content_disposition.as_str())
        .header(
            header::CACHE_CONTROL,
            "private, no-cache, no-store, must-revalidate",
        )
        .body(Body::from_stream(download.into_stream()))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))?;

    Ok(response)
}
