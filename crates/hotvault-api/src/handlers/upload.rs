//! Direct single-request uploads and job status.

use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use hotvault_core::models::{JobStatus, UploadStage};
use hotvault_core::AppError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Principal;
use crate::error::HttpAppError;
use crate::state::AppState;

/// Returned when a job has been accepted for background processing.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobAccepted {
    pub job_id: Uuid,
    pub status: UploadStage,
}

/// Pull the single `file` field out of a multipart body.
async fn read_file_field(mut multipart: Multipart) -> Result<(Bytes, String), AppError> {
    let mut file_data: Option<Bytes> = None;
    let mut filename: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidInput(format!("Failed to read multipart: {}", e)))?
    {
        let field_name = field.name().map(|s| s.to_string()).unwrap_or_default();

        if field_name == "file" {
            if file_data.is_some() {
                return Err(AppError::InvalidInput(
                    "Multiple file fields are not allowed; send exactly one field named 'file'"
                        .to_string(),
                ));
            }
            filename = field.file_name().map(|s: &str| s.to_string());

            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::InvalidInput(format!("Failed to read file data: {}", e)))?;
            file_data = Some(data);
        }
    }

    let file_data =
        file_data.ok_or_else(|| AppError::InvalidInput("No file provided".to_string()))?;
    let filename = filename.unwrap_or_else(|| "upload.bin".to_string());

    Ok((file_data, filename))
}

#[tracing::instrument(skip(state, multipart), fields(user_id = principal.user_id))]
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    multipart: Multipart,
) -> Result<impl IntoResponse, HttpAppError> {
    let (data, filename) = read_file_field(multipart).await?;

    let job_id = state
        .pipeline
        .submit(principal.user_id, &filename, data)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(JobAccepted {
            job_id,
            status: UploadStage::Uploading,
        }),
    ))
}

pub async fn get_upload_status(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatus>, HttpAppError> {
    let status = state.pipeline.job_status(job_id, principal.user_id).await?;
    Ok(Json(status))
}
