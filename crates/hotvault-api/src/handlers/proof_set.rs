use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use bytes::Bytes;
use hotvault_core::AppError;
use serde::{Deserialize, Serialize};

use crate::auth::Principal;
use crate::error::HttpAppError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CreateProofSetRequest {
    #[serde(default)]
    pub extra_data: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProofSetIdResponse {
    pub proof_set_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProofSetCreationAccepted {
    pub status: String,
    pub transaction_hash: String,
}

/// Submit proof-set creation and keep waiting for confirmation in the background.
///
/// The body is optional; when present it is `{"extra_data": "0x..."}`.
#[tracing::instrument(skip(state, body), fields(user_id = principal.user_id))]
pub async fn create_proof_set(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    body: Bytes,
) -> Result<impl IntoResponse, HttpAppError> {
    let request: CreateProofSetRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateProofSetRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::InvalidInput(format!("Invalid request body: {}", e)))?
    };

    let proof_set = state
        .provisioner
        .start(principal.user_id, request.extra_data.as_deref())
        .await?;

    let provisioner = state.provisioner.clone();
    let owner_id = principal.user_id;
    let tx_hash = proof_set.transaction_hash.clone();
    tokio::spawn(async move {
        match provisioner.await_creation(owner_id, &tx_hash).await {
            Ok(proof_set_id) => {
                tracing::info!(owner_id, proof_set_id = %proof_set_id, "Proof set provisioned");
            }
            Err(e) => {
                tracing::error!(owner_id, tx_hash = %tx_hash, error = %e, "Proof set provisioning failed");
            }
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(ProofSetCreationAccepted {
            status: "pending".to_string(),
            transaction_hash: proof_set.transaction_hash,
        }),
    ))
}

/// The caller's remote proof-set id. 409 while creation is still being confirmed.
pub async fn get_proof_set_id(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<ProofSetIdResponse>, HttpAppError> {
    let proof_set = state.pieces.provisioned_proof_set(principal.user_id).await?;
    Ok(Json(ProofSetIdResponse {
        proof_set_id: proof_set.proof_set_id,
    }))
}
