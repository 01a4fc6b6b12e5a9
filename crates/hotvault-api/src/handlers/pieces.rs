//! Published piece queries and root removal.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use hotvault_core::models::{Piece, RootRemoval};
use serde::{Deserialize, Serialize};

use crate::auth::Principal;
use crate::error::{HttpAppError, ValidatedJson};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RemoveRootRequest {
    pub piece_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveRootResponse {
    pub message: String,
    #[serde(flatten)]
    pub removal: RootRemoval,
}

pub async fn list_pieces(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<Vec<Piece>>, HttpAppError> {
    Ok(Json(state.pieces.list(principal.user_id).await?))
}

pub async fn get_piece(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(piece_id): Path<i64>,
) -> Result<Json<Piece>, HttpAppError> {
    Ok(Json(state.pieces.get(principal.user_id, piece_id).await?))
}

pub async fn get_piece_by_cid(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(cid): Path<String>,
) -> Result<Json<Piece>, HttpAppError> {
    Ok(Json(state.pieces.get_by_cid(principal.user_id, &cid).await?))
}

/// Drop the piece's root from its proof set and delete the piece record.
#[tracing::instrument(
    skip(state, request),
    fields(user_id = principal.user_id, piece_id = request.piece_id)
)]
pub async fn remove_root(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    ValidatedJson(request): ValidatedJson<RemoveRootRequest>,
) -> Result<Json<RemoveRootResponse>, HttpAppError> {
    let removal = state
        .pieces
        .remove_root(principal.user_id, request.piece_id)
        .await?;

    Ok(Json(RemoveRootResponse {
        message: "Root removed and piece deleted".to_string(),
        removal,
    }))
}
