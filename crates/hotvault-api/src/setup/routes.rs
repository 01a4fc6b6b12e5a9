//! Route configuration and setup

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::Method,
    routing::{get, post, put},
    Router,
};
use hotvault_core::Config;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::auth::principal_middleware;
use crate::handlers;
use crate::state::AppState;

pub const API_PREFIX: &str = "/api/v1";

/// Multipart framing on top of the largest accepted file.
const BODY_LIMIT_OVERHEAD: u64 = 1024 * 1024;

/// Setup all application routes
pub fn setup_routes(config: &Config, state: Arc<AppState>) -> Router {
    let body_limit = config
        .pipeline
        .max_upload_size_bytes
        .saturating_add(BODY_LIMIT_OVERHEAD);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);
    let chunk_limit =
        usize::try_from(config.pipeline.max_chunk_size_bytes).unwrap_or(usize::MAX);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .merge(protected_routes(chunk_limit))
        .layer(axum::middleware::from_fn(principal_middleware))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(setup_cors())
        .with_state(state)
}

fn protected_routes(chunk_limit: usize) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            &format!("{}/upload", API_PREFIX),
            post(handlers::upload::upload_file),
        )
        .route(
            &format!("{}/upload/status/{{job_id}}", API_PREFIX),
            get(handlers::upload::get_upload_status),
        )
        .route(
            &format!("{}/upload/chunked/init", API_PREFIX),
            post(handlers::chunked_upload::init_chunked_upload),
        )
        .route(
            &format!("{}/upload/chunked/{{upload_id}}/chunks/{{index}}", API_PREFIX),
            put(handlers::chunked_upload::upload_chunk)
                .layer(DefaultBodyLimit::max(chunk_limit)),
        )
        .route(
            &format!("{}/upload/chunked/{{upload_id}}/complete", API_PREFIX),
            post(handlers::chunked_upload::complete_chunked_upload),
        )
        .route(
            &format!("{}/upload/chunked/{{upload_id}}/status", API_PREFIX),
            get(handlers::chunked_upload::get_chunked_upload_status),
        )
        .route(
            &format!("{}/proof-set", API_PREFIX),
            get(handlers::proof_set::get_proof_set_id)
                .post(handlers::proof_set::create_proof_set),
        )
        .route(
            &format!("{}/pieces", API_PREFIX),
            get(handlers::pieces::list_pieces),
        )
        .route(
            &format!("{}/pieces/{{piece_id}}", API_PREFIX),
            get(handlers::pieces::get_piece),
        )
        .route(
            &format!("{}/pieces/cid/{{cid}}", API_PREFIX),
            get(handlers::pieces::get_piece_by_cid),
        )
        .route(
            &format!("{}/roots/remove", API_PREFIX),
            post(handlers::pieces::remove_root),
        )
        .route(
            &format!("{}/download/{{cid}}", API_PREFIX),
            get(handlers::download::download_piece),
        )
}

fn setup_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any)
}
