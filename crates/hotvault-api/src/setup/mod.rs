//! Application setup and initialization

pub mod database;
pub mod routes;
pub mod server;
pub mod services;

use std::sync::Arc;

use anyhow::{Context, Result};
use hotvault_core::{Config, SystemClock};
use hotvault_pdp::CommandRunner;
use tokio::task::JoinHandle;

use crate::state::AppState;

/// Initialize the entire application.
///
/// Returns the shared state, the router and the handles of the background sweeps.
pub async fn initialize_app(
    config: Config,
) -> Result<(Arc<AppState>, axum::Router, Vec<JoinHandle<()>>)> {
    // Fail fast on misconfiguration
    config.validate().context("Configuration validation failed")?;
    tracing::info!("Configuration loaded and validated successfully");

    tokio::fs::create_dir_all(&config.pipeline.staging_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create staging directory {}",
                config.pipeline.staging_dir.display()
            )
        })?;

    let store = database::setup_store(&config).await?;

    let state = services::initialize_services(
        &config,
        store,
        Arc::new(CommandRunner),
        Arc::new(SystemClock),
    );
    let sweeps = services::spawn_sweeps(&state);

    let router = routes::setup_routes(&config, state.clone());

    Ok((state, router, sweeps))
}
