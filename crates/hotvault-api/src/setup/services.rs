//! Service wiring and background sweeps

use std::sync::Arc;

use hotvault_core::{Clock, Config};
use hotvault_db::PieceStore;
use hotvault_pdp::{PdpTool, ToolRunner};
use hotvault_processing::{
    spawn_sweep, ChunkedUploadManager, InMemoryJobRegistry, JobEvictionSweep, JobRegistry,
    PieceService, ProofSetProvisioner, UploadPipeline,
};
use tokio::task::JoinHandle;

use crate::state::AppState;

/// Build the pipeline, chunked upload manager, provisioner and piece service over the
/// given backends.
pub fn initialize_services(
    config: &Config,
    store: Arc<dyn PieceStore>,
    runner: Arc<dyn ToolRunner>,
    clock: Arc<dyn Clock>,
) -> Arc<AppState> {
    let registry: Arc<dyn JobRegistry> = Arc::new(InMemoryJobRegistry::new(clock.clone()));
    let tool = PdpTool::new(runner, &config.tool);

    let provisioner = Arc::new(ProofSetProvisioner::new(
        store.clone(),
        tool.clone(),
        &config.tool,
        &config.pipeline,
    ));
    let pieces = Arc::new(PieceService::new(
        store.clone(),
        tool.clone(),
        &config.pipeline,
    ));
    let pipeline = Arc::new(UploadPipeline::new(
        registry.clone(),
        store,
        tool,
        config.pipeline.clone(),
        clock,
    ));
    let chunked = Arc::new(ChunkedUploadManager::new(
        pipeline.clone(),
        &config.retention,
    ));

    tracing::info!(
        staging_dir = %config.pipeline.staging_dir.display(),
        pdptool = %config.tool.pdptool_path.display(),
        "Upload services initialized"
    );

    Arc::new(AppState {
        config: config.clone(),
        pipeline,
        chunked,
        provisioner,
        pieces,
        registry,
    })
}

/// Start one sweep task per resource class.
pub fn spawn_sweeps(state: &AppState) -> Vec<JoinHandle<()>> {
    let clock = state.pipeline.clock().clone();
    let retention = &state.config.retention;

    vec![
        spawn_sweep(
            Arc::new(JobEvictionSweep::new(
                state.registry.clone(),
                retention.job_retention,
            )),
            clock.clone(),
            retention.job_sweep_interval,
        ),
        spawn_sweep(
            state.chunked.clone(),
            clock,
            retention.chunked_sweep_interval,
        ),
    ]
}
