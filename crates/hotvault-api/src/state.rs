use std::sync::Arc;

use hotvault_core::Config;
use hotvault_processing::{
    ChunkedUploadManager, JobRegistry, PieceService, ProofSetProvisioner, UploadPipeline,
};

/// Shared handles passed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pipeline: Arc<UploadPipeline>,
    pub chunked: Arc<ChunkedUploadManager>,
    pub provisioner: Arc<ProofSetProvisioner>,
    pub pieces: Arc<PieceService>,
    pub registry: Arc<dyn JobRegistry>,
}
