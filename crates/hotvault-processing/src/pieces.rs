//! Queries and follow-up operations on published pieces.
//!
//! Everything here is scoped to the calling owner. Removing a root and downloading a
//! piece both go through `pdptool`, like publication does.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use hotvault_core::models::{Piece, ProofSet, RootRemoval};
use hotvault_core::{AppError, PipelineConfig};
use hotvault_db::PieceStore;
use hotvault_pdp::PdpTool;
use tempfile::TempDir;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use crate::staging::sanitize_filename;

/// File handed to `download-file` listing the CIDs to fetch.
pub const CHUNK_LIST_FILE: &str = "chunks.txt";

const DOWNLOADS_DIR: &str = "downloads";
const OUTPUT_FILE: &str = "piece.out";
const FALLBACK_FILENAME: &str = "download.bin";

pub struct PieceService {
    store: Arc<dyn PieceStore>,
    tool: PdpTool,
    staging_dir: PathBuf,
    remove_timeout: Duration,
    download_timeout: Duration,
}

/// A fetched piece, read from a scratch directory that lives as long as the value
/// (or the stream made from it). `filename` is safe to put in a header.
pub struct Download {
    pub piece: Piece,
    pub filename: String,
    pub size: u64,
    file: File,
    workdir: TempDir,
}

impl Download {
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        let workdir = self.workdir;
        ReaderStream::new(self.file).map(move |chunk| {
            let _scratch = &workdir;
            chunk
        })
    }
}

impl PieceService {
    pub fn new(store: Arc<dyn PieceStore>, tool: PdpTool, config: &PipelineConfig) -> Self {
        Self {
            store,
            tool,
            staging_dir: config.staging_dir.clone(),
            remove_timeout: config.remove_timeout,
            download_timeout: config.download_timeout,
        }
    }

    pub async fn list(&self, owner_id: i64) -> Result<Vec<Piece>, AppError> {
        self.store.list_pieces(owner_id).await
    }

    pub async fn get(&self, owner_id: i64, piece_id: i64) -> Result<Piece, AppError> {
        self.store
            .find_piece(owner_id, piece_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Piece {} not found", piece_id)))
    }

    pub async fn get_by_cid(&self, owner_id: i64, cid: &str) -> Result<Piece, AppError> {
        self.store
            .find_piece_by_cid(owner_id, cid)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No piece with CID {}", cid)))
    }

    /// The owner's proof set once it has a remote id.
    pub async fn provisioned_proof_set(&self, owner_id: i64) -> Result<ProofSet, AppError> {
        let proof_set = self
            .store
            .find_proof_set(owner_id)
            .await?
            .ok_or_else(|| AppError::NotFound("No proof set for this account".to_string()))?;
        if !proof_set.is_provisioned() {
            return Err(AppError::PendingProvisioning(
                "Proof set creation is still being confirmed".to_string(),
            ));
        }
        Ok(proof_set)
    }

    /// Remove the piece's root from its proof set, then forget the piece.
    ///
    /// The record is only deleted after `remove-roots` succeeded. A failed delete at that
    /// point is reported as [`AppError::Persistence`].
    #[tracing::instrument(skip(self))]
    pub async fn remove_root(&self, owner_id: i64, piece_id: i64) -> Result<RootRemoval, AppError> {
        let piece = self.get(owner_id, piece_id).await?;
        if piece.root_id.trim().parse::<u64>().is_err() {
            return Err(AppError::InvalidInput(format!(
                "Piece {} has no numeric root id (stored {:?})",
                piece_id, piece.root_id
            )));
        }

        let proof_set = self.provisioned_proof_set(owner_id).await?;
        if proof_set.id != piece.proof_set_id {
            return Err(AppError::NotFound(format!(
                "Proof set for piece {} no longer exists",
                piece_id
            )));
        }

        let root_id = piece.root_id.trim().to_string();
        let output = self
            .tool
            .remove_roots(
                &piece.service_url,
                &piece.service_name,
                &proof_set.proof_set_id,
                &root_id,
                self.remove_timeout,
            )
            .await?;
        tracing::info!(proof_set_id = %proof_set.proof_set_id, root_id = %root_id, "Root removed");

        match self.store.delete_piece(owner_id, piece_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!("Piece record was already gone after root removal");
            }
            Err(e) => {
                tracing::error!(error = %e, "Root removed but the piece record was not deleted");
                return Err(AppError::Persistence(format!(
                    "root {} removed from proof set {} but piece {} was not deleted: {}",
                    root_id, proof_set.proof_set_id, piece_id, e
                )));
            }
        }

        Ok(RootRemoval {
            piece_id,
            proof_set_id: proof_set.proof_set_id,
            root_id,
            output: output.stdout.trim().to_string(),
        })
    }

    /// Fetch a piece through `pdptool download-file` into a scratch directory.
    ///
    /// The chunk list holds the base CID, without the `:sub` suffix.
    #[tracing::instrument(skip(self))]
    pub async fn download(&self, owner_id: i64, cid: &str) -> Result<Download, AppError> {
        let piece = self.get_by_cid(owner_id, cid).await?;
        let filename = sanitize_filename(&piece.filename)
            .unwrap_or_else(|_| FALLBACK_FILENAME.to_string());
        let base_cid = piece.cid.split_once(':').map_or(piece.cid.as_str(), |(base, _)| base);

        let parent = self.staging_dir.join(DOWNLOADS_DIR);
        tokio::fs::create_dir_all(&parent).await?;
        let workdir = tempfile::Builder::new()
            .prefix("download-")
            .tempdir_in(&parent)?;

        let chunk_file = workdir.path().join(CHUNK_LIST_FILE);
        tokio::fs::write(&chunk_file, base_cid).await?;
        let output_file = workdir.path().join(OUTPUT_FILE);

        self.tool
            .download_file(
                &piece.service_url,
                &chunk_file,
                &output_file,
                self.download_timeout,
            )
            .await?;

        let file = File::open(&output_file).await.map_err(|e| {
            AppError::Internal(format!("download-file produced no output file: {}", e))
        })?;
        let size = file.metadata().await?.len();
        tracing::debug!(size, "Piece downloaded");

        Ok(Download {
            piece,
            filename,
            size,
            file,
            workdir,
        })
    }
}
