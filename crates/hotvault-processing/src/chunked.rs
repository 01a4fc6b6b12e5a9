//! Chunked uploads.
//!
//! Large files arrive as numbered chunks in any order. Each chunk is written to the
//! upload's private staging directory; once every index is present the chunks are
//! concatenated in index order and the result is handed to the [`UploadPipeline`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hotvault_core::models::{
    ChunkReceipt, ChunkedUploadSnapshot, ChunkedUploadStatus, InitiateChunkedUpload, JobError,
    JobErrorKind, JobUpdate,
};
use hotvault_core::{AppError, Clock, RetentionConfig};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::pipeline::{StagedFile, UploadPipeline, PROGRESS_STAGED};
use crate::registry::JobRegistry;
use crate::staging::{remove_dir_if_exists, sanitize_filename};
use crate::sweep::Sweeper;

const ASSEMBLED_DIR: &str = "assembled";

fn chunk_path(dir: &Path, index: u32) -> PathBuf {
    dir.join(format!("chunk_{}", index))
}

#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("Chunk {index} is missing from the staging area")]
    MissingChunk { index: u32 },

    #[error("Assembled file is {written} bytes but {expected} were declared")]
    SizeMismatch { expected: u64, written: u64 },

    #[error("Failed to assemble chunks: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
struct ChunkedUpload {
    upload_id: Uuid,
    owner_id: i64,
    filename: String,
    total_size: u64,
    chunk_size: u64,
    total_chunks: u32,
    /// Received chunk index -> byte length.
    received: HashMap<u32, u64>,
    status: ChunkedUploadStatus,
    dir: PathBuf,
    job_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    cleanup_checks: u32,
}

impl ChunkedUpload {
    fn receipt(&self) -> ChunkReceipt {
        let uploaded_chunks = self.received.len() as u32;
        ChunkReceipt {
            uploaded_chunks,
            total_chunks: self.total_chunks,
            all_chunks_received: uploaded_chunks == self.total_chunks,
        }
    }

    fn snapshot(&self) -> ChunkedUploadSnapshot {
        ChunkedUploadSnapshot {
            upload_id: self.upload_id,
            filename: self.filename.clone(),
            status: self.status,
            total_size: self.total_size,
            chunk_size: self.chunk_size,
            total_chunks: self.total_chunks,
            uploaded_chunks: self.received.len() as u32,
            received_bytes: self.received.values().sum(),
            job_id: self.job_id,
            created_at: self.created_at,
            last_activity: self.last_activity,
        }
    }

    fn accepts_chunks(&self) -> bool {
        matches!(
            self.status,
            ChunkedUploadStatus::Initialized
                | ChunkedUploadStatus::InProgress
                | ChunkedUploadStatus::AllChunksReceived
        )
    }
}

/// Look up an upload and check that `owner_id` owns it.
fn owned<'a>(
    uploads: &'a HashMap<Uuid, ChunkedUpload>,
    upload_id: Uuid,
    owner_id: i64,
) -> Result<&'a ChunkedUpload, AppError> {
    let upload = uploads
        .get(&upload_id)
        .ok_or_else(|| AppError::NotFound("Upload session not found".to_string()))?;
    if upload.owner_id != owner_id {
        return Err(AppError::Forbidden(
            "Upload session belongs to another account".to_string(),
        ));
    }
    Ok(upload)
}

pub struct ChunkedUploadManager {
    pipeline: Arc<UploadPipeline>,
    clock: Arc<dyn Clock>,
    root: PathBuf,
    max_age: Duration,
    max_cleanup_checks: u32,
    uploads: RwLock<HashMap<Uuid, ChunkedUpload>>,
}

impl ChunkedUploadManager {
    pub fn new(pipeline: Arc<UploadPipeline>, retention: &RetentionConfig) -> Self {
        let root = pipeline.config().staging_dir.join("chunked");
        let clock = Arc::clone(pipeline.clock());
        Self {
            pipeline,
            clock,
            root,
            max_age: retention.chunked_upload_max_age,
            max_cleanup_checks: retention.chunked_cleanup_max_checks,
            uploads: RwLock::new(HashMap::new()),
        }
    }

    pub async fn active_uploads(&self) -> usize {
        self.uploads.read().await.len()
    }

    #[tracing::instrument(skip(self, request), fields(filename = %request.filename, total_size = request.total_size))]
    pub async fn initiate(
        &self,
        owner_id: i64,
        request: InitiateChunkedUpload,
    ) -> Result<Uuid, AppError> {
        let filename = sanitize_filename(&request.filename)?;
        let config = self.pipeline.config();

        if request.total_size == 0 || request.chunk_size == 0 || request.total_chunks == 0 {
            return Err(AppError::InvalidInput(
                "total_size, chunk_size and total_chunks must be greater than 0".to_string(),
            ));
        }
        if request.total_size > config.max_upload_size_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "File size {} exceeds the limit of {} bytes",
                request.total_size, config.max_upload_size_bytes
            )));
        }
        if request.chunk_size > config.max_chunk_size_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "Chunk size {} exceeds the limit of {} bytes",
                request.chunk_size, config.max_chunk_size_bytes
            )));
        }
        let capacity = u64::from(request.total_chunks).saturating_mul(request.chunk_size);
        if capacity < request.total_size {
            return Err(AppError::InvalidInput(format!(
                "{} chunks of {} bytes cannot hold {} bytes",
                request.total_chunks, request.chunk_size, request.total_size
            )));
        }
        // Every chunk must carry at least one byte.
        if u64::from(request.total_chunks - 1).saturating_mul(request.chunk_size)
            >= request.total_size
        {
            return Err(AppError::InvalidInput(format!(
                "{} bytes need at most {} chunks of {} bytes",
                request.total_size,
                request.total_size.div_ceil(request.chunk_size),
                request.chunk_size
            )));
        }

        let upload_id = Uuid::new_v4();
        let dir = self.root.join(upload_id.to_string());
        tokio::fs::create_dir_all(&dir).await?;

        let now = self.clock.now();
        let upload = ChunkedUpload {
            upload_id,
            owner_id,
            filename,
            total_size: request.total_size,
            chunk_size: request.chunk_size,
            total_chunks: request.total_chunks,
            received: HashMap::new(),
            status: ChunkedUploadStatus::Initialized,
            dir,
            job_id: None,
            created_at: now,
            last_activity: now,
            cleanup_checks: 0,
        };
        self.uploads.write().await.insert(upload_id, upload);

        tracing::info!(upload_id = %upload_id, owner_id, total_chunks = request.total_chunks, "Chunked upload initiated");
        Ok(upload_id)
    }

    /// Store one chunk. Re-sending an index that was already received changes nothing.
    pub async fn accept_chunk(
        &self,
        upload_id: Uuid,
        owner_id: i64,
        index: u32,
        data: Bytes,
    ) -> Result<ChunkReceipt, AppError> {
        let dir = {
            let uploads = self.uploads.read().await;
            let upload = owned(&uploads, upload_id, owner_id)?;
            if index >= upload.total_chunks {
                return Err(AppError::OutOfRange {
                    index,
                    total_chunks: upload.total_chunks,
                });
            }
            if upload.received.contains_key(&index) {
                tracing::debug!(upload_id = %upload_id, index, "Duplicate chunk ignored");
                return Ok(upload.receipt());
            }
            if !upload.accepts_chunks() {
                return Err(AppError::InvalidInput(format!(
                    "Upload is {:?} and no longer accepts chunks",
                    upload.status
                )));
            }
            if data.is_empty() {
                return Err(AppError::InvalidInput(format!("Chunk {} is empty", index)));
            }
            if data.len() as u64 > upload.chunk_size {
                return Err(AppError::InvalidInput(format!(
                    "Chunk {} is {} bytes, larger than the declared chunk size of {}",
                    index,
                    data.len(),
                    upload.chunk_size
                )));
            }
            upload.dir.clone()
        };

        // Write under a unique name first so a concurrent duplicate never sees a partial file.
        let partial = dir.join(format!("chunk_{}.{}.part", index, Uuid::new_v4()));
        tokio::fs::write(&partial, &data).await?;

        let mut uploads = self.uploads.write().await;
        let Some(upload) = uploads.get_mut(&upload_id) else {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(AppError::NotFound("Upload session not found".to_string()));
        };
        if upload.received.contains_key(&index) {
            let _ = tokio::fs::remove_file(&partial).await;
            return Ok(upload.receipt());
        }
        tokio::fs::rename(&partial, chunk_path(&dir, index)).await?;

        upload.received.insert(index, data.len() as u64);
        upload.last_activity = self.clock.now();
        upload.status = if upload.received.len() as u32 == upload.total_chunks {
            ChunkedUploadStatus::AllChunksReceived
        } else {
            ChunkedUploadStatus::InProgress
        };

        tracing::debug!(
            upload_id = %upload_id,
            index,
            uploaded = upload.received.len(),
            total = upload.total_chunks,
            "Chunk stored"
        );
        Ok(upload.receipt())
    }

    /// Start assembly and publication. Calling it again returns the same job id.
    pub async fn complete(self: &Arc<Self>, upload_id: Uuid, owner_id: i64) -> Result<Uuid, AppError> {
        let (job_id, staged) = {
            let mut uploads = self.uploads.write().await;
            let upload = owned(&uploads, upload_id, owner_id)?;
            if let Some(job_id) = upload.job_id {
                return Ok(job_id);
            }
            let received = upload.received.len() as u32;
            if received != upload.total_chunks {
                return Err(AppError::Incomplete {
                    received,
                    expected: upload.total_chunks,
                });
            }

            let job_id = self
                .pipeline
                .register_job(owner_id, &upload.filename, upload.total_size)
                .await;

            let Some(upload) = uploads.get_mut(&upload_id) else {
                return Err(AppError::NotFound("Upload session not found".to_string()));
            };
            upload.job_id = Some(job_id);
            upload.status = ChunkedUploadStatus::Assembling;
            upload.last_activity = self.clock.now();

            let staged = StagedFile {
                job_id,
                owner_id,
                path: upload.dir.join(ASSEMBLED_DIR).join(&upload.filename),
                filename: upload.filename.clone(),
                size: upload.total_size,
            };
            (job_id, staged)
        };

        tracing::info!(upload_id = %upload_id, job_id = %job_id, "All chunks received, assembling");

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.assemble_and_run(upload_id, staged).await;
        });

        Ok(job_id)
    }

    async fn assemble_and_run(&self, upload_id: Uuid, staged: StagedFile) {
        let (dir, total_chunks) = {
            let uploads = self.uploads.read().await;
            match uploads.get(&upload_id) {
                Some(upload) => (upload.dir.clone(), upload.total_chunks),
                None => {
                    tracing::warn!(upload_id = %upload_id, "Upload removed before assembly");
                    self.pipeline
                        .registry()
                        .update(
                            staged.job_id,
                            JobUpdate::failed(JobError::new(
                                JobErrorKind::Staging,
                                "Upload session expired before assembly",
                            )),
                        )
                        .await;
                    return;
                }
            }
        };

        let assembled = assemble_chunks(
            &dir,
            &staged.path,
            total_chunks,
            staged.size,
            self.pipeline.registry().as_ref(),
            staged.job_id,
        )
        .await;

        match assembled {
            Ok(_) => {
                self.set_status(upload_id, ChunkedUploadStatus::Processing)
                    .await;
                self.pipeline.run(staged).await;
                self.remove_upload(upload_id).await;
            }
            Err(e) => {
                tracing::error!(upload_id = %upload_id, job_id = %staged.job_id, error = %e, "Chunk assembly failed");
                self.set_status(upload_id, ChunkedUploadStatus::Failed).await;
                self.pipeline
                    .registry()
                    .update(
                        staged.job_id,
                        JobUpdate::failed(JobError::new(JobErrorKind::Staging, e.to_string())),
                    )
                    .await;
                if let Err(e) = remove_dir_if_exists(&dir).await {
                    tracing::warn!(upload_id = %upload_id, error = %e, "Failed to remove staging directory");
                }
            }
        }
    }

    async fn set_status(&self, upload_id: Uuid, status: ChunkedUploadStatus) {
        if let Some(upload) = self.uploads.write().await.get_mut(&upload_id) {
            upload.status = status;
            upload.last_activity = self.clock.now();
        }
    }

    async fn remove_upload(&self, upload_id: Uuid) -> bool {
        let removed = self.uploads.write().await.remove(&upload_id);
        match removed {
            Some(upload) => {
                if let Err(e) = remove_dir_if_exists(&upload.dir).await {
                    tracing::warn!(upload_id = %upload_id, error = %e, "Failed to remove staging directory");
                }
                true
            }
            None => false,
        }
    }

    pub async fn status(
        &self,
        upload_id: Uuid,
        owner_id: i64,
    ) -> Result<ChunkedUploadSnapshot, AppError> {
        let uploads = self.uploads.read().await;
        owned(&uploads, upload_id, owner_id).map(ChunkedUpload::snapshot)
    }
}

#[async_trait]
impl Sweeper for ChunkedUploadManager {
    fn name(&self) -> &'static str {
        "chunked_uploads"
    }

    async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let max_age = chrono::Duration::from_std(self.max_age)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let registry = self.pipeline.registry();

        let mut expired = Vec::new();
        {
            let mut uploads = self.uploads.write().await;
            for upload in uploads.values_mut() {
                if now - upload.created_at >= max_age {
                    expired.push(upload.upload_id);
                    continue;
                }
                let Some(job_id) = upload.job_id else {
                    continue;
                };
                if upload.cleanup_checks >= self.max_cleanup_checks {
                    continue;
                }
                match registry.get(job_id).await {
                    Some(job) if !job.stage.is_terminal() => {
                        upload.cleanup_checks += 1;
                        if upload.cleanup_checks == self.max_cleanup_checks {
                            tracing::warn!(
                                upload_id = %upload.upload_id,
                                job_id = %job_id,
                                "Job still running after the last cleanup check, leaving upload to the age limit"
                            );
                        }
                    }
                    _ => expired.push(upload.upload_id),
                }
            }
        }

        let mut removed = 0;
        for upload_id in expired {
            if self.remove_upload(upload_id).await {
                removed += 1;
            }
        }
        removed
    }
}

/// Concatenate `chunk_0..chunk_{total_chunks}` from `dir` into `target`.
///
/// Every chunk is checked for presence before anything is written. Job progress
/// moves from 0 to the staged checkpoint as chunks are appended.
pub(crate) async fn assemble_chunks(
    dir: &Path,
    target: &Path,
    total_chunks: u32,
    expected_size: u64,
    registry: &dyn JobRegistry,
    job_id: Uuid,
) -> Result<u64, AssemblyError> {
    for index in 0..total_chunks {
        if !tokio::fs::try_exists(chunk_path(dir, index)).await? {
            return Err(AssemblyError::MissingChunk { index });
        }
    }

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut output = tokio::fs::File::create(target).await?;
    let mut written: u64 = 0;

    for index in 0..total_chunks {
        let mut chunk = match tokio::fs::File::open(chunk_path(dir, index)).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AssemblyError::MissingChunk { index })
            }
            Err(e) => return Err(e.into()),
        };
        written += tokio::io::copy(&mut chunk, &mut output).await?;

        let progress = (written.min(expected_size) * u64::from(PROGRESS_STAGED))
            .checked_div(expected_size)
            .unwrap_or(0) as u8;
        registry
            .update(
                job_id,
                JobUpdate::progress(
                    progress,
                    format!("Assembling chunks ({}/{})", index + 1, total_chunks),
                ),
            )
            .await;
    }
    output.flush().await?;
    output.sync_all().await?;

    if written != expected_size {
        return Err(AssemblyError::SizeMismatch {
            expected: expected_size,
            written,
        });
    }
    Ok(written)
}
