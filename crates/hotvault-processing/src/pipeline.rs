//! The upload pipeline.
//!
//! A staged file is driven through `preparing -> publishing -> binding -> confirming`
//! by invoking `pdptool`, and the result is recorded through the [`PieceStore`]. Every
//! transition is written to the [`JobRegistry`], which is all status pollers ever see.
//! Each job runs on its own task and ends in `complete`, `error` or `pending`.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use hotvault_core::models::{
    JobError, JobErrorKind, JobStatus, JobUpdate, NewPiece, PublicationResult, UploadJob,
    UploadStage,
};
use hotvault_core::{AppError, Clock, PipelineConfig, RecordIdFallback};
use hotvault_db::PieceStore;
use hotvault_pdp::parser::{self, Confidence};
use hotvault_pdp::{prepare_timeout, upload_timeout, PdpTool, ToolError, ToolOutput};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::polling::{AttemptError, PollOutcome, PollStep, Poller};
use crate::registry::JobRegistry;
use crate::staging::{remove_dir_if_exists, sanitize_filename, write_staged_file};

pub const PROGRESS_STAGED: u8 = 30;
const PREPARE_WEIGHT: u8 = 20;
pub const PROGRESS_PREPARED: u8 = PROGRESS_STAGED + PREPARE_WEIGHT;
pub const PROGRESS_PUBLISHED: u8 = 90;
pub const PROGRESS_BINDING: u8 = 95;
pub const PROGRESS_CONFIRMING: u8 = 96;
pub const PROGRESS_SAVING: u8 = 98;
pub const PROGRESS_COMPLETE: u8 = 100;

/// Record id used when confirmation polling runs out under [`RecordIdFallback::Degrade`].
pub const FALLBACK_RECORD_ID: &str = "1";

pub const PENDING_PROVISIONING_MESSAGE: &str =
    "The proof set is being initialized. Please try uploading again shortly.";

/// Listing errors printed while a fresh proof set is still being indexed.
const INITIALIZATION_NOISE: &[&str] = &[
    "Failed to retrieve next challenge epoch",
    "can't scan NULL into",
];

/// Post a progress message every this many confirmation checks.
const CONFIRM_MESSAGE_EVERY: u32 = 5;

/// A file on local disk, ready to be published for a registered job.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub job_id: Uuid,
    pub owner_id: i64,
    pub path: PathBuf,
    pub filename: String,
    pub size: u64,
}

/// Why a run stopped before `complete`.
#[derive(Debug)]
enum Halt {
    Pending(String),
    Failed(JobError),
}

impl Halt {
    fn failed(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Halt::Failed(JobError::new(kind, message))
    }

    /// Map a tool error, keeping timeouts apart from tool-reported failures.
    fn from_tool(step: &str, err: &ToolError) -> Self {
        match err {
            ToolError::TimedOut { after, .. } => Halt::failed(
                JobErrorKind::Timeout,
                format!(
                    "{} timed out after {}s. Try a smaller file.",
                    step,
                    after.as_secs()
                ),
            ),
            ToolError::Failed { stderr, .. } => Halt::failed(
                JobErrorKind::ToolFailure,
                format!("{} failed: {}", step, stderr.trim()),
            ),
            ToolError::Spawn { .. } => Halt::failed(
                JobErrorKind::Configuration,
                format!("{} failed: {}", step, err),
            ),
        }
    }
}

pub struct UploadPipeline {
    registry: Arc<dyn JobRegistry>,
    store: Arc<dyn PieceStore>,
    tool: PdpTool,
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    secret_lock: Mutex<()>,
}

impl UploadPipeline {
    pub fn new(
        registry: Arc<dyn JobRegistry>,
        store: Arc<dyn PieceStore>,
        tool: PdpTool,
        config: PipelineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            store,
            tool,
            config,
            clock,
            secret_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<dyn JobRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Create a job in `uploading` and return its id.
    pub async fn register_job(&self, owner_id: i64, filename: &str, total_size: u64) -> Uuid {
        let job = UploadJob::new(owner_id, filename, total_size, self.clock.now());
        let job_id = job.job_id;
        self.registry.insert(job).await;
        job_id
    }

    pub async fn job_status(&self, job_id: Uuid, owner_id: i64) -> Result<JobStatus, AppError> {
        let job = self
            .registry
            .get(job_id)
            .await
            .ok_or_else(|| AppError::NotFound("Job not found".to_string()))?;
        if job.owner_id != owner_id {
            return Err(AppError::Forbidden(
                "Job belongs to another account".to_string(),
            ));
        }
        Ok(JobStatus::from(&job))
    }

    /// Accept a complete file in one request and publish it in the background.
    pub async fn submit(
        self: &Arc<Self>,
        owner_id: i64,
        filename: &str,
        data: Bytes,
    ) -> Result<Uuid, AppError> {
        let filename = sanitize_filename(filename)?;
        if data.is_empty() {
            return Err(AppError::InvalidInput("File is empty".to_string()));
        }
        if data.len() as u64 > self.config.max_upload_size_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "File is {} bytes; the limit is {} bytes",
                data.len(),
                self.config.max_upload_size_bytes
            )));
        }

        let job_id = self
            .register_job(owner_id, &filename, data.len() as u64)
            .await;
        tracing::info!(job_id = %job_id, owner_id, filename = %filename, size = data.len(), "Upload accepted");

        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            pipeline.run_direct(job_id, owner_id, filename, data).await;
        });

        Ok(job_id)
    }

    async fn run_direct(&self, job_id: Uuid, owner_id: i64, filename: String, data: Bytes) {
        let dir = self
            .config
            .staging_dir
            .join("direct")
            .join(job_id.to_string());

        match write_staged_file(&dir, &filename, &data).await {
            Ok(path) => {
                let staged = StagedFile {
                    job_id,
                    owner_id,
                    path,
                    filename,
                    size: data.len() as u64,
                };
                self.run(staged).await;
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to stage upload");
                self.finish(
                    job_id,
                    Err(Halt::failed(
                        JobErrorKind::Staging,
                        format!("Failed to save uploaded file: {}", e),
                    )),
                )
                .await;
            }
        }

        if let Err(e) = remove_dir_if_exists(&dir).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to remove staging directory");
        }
    }

    /// Drive a staged file to a terminal stage and return that stage.
    #[tracing::instrument(skip(self, staged), fields(job_id = %staged.job_id, owner_id = staged.owner_id))]
    pub async fn run(&self, staged: StagedFile) -> UploadStage {
        let result = self.execute(&staged).await;
        self.finish(staged.job_id, result).await
    }

    async fn finish(&self, job_id: Uuid, result: Result<PublicationResult, Halt>) -> UploadStage {
        let update = match result {
            Ok(publication) => {
                tracing::info!(
                    cid = %publication.cid,
                    proof_set_id = %publication.proof_set_id,
                    record_id = %publication.record_id,
                    degraded = publication.degraded,
                    "Upload completed"
                );
                JobUpdate::stage(
                    UploadStage::Complete,
                    PROGRESS_COMPLETE,
                    "Upload completed successfully",
                )
                .with_cid(publication.cid)
                .with_proof_set_id(publication.proof_set_id)
                .with_record_id(publication.record_id)
            }
            Err(Halt::Pending(message)) => {
                tracing::info!(job_id = %job_id, "Proof set not provisioned yet, job left pending");
                JobUpdate::pending(message)
            }
            Err(Halt::Failed(error)) => {
                tracing::error!(job_id = %job_id, kind = ?error.kind, error = %error.message, "Upload failed");
                JobUpdate::failed(error)
            }
        };

        self.registry
            .update(job_id, update)
            .await
            .map(|job| job.stage)
            .unwrap_or(UploadStage::Error)
    }

    async fn update(&self, job_id: Uuid, update: JobUpdate) {
        if self.registry.update(job_id, update).await.is_none() {
            tracing::warn!(job_id = %job_id, "Job vanished from registry");
        }
    }

    async fn execute(&self, staged: &StagedFile) -> Result<PublicationResult, Halt> {
        let job_id = staged.job_id;

        self.ensure_service_secret(job_id).await?;

        let on_disk = tokio::fs::metadata(&staged.path)
            .await
            .map_err(|e| {
                Halt::failed(
                    JobErrorKind::Staging,
                    format!("Staged file is unavailable: {}", e),
                )
            })?
            .len();
        if on_disk != staged.size {
            return Err(Halt::failed(
                JobErrorKind::Staging,
                format!(
                    "Staged file is {} bytes but {} were declared",
                    on_disk, staged.size
                ),
            ));
        }

        self.update(
            job_id,
            JobUpdate::stage(UploadStage::Preparing, PROGRESS_STAGED, "Preparing piece"),
        )
        .await;
        self.tool
            .prepare_piece(&staged.path, prepare_timeout(staged.size))
            .await
            .map_err(|e| Halt::from_tool("Preparing piece", &e))?;

        self.update(
            job_id,
            JobUpdate::stage(
                UploadStage::Publishing,
                PROGRESS_PREPARED,
                format!(
                    "Uploading {} ({:.2} MB)",
                    staged.filename,
                    staged.size as f64 / (1024.0 * 1024.0)
                ),
            ),
        )
        .await;
        let uploaded = self
            .tool
            .upload_file(&staged.path, upload_timeout(staged.size))
            .await
            .map_err(|e| Halt::from_tool("Uploading file", &e))?;

        let cid = parser::extract_cid(&uploaded.stdout).ok_or_else(|| {
            Halt::failed(
                JobErrorKind::ParseFailure,
                "Upload finished but the tool printed no content identifier",
            )
        })?;
        if cid.confidence == Confidence::Fallback {
            tracing::warn!(cid = %cid.compound, "No line matched the CID format, using last output line");
        }

        self.update(
            job_id,
            JobUpdate::stage(
                UploadStage::Binding,
                PROGRESS_PUBLISHED,
                "File uploaded, looking up proof set",
            )
            .with_cid(cid.compound.clone()),
        )
        .await;

        let proof_set = match self.store.find_proof_set(staged.owner_id).await {
            Ok(Some(proof_set)) => proof_set,
            Ok(None) => {
                return Err(Halt::failed(
                    JobErrorKind::NotFound,
                    "Proof set not found for user. Please re-authenticate to create one.",
                ))
            }
            Err(e) => {
                return Err(Halt::failed(
                    JobErrorKind::Database,
                    format!("Failed to look up proof set: {}", e),
                ))
            }
        };
        if !proof_set.is_provisioned() {
            return Err(Halt::Pending(PENDING_PROVISIONING_MESSAGE.to_string()));
        }
        let remote_id = proof_set.proof_set_id.clone();

        self.update(
            job_id,
            JobUpdate::progress(PROGRESS_BINDING, "Adding root to proof set")
                .with_proof_set_id(remote_id.clone()),
        )
        .await;
        if !self.config.pre_bind_delay.is_zero() {
            tokio::time::sleep(self.config.pre_bind_delay).await;
        }
        self.bind(job_id, &remote_id, &cid.compound).await?;

        self.update(
            job_id,
            JobUpdate::stage(
                UploadStage::Confirming,
                PROGRESS_CONFIRMING,
                "Root added, waiting for it to be indexed",
            ),
        )
        .await;
        let (record_id, degraded) = self.confirm(job_id, &remote_id, &cid.base).await?;

        self.update(
            job_id,
            JobUpdate::progress(PROGRESS_SAVING, "Saving piece information")
                .with_record_id(record_id.clone()),
        )
        .await;
        self.store
            .create_piece(NewPiece {
                owner_id: staged.owner_id,
                cid: cid.compound.clone(),
                filename: staged.filename.clone(),
                size: staged.size as i64,
                service_name: self.tool.service_name().to_string(),
                service_url: self.tool.service_url().to_string(),
                proof_set_id: proof_set.id,
                root_id: record_id.clone(),
            })
            .await
            .map_err(|e| {
                Halt::failed(
                    JobErrorKind::Persistence,
                    format!(
                        "Piece {} was published to proof set {} but recording it failed: {}",
                        cid.compound, remote_id, e
                    ),
                )
            })?;

        Ok(PublicationResult {
            cid: cid.compound,
            proof_set_id: remote_id,
            record_id,
            degraded,
        })
    }

    async fn ensure_service_secret(&self, job_id: Uuid) -> Result<(), Halt> {
        let _guard = self.secret_lock.lock().await;
        if self.tool.has_service_secret().await {
            return Ok(());
        }

        self.update(job_id, JobUpdate::message("Creating service secret"))
            .await;
        self.tool
            .create_service_secret(self.config.secret_timeout)
            .await
            .map_err(|e| Halt::from_tool("Creating service secret", &e))?;
        tracing::info!("Service secret created");
        Ok(())
    }

    async fn bind(&self, job_id: Uuid, proof_set_id: &str, root: &str) -> Result<(), Halt> {
        let poller = Poller::new("bind", self.config.bind_poll.clone());
        let max_attempts = poller.settings().max_attempts;
        let timeout = self.config.bind_timeout;
        let policy = &self.config.bind_retry;

        let outcome = poller
            .run(
                |attempt| async move {
                    if attempt > 1 {
                        self.update(
                            job_id,
                            JobUpdate::message(format!(
                                "Adding root to proof set (attempt {}/{})",
                                attempt, max_attempts
                            )),
                        )
                        .await;
                    }
                    match self.tool.add_roots(proof_set_id, root, timeout).await {
                        Ok(output) => Ok(output),
                        Err(e) if e.is_timeout() || policy.is_retryable(e.stderr()) => {
                            Err(AttemptError::Retryable(e))
                        }
                        Err(e) => Err(AttemptError::Fatal(e)),
                    }
                },
                |output: ToolOutput| {
                    if !output.stderr.trim().is_empty() {
                        tracing::warn!(stderr = %output.stderr.trim(), "add-roots succeeded with stderr output");
                    }
                    PollStep::Done(())
                },
            )
            .await;

        match outcome {
            PollOutcome::Completed { attempts, .. } => {
                tracing::info!(proof_set_id, attempts, "Root added to proof set");
                Ok(())
            }
            PollOutcome::Aborted { error, .. } => Err(Halt::failed(
                JobErrorKind::ToolFailure,
                format!("Failed to add root to proof set: {}", describe(&error)),
            )),
            PollOutcome::Exhausted {
                attempts,
                last_error,
            } => Err(bind_exhausted(attempts, last_error.as_ref())),
            PollOutcome::TooManyErrors {
                attempts,
                last_error,
            } => Err(bind_exhausted(attempts, Some(&last_error))),
            PollOutcome::Rejected { reason, .. } => {
                Err(Halt::failed(JobErrorKind::ToolFailure, reason))
            }
        }
    }

    /// Poll the proof-set listing until the root shows up with a numeric id.
    async fn confirm(
        &self,
        job_id: Uuid,
        proof_set_id: &str,
        base_cid: &str,
    ) -> Result<(String, bool), Halt> {
        let poller = Poller::new("confirm", self.config.confirm_poll.clone());
        let max_attempts = poller.settings().max_attempts;
        let timeout = self.config.confirm_timeout;

        let outcome = poller
            .run(
                |attempt| async move {
                    if attempt % CONFIRM_MESSAGE_EVERY == 0 {
                        self.update(
                            job_id,
                            JobUpdate::message(format!(
                                "Waiting for chain confirmation (check {}/{})",
                                attempt, max_attempts
                            )),
                        )
                        .await;
                    }
                    self.tool
                        .get_proof_set(proof_set_id, timeout)
                        .await
                        .map_err(|e| {
                            if is_initialization_noise(e.stderr()) {
                                tracing::debug!(attempt, "Proof set still initializing");
                            }
                            AttemptError::Retryable(e)
                        })
                },
                |output: ToolOutput| {
                    let scan = parser::scan_listing(&output.stdout, base_cid);
                    if scan.roots_pending {
                        tracing::debug!(proof_set_id, "Proof set lists no roots yet");
                    }
                    match scan.record_id {
                        Some(id) => PollStep::Done(id.to_string()),
                        None => PollStep::Continue {
                            progressed: scan.saw_any_record,
                        },
                    }
                },
            )
            .await;

        match outcome {
            PollOutcome::Completed { value, attempts } => {
                tracing::info!(record_id = %value, attempts, "Root ID confirmed");
                Ok((value, false))
            }
            PollOutcome::Exhausted { attempts, .. } => match self.config.record_id_fallback {
                RecordIdFallback::Degrade => {
                    tracing::warn!(
                        attempts,
                        fallback = FALLBACK_RECORD_ID,
                        "Root ID not indexed in time, using fallback"
                    );
                    self.update(
                        job_id,
                        JobUpdate::progress(
                            PROGRESS_SAVING,
                            "Using default Root ID due to blockchain indexing delay.",
                        )
                        .degraded(),
                    )
                    .await;
                    Ok((FALLBACK_RECORD_ID.to_string(), true))
                }
                RecordIdFallback::Fail => Err(Halt::failed(
                    JobErrorKind::Confirmation,
                    format!(
                        "Root was added but its ID could not be confirmed after {} checks",
                        attempts
                    ),
                )),
            },
            PollOutcome::TooManyErrors { last_error, .. } => Err(Halt::failed(
                JobErrorKind::Confirmation,
                format!("Could not read proof set: {}", describe(&last_error)),
            )),
            PollOutcome::Aborted { error, .. } => Err(Halt::failed(
                JobErrorKind::Confirmation,
                format!("Could not read proof set: {}", describe(&error)),
            )),
            PollOutcome::Rejected { reason, .. } => {
                Err(Halt::failed(JobErrorKind::Confirmation, reason))
            }
        }
    }
}

fn is_initialization_noise(stderr: &str) -> bool {
    INITIALIZATION_NOISE.iter().any(|noise| stderr.contains(noise))
}

fn describe(err: &ToolError) -> String {
    let stderr = err.stderr().trim();
    if stderr.is_empty() {
        err.to_string()
    } else {
        stderr.to_string()
    }
}

fn bind_exhausted(attempts: u32, last_error: Option<&ToolError>) -> Halt {
    match last_error {
        Some(e) if e.is_timeout() => Halt::failed(
            JobErrorKind::Timeout,
            format!(
                "Adding root timed out on every attempt ({} attempts). Please try again later.",
                attempts
            ),
        ),
        Some(e) => Halt::failed(
            JobErrorKind::ToolFailure,
            format!(
                "Failed to add root to proof set after {} attempts: {}",
                attempts,
                describe(e)
            ),
        ),
        None => Halt::failed(
            JobErrorKind::ToolFailure,
            format!("Failed to add root to proof set after {} attempts", attempts),
        ),
    }
}
