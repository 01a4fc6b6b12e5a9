#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hotvault_core::models::{NewPiece, Piece, ProofSet, UploadJob};
use hotvault_core::{
    AppError, BindRetryPolicy, ManualClock, PipelineConfig, PollSettings, RecordIdFallback,
    RetentionConfig, ToolConfig,
};
use hotvault_db::{InMemoryPieceStore, PieceStore};
use hotvault_pdp::{PdpTool, ToolCommand, ToolError, ToolOutput, ToolRunner, SERVICE_SECRET_FILE};
use hotvault_processing::{
    ChunkedUploadManager, InMemoryJobRegistry, JobRegistry, PieceService, ProofSetProvisioner,
    UploadPipeline,
};
use tempfile::TempDir;
use uuid::Uuid;

pub const OWNER: i64 = 7;
pub const OTHER_OWNER: i64 = 8;
pub const REMOTE_PROOF_SET: &str = "12";
pub const UPLOADED_CID: &str = "bagaUPLOADED:bagaSUB";
pub const LISTED_ROOT_ID: &str = "5";
pub const DOWNLOADED_CONTENT: &[u8] = b"bytes fetched from the service";

pub const BIND_ATTEMPTS: u32 = 3;
pub const CONFIRM_ATTEMPTS: u32 = 3;

pub fn listing_with_root() -> String {
    "Proof Set ID: 12\nRoots:\n  Root ID: 5\n  Root CID: bagaUPLOADED\n  Root Sub CID: bagaSUB\n"
        .to_string()
}

/// Canned answer for one tool invocation.
#[derive(Clone, Debug)]
pub enum Reply {
    Ok(String),
    Fail(String),
    Timeout,
    /// Never answers.
    Hang,
}

impl Reply {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Reply::Ok(stdout.into())
    }

    pub fn fail(stderr: impl Into<String>) -> Self {
        Reply::Fail(stderr.into())
    }

    fn into_result(self, operation: &str) -> Result<ToolOutput, ToolError> {
        match self {
            Reply::Ok(stdout) => Ok(ToolOutput {
                stdout,
                stderr: String::new(),
            }),
            Reply::Fail(stderr) => Err(ToolError::Failed {
                operation: operation.to_string(),
                code: Some(1),
                stdout: String::new(),
                stderr,
            }),
            Reply::Timeout => Err(ToolError::TimedOut {
                operation: operation.to_string(),
                after: Duration::from_secs(60),
                stdout: String::new(),
                stderr: String::new(),
            }),
            Reply::Hang => unreachable!("hanging replies are never resolved"),
        }
    }
}

/// [`ToolRunner`] that answers from a script instead of spawning `pdptool`.
///
/// Queued replies for a subcommand are used first, then its default reply.
#[derive(Default)]
pub struct ScriptedRunner {
    defaults: Mutex<HashMap<String, Reply>>,
    queued: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<ToolCommand>>,
    prepared: Mutex<Vec<Vec<u8>>>,
    chunk_lists: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    /// A runner where every step of a publication succeeds.
    pub fn happy_path() -> Self {
        let runner = Self::default();
        runner.on("upload-file", Reply::ok(format!("Uploading...\n{}\n", UPLOADED_CID)));
        runner.on("get-proof-set", Reply::ok(listing_with_root()));
        runner
    }

    pub fn on(&self, subcommand: &str, reply: Reply) {
        self.defaults
            .lock()
            .unwrap()
            .insert(subcommand.to_string(), reply);
    }

    pub fn queue(&self, subcommand: &str, replies: impl IntoIterator<Item = Reply>) {
        self.queued
            .lock()
            .unwrap()
            .entry(subcommand.to_string())
            .or_default()
            .extend(replies);
    }

    pub fn calls_to(&self, subcommand: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.operation() == subcommand)
            .count()
    }

    pub fn last_call(&self, subcommand: &str) -> Option<ToolCommand> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|c| c.operation() == subcommand)
            .cloned()
    }

    /// Contents of every file handed to `prepare-piece`, in call order.
    pub fn prepared_files(&self) -> Vec<Vec<u8>> {
        self.prepared.lock().unwrap().clone()
    }

    /// Contents of every chunk list handed to `download-file`.
    pub fn chunk_lists(&self) -> Vec<String> {
        self.chunk_lists.lock().unwrap().clone()
    }
}

fn flag_value<'a>(command: &'a ToolCommand, flag: &str) -> Option<&'a str> {
    let position = command.args.iter().position(|a| a == flag)?;
    command.args.get(position + 1).map(String::as_str)
}

#[async_trait]
impl ToolRunner for ScriptedRunner {
    async fn run(
        &self,
        command: &ToolCommand,
        _timeout: Duration,
    ) -> Result<ToolOutput, ToolError> {
        self.calls.lock().unwrap().push(command.clone());
        let operation = command.operation().to_string();

        match operation.as_str() {
            "create-service-secret" => {
                if let Some(dir) = &command.working_dir {
                    std::fs::write(dir.join(SERVICE_SECRET_FILE), "{}").unwrap();
                }
            }
            "prepare-piece" => {
                let file = command.args.last().unwrap();
                let bytes = std::fs::read(file).unwrap_or_default();
                self.prepared.lock().unwrap().push(bytes);
            }
            "download-file" => {
                if let Some(list) = flag_value(command, "--chunk-file") {
                    let cids = std::fs::read_to_string(list).unwrap_or_default();
                    self.chunk_lists.lock().unwrap().push(cids);
                }
                if let Some(output) = flag_value(command, "--output-file") {
                    std::fs::write(output, DOWNLOADED_CONTENT).unwrap();
                }
            }
            _ => {}
        }

        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&operation)
            .and_then(VecDeque::pop_front);
        let reply = queued
            .or_else(|| self.defaults.lock().unwrap().get(&operation).cloned())
            .unwrap_or_else(|| Reply::ok(""));
        if matches!(reply, Reply::Hang) {
            std::future::pending::<()>().await;
        }
        reply.into_result(&operation)
    }
}

/// [`PieceStore`] whose piece writes and deletes always fail.
pub struct FailingPieceStore {
    pub inner: Arc<InMemoryPieceStore>,
}

#[async_trait]
impl PieceStore for FailingPieceStore {
    async fn find_proof_set(&self, owner_id: i64) -> Result<Option<ProofSet>, AppError> {
        self.inner.find_proof_set(owner_id).await
    }

    async fn record_proof_set_creation(
        &self,
        owner_id: i64,
        transaction_hash: &str,
        service_name: &str,
        service_url: &str,
    ) -> Result<ProofSet, AppError> {
        self.inner
            .record_proof_set_creation(owner_id, transaction_hash, service_name, service_url)
            .await
    }

    async fn set_remote_proof_set_id(
        &self,
        owner_id: i64,
        proof_set_id: &str,
    ) -> Result<(), AppError> {
        self.inner
            .set_remote_proof_set_id(owner_id, proof_set_id)
            .await
    }

    async fn create_piece(&self, _piece: NewPiece) -> Result<Piece, AppError> {
        Err(AppError::Internal("connection reset".to_string()))
    }

    async fn list_pieces(&self, owner_id: i64) -> Result<Vec<Piece>, AppError> {
        self.inner.list_pieces(owner_id).await
    }

    async fn find_piece(&self, owner_id: i64, piece_id: i64) -> Result<Option<Piece>, AppError> {
        self.inner.find_piece(owner_id, piece_id).await
    }

    async fn find_piece_by_cid(
        &self,
        owner_id: i64,
        cid: &str,
    ) -> Result<Option<Piece>, AppError> {
        self.inner.find_piece_by_cid(owner_id, cid).await
    }

    async fn delete_piece(&self, _owner_id: i64, _piece_id: i64) -> Result<bool, AppError> {
        Err(AppError::Internal("connection reset".to_string()))
    }
}

pub fn fast_poll(max_attempts: u32) -> PollSettings {
    PollSettings::new(Duration::ZERO, Duration::ZERO, max_attempts)
}

pub fn pipeline_config(staging_dir: PathBuf) -> PipelineConfig {
    PipelineConfig {
        staging_dir,
        max_upload_size_bytes: 10 * 1024 * 1024,
        max_chunk_size_bytes: 1024 * 1024,
        secret_timeout: Duration::from_secs(5),
        pre_bind_delay: Duration::ZERO,
        bind_poll: fast_poll(BIND_ATTEMPTS),
        bind_timeout: Duration::from_secs(5),
        bind_retry: BindRetryPolicy::default(),
        confirm_poll: fast_poll(CONFIRM_ATTEMPTS),
        confirm_timeout: Duration::from_secs(5),
        record_id_fallback: RecordIdFallback::Degrade,
        provision_poll: fast_poll(5),
        provision_timeout: Duration::from_secs(5),
        remove_timeout: Duration::from_secs(5),
        download_timeout: Duration::from_secs(5),
    }
}

pub fn retention_config() -> RetentionConfig {
    RetentionConfig {
        job_retention: Duration::from_secs(3600),
        job_sweep_interval: Duration::from_secs(60),
        chunked_upload_max_age: Duration::from_secs(3600),
        chunked_sweep_interval: Duration::from_secs(10),
        chunked_cleanup_max_checks: 3,
    }
}

/// Fully wired pipeline over a scripted tool and in-memory stores.
pub struct Harness {
    pub runner: Arc<ScriptedRunner>,
    pub store: Arc<InMemoryPieceStore>,
    pub registry: Arc<InMemoryJobRegistry>,
    pub clock: ManualClock,
    pub pipeline: Arc<UploadPipeline>,
    pub chunked: Arc<ChunkedUploadManager>,
    pub provisioner: ProofSetProvisioner,
    pub pieces: PieceService,
    pub staging: TempDir,
    pub tool_dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(ScriptedRunner::happy_path(), false, |_| {})
    }

    pub fn with_runner(runner: ScriptedRunner) -> Self {
        Self::build(runner, false, |_| {})
    }

    pub fn build(
        runner: ScriptedRunner,
        fail_piece_writes: bool,
        tweak: impl FnOnce(&mut PipelineConfig),
    ) -> Self {
        let staging = tempfile::tempdir().unwrap();
        let tool_dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(Utc::now());
        let runner = Arc::new(runner);
        let store = Arc::new(InMemoryPieceStore::new());
        let registry = Arc::new(InMemoryJobRegistry::new(Arc::new(clock.clone())));

        let tool_config = ToolConfig {
            pdptool_path: tool_dir.path().join("pdptool"),
            service_name: "hotvault".to_string(),
            service_url: "https://pdp.example.com".to_string(),
            record_keeper: Some("0xRecordKeeper".to_string()),
        };
        let tool = PdpTool::new(runner.clone(), &tool_config);

        let mut config = pipeline_config(staging.path().to_path_buf());
        tweak(&mut config);

        let piece_store: Arc<dyn PieceStore> = if fail_piece_writes {
            Arc::new(FailingPieceStore {
                inner: store.clone(),
            })
        } else {
            store.clone()
        };

        let provisioner =
            ProofSetProvisioner::new(piece_store.clone(), tool.clone(), &tool_config, &config);
        let pieces = PieceService::new(piece_store.clone(), tool.clone(), &config);
        let pipeline = Arc::new(UploadPipeline::new(
            registry.clone(),
            piece_store,
            tool,
            config,
            Arc::new(clock.clone()),
        ));
        let chunked = Arc::new(ChunkedUploadManager::new(
            pipeline.clone(),
            &retention_config(),
        ));

        Self {
            runner,
            store,
            registry,
            clock,
            pipeline,
            chunked,
            provisioner,
            pieces,
            staging,
            tool_dir,
        }
    }

    /// Give [`OWNER`] a provisioned proof set.
    pub async fn provisioned(self) -> Self {
        self.store.insert_proof_set(OWNER, REMOTE_PROOF_SET).await;
        self
    }

    /// Wait until the job reaches a terminal stage.
    pub async fn wait_for_terminal(&self, job_id: Uuid) -> UploadJob {
        for _ in 0..500 {
            if let Some(job) = self.registry.get(job_id).await {
                if job.stage.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} did not finish");
    }
}
