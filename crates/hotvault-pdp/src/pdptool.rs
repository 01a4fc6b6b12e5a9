//! Typed wrapper over the `pdptool` command-line contract.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hotvault_core::ToolConfig;

use crate::runner::{ToolCommand, ToolError, ToolOutput, ToolRunner};

/// File created by `create-service-secret` in the tool directory.
pub const SERVICE_SECRET_FILE: &str = "pdpservice.json";

const BYTES_PER_MB: u64 = 1024 * 1024;
const BASE_TIMEOUT_SECS: u64 = 30;
const PREPARE_SECS_PER_MB: u64 = 2;
const PREPARE_MAX_TIMEOUT_SECS: u64 = 3600;
const UPLOAD_SECS_PER_MB: u64 = 3;
const UPLOAD_MAX_TIMEOUT_SECS: u64 = 7200;

fn size_scaled_timeout(size_bytes: u64, secs_per_mb: u64, max_secs: u64) -> Duration {
    let megabytes = size_bytes.div_ceil(BYTES_PER_MB);
    let secs = BASE_TIMEOUT_SECS.saturating_add(megabytes.saturating_mul(secs_per_mb));
    Duration::from_secs(secs.min(max_secs))
}

pub fn prepare_timeout(size_bytes: u64) -> Duration {
    size_scaled_timeout(size_bytes, PREPARE_SECS_PER_MB, PREPARE_MAX_TIMEOUT_SECS)
}

pub fn upload_timeout(size_bytes: u64) -> Duration {
    size_scaled_timeout(size_bytes, UPLOAD_SECS_PER_MB, UPLOAD_MAX_TIMEOUT_SECS)
}

/// `pdptool` bound to one service. Cheap to clone.
#[derive(Clone)]
pub struct PdpTool {
    runner: Arc<dyn ToolRunner>,
    program: PathBuf,
    working_dir: PathBuf,
    service_url: String,
    service_name: String,
}

impl PdpTool {
    pub fn new(runner: Arc<dyn ToolRunner>, config: &ToolConfig) -> Self {
        Self {
            runner,
            program: config.pdptool_path.clone(),
            working_dir: config.working_dir(),
            service_url: config.service_url.clone(),
            service_name: config.service_name.clone(),
        }
    }

    pub fn service_url(&self) -> &str {
        &self.service_url
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    fn command(&self, subcommand: &str) -> ToolCommand {
        ToolCommand::new(&self.program)
            .arg(subcommand)
            .current_dir(&self.working_dir)
    }

    fn service_command(&self, subcommand: &str) -> ToolCommand {
        self.command_for(subcommand, &self.service_url, &self.service_name)
    }

    fn command_for(&self, subcommand: &str, service_url: &str, service_name: &str) -> ToolCommand {
        self.command(subcommand).args([
            "--service-url",
            service_url,
            "--service-name",
            service_name,
        ])
    }

    pub async fn has_service_secret(&self) -> bool {
        tokio::fs::try_exists(self.working_dir.join(SERVICE_SECRET_FILE))
            .await
            .unwrap_or(false)
    }

    pub async fn create_service_secret(
        &self,
        timeout: Duration,
    ) -> Result<ToolOutput, ToolError> {
        self.runner
            .run(&self.command("create-service-secret"), timeout)
            .await
    }

    pub async fn prepare_piece(
        &self,
        file: &Path,
        timeout: Duration,
    ) -> Result<ToolOutput, ToolError> {
        let cmd = self
            .command("prepare-piece")
            .arg(file.to_string_lossy().into_owned());
        self.runner.run(&cmd, timeout).await
    }

    pub async fn upload_file(
        &self,
        file: &Path,
        timeout: Duration,
    ) -> Result<ToolOutput, ToolError> {
        let cmd = self
            .service_command("upload-file")
            .arg(file.to_string_lossy().into_owned());
        self.runner.run(&cmd, timeout).await
    }

    /// Bind a root (`base[:sub]` CID) into a proof set.
    pub async fn add_roots(
        &self,
        proof_set_id: &str,
        root: &str,
        timeout: Duration,
    ) -> Result<ToolOutput, ToolError> {
        let cmd = self
            .service_command("add-roots")
            .args(["--proof-set-id", proof_set_id, "--root", root]);
        self.runner.run(&cmd, timeout).await
    }

    pub async fn get_proof_set(
        &self,
        proof_set_id: &str,
        timeout: Duration,
    ) -> Result<ToolOutput, ToolError> {
        let cmd = self.service_command("get-proof-set").arg(proof_set_id);
        self.runner.run(&cmd, timeout).await
    }

    pub async fn get_proof_set_create_status(
        &self,
        tx_hash: &str,
        timeout: Duration,
    ) -> Result<ToolOutput, ToolError> {
        let cmd = self
            .service_command("get-proof-set-create-status")
            .args(["--tx-hash", tx_hash]);
        self.runner.run(&cmd, timeout).await
    }

    /// Drop a root from a proof set. Pieces carry the service they were published to,
    /// which may differ from the one currently configured.
    pub async fn remove_roots(
        &self,
        service_url: &str,
        service_name: &str,
        proof_set_id: &str,
        root_id: &str,
        timeout: Duration,
    ) -> Result<ToolOutput, ToolError> {
        let cmd = self
            .command_for("remove-roots", service_url, service_name)
            .args(["--proof-set-id", proof_set_id, "--root-id", root_id]);
        self.runner.run(&cmd, timeout).await
    }

    /// Fetch the pieces listed in `chunk_file` into `output_file`.
    pub async fn download_file(
        &self,
        service_url: &str,
        chunk_file: &Path,
        output_file: &Path,
        timeout: Duration,
    ) -> Result<ToolOutput, ToolError> {
        let cmd = self.command("download-file").args([
            "--service-url".to_string(),
            service_url.to_string(),
            "--chunk-file".to_string(),
            chunk_file.to_string_lossy().into_owned(),
            "--output-file".to_string(),
            output_file.to_string_lossy().into_owned(),
        ]);
        self.runner.run(&cmd, timeout).await
    }

    pub async fn create_proof_set(
        &self,
        record_keeper: &str,
        extra_data: Option<&str>,
        timeout: Duration,
    ) -> Result<ToolOutput, ToolError> {
        let mut cmd = self
            .service_command("create-proof-set")
            .args(["--recordkeeper", record_keeper]);
        if let Some(extra) = extra_data {
            cmd = cmd.args(["--extra-data", extra]);
        }
        self.runner.run(&cmd, timeout).await
    }
}
