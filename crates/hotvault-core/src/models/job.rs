use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stage of an upload job.
///
/// Jobs move forward through `Uploading -> Preparing -> Publishing -> Binding ->
/// Confirming -> Complete`. `Error` can be entered from any non-terminal stage and
/// `Pending` only from `Binding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStage {
    Uploading,
    Preparing,
    Publishing,
    Binding,
    Confirming,
    Complete,
    Error,
    Pending,
}

impl UploadStage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadStage::Complete | UploadStage::Error | UploadStage::Pending
        )
    }

    fn rank(&self) -> u8 {
        match self {
            UploadStage::Uploading => 0,
            UploadStage::Preparing => 1,
            UploadStage::Publishing => 2,
            UploadStage::Binding => 3,
            UploadStage::Confirming => 4,
            UploadStage::Complete | UploadStage::Error | UploadStage::Pending => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStage::Uploading => "uploading",
            UploadStage::Preparing => "preparing",
            UploadStage::Publishing => "publishing",
            UploadStage::Binding => "binding",
            UploadStage::Confirming => "confirming",
            UploadStage::Complete => "complete",
            UploadStage::Error => "error",
            UploadStage::Pending => "pending",
        }
    }
}

impl std::fmt::Display for UploadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    Staging,
    Configuration,
    Timeout,
    ToolFailure,
    ParseFailure,
    NotFound,
    Confirmation,
    Database,
    /// The remote publication succeeded but recording it locally failed.
    Persistence,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Progress record for one upload, owned by the job registry.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadJob {
    pub job_id: Uuid,
    pub owner_id: i64,
    pub stage: UploadStage,
    pub progress: u8,
    pub message: String,
    pub cid: Option<String>,
    pub proof_set_id: Option<String>,
    pub record_id: Option<String>,
    pub error: Option<JobError>,
    pub filename: String,
    pub total_size: u64,
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl UploadJob {
    pub fn new(
        owner_id: i64,
        filename: impl Into<String>,
        total_size: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            owner_id,
            stage: UploadStage::Uploading,
            progress: 0,
            message: "Upload received".to_string(),
            cid: None,
            proof_set_id: None,
            record_id: None,
            error: None,
            filename: filename.into(),
            total_size,
            degraded: false,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Apply an update while keeping stage and progress monotonic.
    ///
    /// Returns `false` and leaves the job untouched once it is terminal.
    pub fn apply(&mut self, update: JobUpdate, now: DateTime<Utc>) -> bool {
        if self.stage.is_terminal() {
            return false;
        }

        if let Some(stage) = update.stage {
            if stage.rank() >= self.stage.rank() {
                self.stage = stage;
            }
        }
        if let Some(progress) = update.progress {
            self.progress = self.progress.max(progress.min(100));
        }
        if let Some(message) = update.message {
            self.message = message;
        }
        if update.cid.is_some() {
            self.cid = update.cid;
        }
        if update.proof_set_id.is_some() {
            self.proof_set_id = update.proof_set_id;
        }
        if update.record_id.is_some() {
            self.record_id = update.record_id;
        }
        if update.error.is_some() {
            self.error = update.error;
        }
        self.degraded |= update.degraded;
        self.updated_at = now;
        if self.stage.is_terminal() {
            self.finished_at = Some(now);
        }
        true
    }
}

/// A partial change to an [`UploadJob`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub stage: Option<UploadStage>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub cid: Option<String>,
    pub proof_set_id: Option<String>,
    pub record_id: Option<String>,
    pub error: Option<JobError>,
    pub degraded: bool,
}

impl JobUpdate {
    pub fn stage(stage: UploadStage, progress: u8, message: impl Into<String>) -> Self {
        Self {
            stage: Some(stage),
            progress: Some(progress),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn progress(progress: u8, message: impl Into<String>) -> Self {
        Self {
            progress: Some(progress),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn failed(error: JobError) -> Self {
        Self {
            stage: Some(UploadStage::Error),
            message: Some(error.message.clone()),
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn pending(message: impl Into<String>) -> Self {
        Self {
            stage: Some(UploadStage::Pending),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_cid(mut self, cid: impl Into<String>) -> Self {
        self.cid = Some(cid.into());
        self
    }

    pub fn with_proof_set_id(mut self, proof_set_id: impl Into<String>) -> Self {
        self.proof_set_id = Some(proof_set_id.into());
        self
    }

    pub fn with_record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    pub fn degraded(mut self) -> Self {
        self.degraded = true;
        self
    }
}

/// Read-only job view served to status pollers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: Uuid,
    pub stage: UploadStage,
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_set_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub filename: String,
    pub total_size: u64,
    pub degraded: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<&UploadJob> for JobStatus {
    fn from(job: &UploadJob) -> Self {
        Self {
            job_id: job.job_id,
            stage: job.stage,
            progress: job.progress,
            message: job.message.clone(),
            cid: job.cid.clone(),
            proof_set_id: job.proof_set_id.clone(),
            record_id: job.record_id.clone(),
            error: job.error.clone(),
            filename: job.filename.clone(),
            total_size: job.total_size,
            degraded: job.degraded,
            updated_at: job.updated_at,
        }
    }
}
