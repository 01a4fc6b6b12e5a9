//! Subprocess execution with full output capture and a hard timeout.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use hotvault_core::AppError;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// How long to keep draining pipes after a timed-out child has been killed.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// One invocation of an external program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// The subcommand name, used for logging and error messages.
    pub fn operation(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or("command")
    }
}

/// Captured output of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{operation} timed out after {}s", .after.as_secs())]
    TimedOut {
        operation: String,
        after: Duration,
        stdout: String,
        stderr: String,
    },

    #[error("{operation} exited with {}: {stderr}", .code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    Failed {
        operation: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("Failed to execute {operation}: {source}")]
    Spawn {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

impl ToolError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ToolError::TimedOut { .. })
    }

    pub fn stderr(&self) -> &str {
        match self {
            ToolError::TimedOut { stderr, .. } | ToolError::Failed { stderr, .. } => stderr,
            ToolError::Spawn { .. } => "",
        }
    }

    pub fn stdout(&self) -> &str {
        match self {
            ToolError::TimedOut { stdout, .. } | ToolError::Failed { stdout, .. } => stdout,
            ToolError::Spawn { .. } => "",
        }
    }
}

impl From<ToolError> for AppError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::TimedOut {
                operation, after, ..
            } => AppError::Timeout { operation, after },
            ToolError::Failed {
                operation, stderr, ..
            } => AppError::ToolFailure { operation, stderr },
            ToolError::Spawn { operation, source } => AppError::ToolFailure {
                operation,
                stderr: source.to_string(),
            },
        }
    }
}

/// Runs external commands. Implementations must be safe to share between jobs.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, command: &ToolCommand, timeout: Duration)
        -> Result<ToolOutput, ToolError>;
}

/// [`ToolRunner`] backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandRunner;

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        if let Err(e) = reader.read_to_end(&mut buf).await {
            tracing::debug!(error = %e, "Failed to read child output");
        }
    }
    buf
}

#[async_trait]
impl ToolRunner for CommandRunner {
    #[tracing::instrument(skip(self, command), fields(operation = command.operation()))]
    async fn run(
        &self,
        command: &ToolCommand,
        timeout: Duration,
    ) -> Result<ToolOutput, ToolError> {
        let operation = command.operation().to_string();

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| ToolError::Spawn {
            operation: operation.clone(),
            source,
        })?;

        let stdout_task = tokio::spawn(drain(child.stdout.take()));
        let stderr_task = tokio::spawn(drain(child.stderr.take()));

        let status: Option<ExitStatus> = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(source)) => return Err(ToolError::Spawn { operation, source }),
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "Failed to kill timed out process");
                }
                None
            }
        };

        let collect = |task: tokio::task::JoinHandle<Vec<u8>>| async move {
            match tokio::time::timeout(DRAIN_GRACE, task).await {
                Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
                _ => String::new(),
            }
        };
        let stdout = collect(stdout_task).await;
        let stderr = collect(stderr_task).await;

        match status {
            None => {
                tracing::warn!(timeout_secs = timeout.as_secs(), "Command timed out");
                Err(ToolError::TimedOut {
                    operation,
                    after: timeout,
                    stdout,
                    stderr,
                })
            }
            Some(status) if status.success() => Ok(ToolOutput { stdout, stderr }),
            Some(status) => Err(ToolError::Failed {
                operation,
                code: status.code(),
                stdout,
                stderr,
            }),
        }
    }
}
