//! Configuration module
//!
//! Settings are read from the process environment (after loading `.env` through
//! `dotenvy`). Every tunable has a named default below.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const SERVER_PORT: u16 = 8080;
const DB_MAX_CONNECTIONS: u32 = 10;
const MAX_UPLOAD_SIZE_MB: u64 = 10 * 1024;
const MAX_CHUNK_SIZE_MB: u64 = 100;
const SECRET_TIMEOUT_SECS: u64 = 60;
const PRE_BIND_DELAY_MS: u64 = 1000;

const BIND_MAX_ATTEMPTS: u32 = 100;
const BIND_INTERVAL_SECS: u64 = 10;
const BIND_MAX_INTERVAL_SECS: u64 = 10;
const BIND_TIMEOUT_SECS: u64 = 60;

const CONFIRM_MAX_ATTEMPTS: u32 = 100;
const CONFIRM_INTERVAL_SECS: u64 = 10;
const CONFIRM_MAX_INTERVAL_SECS: u64 = 10;
const CONFIRM_MAX_CONSECUTIVE_ERRORS: u32 = 10;
const CONFIRM_TIMEOUT_SECS: u64 = 60;

const PROVISION_MAX_ATTEMPTS: u32 = 120;
const PROVISION_INTERVAL_SECS: u64 = 10;
const PROVISION_MAX_INTERVAL_SECS: u64 = 60;
const PROVISION_TIMEOUT_SECS: u64 = 60;

const REMOVE_TIMEOUT_SECS: u64 = 120;
const DOWNLOAD_TIMEOUT_SECS: u64 = 600;

const JOB_RETENTION_SECS: u64 = 3600;
const JOB_SWEEP_INTERVAL_SECS: u64 = 60;
const CHUNKED_UPLOAD_MAX_AGE_SECS: u64 = 24 * 3600;
const CHUNKED_SWEEP_INTERVAL_SECS: u64 = 10;
const CHUNKED_CLEANUP_MAX_CHECKS: u32 = 360;

/// Number of consecutive errors tolerated before the poll interval starts doubling.
const ERROR_BACKOFF_THRESHOLD: u32 = 2;

/// stderr fragments from `add-roots` that indicate the remote side has not caught up yet.
pub const DEFAULT_BIND_RETRYABLE_PATTERNS: &[&str] = &[
    "does not belong to service",
    "Size must be a multiple of 32",
    "Failed to send transaction",
    "status code 500",
    "status code 502",
    "status code 503",
    "Failed to retrieve next challenge epoch",
    "can't scan NULL into",
    "can't add root to non-existing proof set",
];

/// Bounds for one polling loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollSettings {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_attempts: u32,
    pub max_consecutive_errors: u32,
    /// Consecutive errors allowed before the interval doubles.
    pub error_backoff_threshold: u32,
}

impl PollSettings {
    pub fn new(initial_interval: Duration, max_interval: Duration, max_attempts: u32) -> Self {
        Self {
            initial_interval,
            max_interval,
            max_attempts,
            max_consecutive_errors: max_attempts,
            error_backoff_threshold: ERROR_BACKOFF_THRESHOLD,
        }
    }

    pub fn with_max_consecutive_errors(mut self, max: u32) -> Self {
        self.max_consecutive_errors = max;
        self
    }

    pub fn with_error_backoff_threshold(mut self, threshold: u32) -> Self {
        self.error_backoff_threshold = threshold;
        self
    }

    /// Upper bound on the time spent sleeping between attempts.
    pub fn wall_clock_ceiling(&self) -> Duration {
        self.max_interval * self.max_attempts.saturating_sub(1)
    }
}

/// What to do when confirmation polling runs out of attempts without a remote error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordIdFallback {
    /// Substitute the default record id and finish in degraded mode.
    Degrade,
    /// End the job in `error`.
    Fail,
}

impl FromStr for RecordIdFallback {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "degrade" => Ok(Self::Degrade),
            "fail" => Ok(Self::Fail),
            other => Err(anyhow::anyhow!(
                "RECORD_ID_FALLBACK must be 'degrade' or 'fail', got '{}'",
                other
            )),
        }
    }
}

/// Which `add-roots` failures are worth another attempt. Timeouts are always retried.
#[derive(Clone, Debug)]
pub struct BindRetryPolicy {
    pub retryable_patterns: Vec<String>,
    pub retry_unknown_failures: bool,
}

impl BindRetryPolicy {
    pub fn is_retryable(&self, stderr: &str) -> bool {
        self.retry_unknown_failures
            || self
                .retryable_patterns
                .iter()
                .any(|pattern| stderr.contains(pattern.as_str()))
    }
}

impl Default for BindRetryPolicy {
    fn default() -> Self {
        Self {
            retryable_patterns: DEFAULT_BIND_RETRYABLE_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            retry_unknown_failures: false,
        }
    }
}

/// Location and service coordinates of the external `pdptool` binary.
#[derive(Clone, Debug)]
pub struct ToolConfig {
    pub pdptool_path: PathBuf,
    pub service_name: String,
    pub service_url: String,
    pub record_keeper: Option<String>,
}

impl ToolConfig {
    /// Directory every tool invocation runs in; `pdpservice.json` lives here.
    pub fn working_dir(&self) -> PathBuf {
        self.pdptool_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub staging_dir: PathBuf,
    pub max_upload_size_bytes: u64,
    pub max_chunk_size_bytes: u64,
    pub secret_timeout: Duration,
    pub pre_bind_delay: Duration,
    pub bind_poll: PollSettings,
    pub bind_timeout: Duration,
    pub bind_retry: BindRetryPolicy,
    pub confirm_poll: PollSettings,
    pub confirm_timeout: Duration,
    pub record_id_fallback: RecordIdFallback,
    pub provision_poll: PollSettings,
    pub provision_timeout: Duration,
    pub remove_timeout: Duration,
    pub download_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct RetentionConfig {
    pub job_retention: Duration,
    pub job_sweep_interval: Duration,
    pub chunked_upload_max_age: Duration,
    pub chunked_sweep_interval: Duration,
    pub chunked_cleanup_max_checks: u32,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub server_port: u16,
    pub environment: String,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub tool: ToolConfig,
    pub pipeline: PipelineConfig,
    pub retention: RetentionConfig,
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn secs(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Duration {
    Duration::from_secs(parse_or(lookup, key, default))
}

/// Reads a size in MiB and converts it to bytes, rejecting values that overflow.
fn mebibytes(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
) -> Result<u64, anyhow::Error> {
    parse_or(lookup, key, default)
        .checked_mul(1024 * 1024)
        .ok_or_else(|| anyhow::anyhow!("{} is too large", key))
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, anyhow::Error> {
        let pdptool_path = non_empty(&lookup, "PDPTOOL_PATH")
            .map(PathBuf::from)
            .ok_or_else(|| anyhow::anyhow!("PDPTOOL_PATH must be set"))?;
        let service_url = non_empty(&lookup, "SERVICE_URL")
            .ok_or_else(|| anyhow::anyhow!("SERVICE_URL must be set"))?;
        let service_name = non_empty(&lookup, "SERVICE_NAME")
            .ok_or_else(|| anyhow::anyhow!("SERVICE_NAME must be set"))?;

        let server_port = match lookup("SERVER_PORT") {
            Some(port) => port
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("SERVER_PORT must be a valid number"))?,
            None => SERVER_PORT,
        };

        let record_id_fallback = match non_empty(&lookup, "RECORD_ID_FALLBACK") {
            Some(value) => value.parse()?,
            None => RecordIdFallback::Degrade,
        };

        let bind_retry = BindRetryPolicy {
            retryable_patterns: match non_empty(&lookup, "BIND_RETRYABLE_PATTERNS") {
                Some(patterns) => patterns
                    .split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect(),
                None => BindRetryPolicy::default().retryable_patterns,
            },
            retry_unknown_failures: parse_or(&lookup, "BIND_RETRY_UNKNOWN_FAILURES", false),
        };

        let staging_dir = non_empty(&lookup, "STAGING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| env::temp_dir().join("hotvault"));

        let pipeline = PipelineConfig {
            staging_dir,
            max_upload_size_bytes: mebibytes(&lookup, "MAX_UPLOAD_SIZE_MB", MAX_UPLOAD_SIZE_MB)?,
            max_chunk_size_bytes: mebibytes(&lookup, "MAX_CHUNK_SIZE_MB", MAX_CHUNK_SIZE_MB)?,
            secret_timeout: secs(&lookup, "SECRET_TIMEOUT_SECS", SECRET_TIMEOUT_SECS),
            pre_bind_delay: Duration::from_millis(parse_or(
                &lookup,
                "PRE_BIND_DELAY_MS",
                PRE_BIND_DELAY_MS,
            )),
            bind_poll: PollSettings::new(
                secs(&lookup, "BIND_INTERVAL_SECS", BIND_INTERVAL_SECS),
                secs(&lookup, "BIND_MAX_INTERVAL_SECS", BIND_MAX_INTERVAL_SECS),
                parse_or(&lookup, "BIND_MAX_ATTEMPTS", BIND_MAX_ATTEMPTS),
            )
            .with_error_backoff_threshold(0),
            bind_timeout: secs(&lookup, "BIND_TIMEOUT_SECS", BIND_TIMEOUT_SECS),
            bind_retry,
            confirm_poll: PollSettings::new(
                secs(&lookup, "CONFIRM_INTERVAL_SECS", CONFIRM_INTERVAL_SECS),
                secs(&lookup, "CONFIRM_MAX_INTERVAL_SECS", CONFIRM_MAX_INTERVAL_SECS),
                parse_or(&lookup, "CONFIRM_MAX_ATTEMPTS", CONFIRM_MAX_ATTEMPTS),
            )
            .with_max_consecutive_errors(parse_or(
                &lookup,
                "CONFIRM_MAX_CONSECUTIVE_ERRORS",
                CONFIRM_MAX_CONSECUTIVE_ERRORS,
            )),
            confirm_timeout: secs(&lookup, "CONFIRM_TIMEOUT_SECS", CONFIRM_TIMEOUT_SECS),
            record_id_fallback,
            provision_poll: PollSettings::new(
                secs(&lookup, "PROVISION_INTERVAL_SECS", PROVISION_INTERVAL_SECS),
                secs(&lookup, "PROVISION_MAX_INTERVAL_SECS", PROVISION_MAX_INTERVAL_SECS),
                parse_or(&lookup, "PROVISION_MAX_ATTEMPTS", PROVISION_MAX_ATTEMPTS),
            ),
            provision_timeout: secs(&lookup, "PROVISION_TIMEOUT_SECS", PROVISION_TIMEOUT_SECS),
            remove_timeout: secs(&lookup, "REMOVE_TIMEOUT_SECS", REMOVE_TIMEOUT_SECS),
            download_timeout: secs(&lookup, "DOWNLOAD_TIMEOUT_SECS", DOWNLOAD_TIMEOUT_SECS),
        };

        let retention = RetentionConfig {
            job_retention: secs(&lookup, "JOB_RETENTION_SECS", JOB_RETENTION_SECS),
            job_sweep_interval: secs(&lookup, "JOB_SWEEP_INTERVAL_SECS", JOB_SWEEP_INTERVAL_SECS),
            chunked_upload_max_age: secs(
                &lookup,
                "CHUNKED_UPLOAD_MAX_AGE_SECS",
                CHUNKED_UPLOAD_MAX_AGE_SECS,
            ),
            chunked_sweep_interval: secs(
                &lookup,
                "CHUNKED_SWEEP_INTERVAL_SECS",
                CHUNKED_SWEEP_INTERVAL_SECS,
            ),
            chunked_cleanup_max_checks: parse_or(
                &lookup,
                "CHUNKED_CLEANUP_MAX_CHECKS",
                CHUNKED_CLEANUP_MAX_CHECKS,
            ),
        };

        Ok(Config {
            server_port,
            environment: lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            database_url: non_empty(&lookup, "DATABASE_URL"),
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", DB_MAX_CONNECTIONS),
            tool: ToolConfig {
                pdptool_path,
                service_name,
                service_url,
                record_keeper: non_empty(&lookup, "RECORD_KEEPER"),
            },
            pipeline,
            retention,
        })
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if let Some(url) = &self.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                return Err(anyhow::anyhow!(
                    "DATABASE_URL must be a valid PostgreSQL connection string"
                ));
            }
        } else if self.is_production() {
            return Err(anyhow::anyhow!("DATABASE_URL must be set in production"));
        }

        if !self.tool.service_url.starts_with("http://")
            && !self.tool.service_url.starts_with("https://")
        {
            return Err(anyhow::anyhow!("SERVICE_URL must be an http(s) URL"));
        }

        if self.pipeline.max_upload_size_bytes == 0 || self.pipeline.max_chunk_size_bytes == 0 {
            return Err(anyhow::anyhow!(
                "MAX_UPLOAD_SIZE_MB and MAX_CHUNK_SIZE_MB must be positive"
            ));
        }

        for (name, poll) in [
            ("BIND", &self.pipeline.bind_poll),
            ("CONFIRM", &self.pipeline.confirm_poll),
            ("PROVISION", &self.pipeline.provision_poll),
        ] {
            if poll.max_attempts == 0 {
                return Err(anyhow::anyhow!("{}_MAX_ATTEMPTS must be positive", name));
            }
            if poll.max_interval < poll.initial_interval {
                return Err(anyhow::anyhow!(
                    "{}_MAX_INTERVAL_SECS must not be below {}_INTERVAL_SECS",
                    name,
                    name
                ));
            }
        }

        Ok(())
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn database_url(&self) -> Option<&str> {
        self.database_url.as_deref()
    }
}
