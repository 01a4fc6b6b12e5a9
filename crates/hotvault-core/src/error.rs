//! Error types module
//!
//! All failures surfaced by Hotvault are unified under [`AppError`]. Each variant
//! describes itself through [`ErrorMetadata`], which the HTTP layer uses to build
//! responses and to pick a log level.
//!
//! The `Database` variant and `From<sqlx::Error>` are gated behind the `sqlx` feature.

use std::io;
use std::time::Duration;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Expected errors such as validation failures
    Debug,
    /// Recoverable issues
    Warn,
    /// Unexpected failures
    Error,
}

/// Metadata for error responses - defines how an error should be presented
pub trait ErrorMetadata {
    /// HTTP status code to return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "TOOL_FAILURE")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the client
    fn suggested_action(&self) -> Option<&'static str>;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden in production
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("File too large: {0}")]
    PayloadTooLarge(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Chunk index {index} is outside [0, {total_chunks})")]
    OutOfRange { index: u32, total_chunks: u32 },

    #[error("Upload incomplete: {received}/{expected} chunks received")]
    Incomplete { received: u32, expected: u32 },

    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout { operation: String, after: Duration },

    #[error("{operation} failed: {stderr}")]
    ToolFailure { operation: String, stderr: String },

    #[error("Failed to parse {what} from tool output")]
    ParseFailure { what: String },

    #[error("Proof set is not provisioned yet: {0}")]
    PendingProvisioning(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::InvalidInput(format!("UUID parsing error: {}", err))
    }
}

/// Static metadata for each variant: (http_status, error_code, recoverable, suggested_action, sensitive, log_level).
fn app_error_static_metadata(
    err: &AppError,
) -> (
    u16,
    &'static str,
    bool,
    Option<&'static str>,
    bool,
    LogLevel,
) {
    match err {
        AppError::Database(_) => (
            500,
            "DATABASE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::InvalidInput(_) => (
            400,
            "INVALID_INPUT",
            false,
            Some("Check request parameters and try again"),
            false,
            LogLevel::Debug,
        ),
        AppError::PayloadTooLarge(_) => (
            413,
            "PAYLOAD_TOO_LARGE",
            false,
            Some("Use a chunked upload or a smaller file"),
            false,
            LogLevel::Debug,
        ),
        AppError::NotFound(_) => (404, "NOT_FOUND", false, None, false, LogLevel::Debug),
        AppError::Forbidden(_) => (403, "FORBIDDEN", false, None, false, LogLevel::Warn),
        AppError::Unauthorized(_) => (
            401,
            "UNAUTHORIZED",
            false,
            Some("Authenticate and try again"),
            false,
            LogLevel::Debug,
        ),
        AppError::OutOfRange { .. } => (
            400,
            "CHUNK_OUT_OF_RANGE",
            false,
            Some("Send chunk indices between 0 and total_chunks - 1"),
            false,
            LogLevel::Debug,
        ),
        AppError::Incomplete { .. } => (
            409,
            "UPLOAD_INCOMPLETE",
            true,
            Some("Upload the missing chunks before completing"),
            false,
            LogLevel::Debug,
        ),
        AppError::Timeout { .. } => (
            504,
            "TOOL_TIMEOUT",
            true,
            Some("Retry later or try a smaller file"),
            false,
            LogLevel::Warn,
        ),
        AppError::ToolFailure { .. } => (
            502,
            "TOOL_FAILURE",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::ParseFailure { .. } => (
            502,
            "PARSE_FAILURE",
            false,
            Some("Contact support if this error persists"),
            false,
            LogLevel::Error,
        ),
        AppError::PendingProvisioning(_) => (
            409,
            "PENDING_PROVISIONING",
            true,
            Some("Try again shortly"),
            false,
            LogLevel::Debug,
        ),
        AppError::Persistence(_) => (
            500,
            "PERSISTENCE_ERROR",
            false,
            Some("Contact support with the content identifier"),
            true,
            LogLevel::Error,
        ),
        AppError::Configuration(_) => (
            500,
            "CONFIGURATION_ERROR",
            false,
            Some("Contact the service operator"),
            true,
            LogLevel::Error,
        ),
        AppError::Internal(_) | AppError::InternalWithSource { .. } => (
            500,
            "INTERNAL_ERROR",
            false,
            Some("Contact support if this error persists"),
            true,
            LogLevel::Error,
        ),
    }
}

impl AppError {
    /// Get the error type name for detailed error responses
    pub fn error_type(&self) -> &str {
        match self {
            AppError::Database(_) => "Database",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::PayloadTooLarge(_) => "PayloadTooLarge",
            AppError::NotFound(_) => "NotFound",
            AppError::Forbidden(_) => "Forbidden",
            AppError::Unauthorized(_) => "Unauthorized",
            AppError::OutOfRange { .. } => "OutOfRange",
            AppError::Incomplete { .. } => "Incomplete",
            AppError::Timeout { .. } => "Timeout",
            AppError::ToolFailure { .. } => "ToolFailure",
            AppError::ParseFailure { .. } => "ParseFailure",
            AppError::PendingProvisioning(_) => "PendingProvisioning",
            AppError::Persistence(_) => "Persistence",
            AppError::Configuration(_) => "Configuration",
            AppError::Internal(_) | AppError::InternalWithSource { .. } => "Internal",
        }
    }

    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn suggested_action(&self) -> Option<&'static str> {
        app_error_static_metadata(self).3
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).4
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).5
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Database(_) => "Failed to access database".to_string(),
            AppError::InvalidInput(ref msg)
            | AppError::PayloadTooLarge(ref msg)
            | AppError::NotFound(ref msg)
            | AppError::Forbidden(ref msg)
            | AppError::Unauthorized(ref msg)
            | AppError::PendingProvisioning(ref msg) => msg.clone(),
            AppError::OutOfRange { .. }
            | AppError::Incomplete { .. }
            | AppError::Timeout { .. }
            | AppError::ParseFailure { .. } => self.to_string(),
            AppError::ToolFailure { operation, .. } => format!("{} failed", operation),
            AppError::Persistence(_) => {
                "The remote change succeeded but the piece record could not be updated".to_string()
            }
            AppError::Configuration(_) => "Service is misconfigured".to_string(),
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                "Internal server error".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_metadata_not_found() {
        let err = AppError::NotFound("Upload not found".to_string());
        assert_eq!(err.http_status_code(), 404);
        assert_eq!(err.error_code(), "NOT_FOUND");
        assert!(!err.is_recoverable());
        assert_eq!(err.client_message(), "Upload not found");
        assert_eq!(err.log_level(), LogLevel::Debug);
    }

    #[test]
    fn test_error_metadata_out_of_range() {
        let err = AppError::OutOfRange {
            index: 7,
            total_chunks: 3,
        };
        assert_eq!(err.http_status_code(), 400);
        assert_eq!(err.error_code(), "CHUNK_OUT_OF_RANGE");
        assert!(err.client_message().contains("[0, 3)"));
    }

    #[test]
    fn test_tool_failure_hides_stderr_from_clients() {
        let err = AppError::ToolFailure {
            operation: "upload-file".to_string(),
            stderr: "dial tcp 10.0.0.3:443: connection refused".to_string(),
        };
        assert!(err.is_sensitive());
        assert_eq!(err.client_message(), "upload-file failed");
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_timeout_message_includes_seconds() {
        let err = AppError::Timeout {
            operation: "prepare-piece".to_string(),
            after: Duration::from_secs(90),
        };
        assert_eq!(err.to_string(), "prepare-piece timed out after 90s");
        assert_eq!(err.error_type(), "Timeout");
    }

    #[test]
    fn test_detailed_message_includes_source_chain() {
        let err = AppError::from(anyhow::anyhow!("inner").context("outer"));
        let details = err.detailed_message();
        assert!(details.contains("Internal error with source"));
        assert!(details.contains("Caused by"));
    }
}
