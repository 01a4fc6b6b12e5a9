//! Hotvault Core Library
//!
//! Domain models, error types, configuration and the injectable clock shared by
//! every Hotvault crate.

pub mod clock;
pub mod config;
pub mod error;
pub mod models;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BindRetryPolicy, Config, PipelineConfig, PollSettings, RecordIdFallback, RetentionConfig,
    ToolConfig,
};
pub use error::{AppError, ErrorMetadata, LogLevel};
