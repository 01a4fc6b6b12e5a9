//! Adapter for the external `pdptool` binary.
//!
//! [`runner`] executes subprocesses, [`pdptool`] knows the command contract and
//! [`parser`] recovers identifiers from the text the tool prints.

pub mod parser;
pub mod pdptool;
pub mod runner;

pub use pdptool::{prepare_timeout, upload_timeout, PdpTool, SERVICE_SECRET_FILE};
pub use runner::{CommandRunner, ToolCommand, ToolError, ToolOutput, ToolRunner};
