//! Upload orchestration for Hotvault.
//!
//! [`UploadPipeline`] drives a staged file through the external tool,
//! [`ChunkedUploadManager`] reassembles chunked transfers, and [`Poller`] provides
//! the retry loop both rely on. Job state lives in a [`JobRegistry`]. Published pieces
//! are queried, removed and downloaded through [`PieceService`].

pub mod chunked;
pub mod pieces;
pub mod pipeline;
pub mod polling;
pub mod provision;
pub mod registry;
pub mod staging;
pub mod sweep;

pub use chunked::{AssemblyError, ChunkedUploadManager};
pub use pieces::{Download, PieceService};
pub use pipeline::{StagedFile, UploadPipeline};
pub use polling::{AttemptError, PollOutcome, PollStep, Poller};
pub use provision::ProofSetProvisioner;
pub use registry::{InMemoryJobRegistry, JobEvictionSweep, JobRegistry};
pub use sweep::{spawn_sweep, Sweeper};
