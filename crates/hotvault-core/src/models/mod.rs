//! Data models for the application

mod chunked;
mod job;
mod piece;

pub use chunked::*;
pub use job::*;
pub use piece::*;
