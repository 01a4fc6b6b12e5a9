//! Persistence for proof sets and published pieces.
//!
//! The upload pipeline only talks to [`PieceStore`]. [`PgPieceStore`] backs it with
//! PostgreSQL and [`InMemoryPieceStore`] keeps everything in process memory.

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryPieceStore;
pub use postgres::PgPieceStore;
pub use store::PieceStore;
