use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An owner's proof set. `proof_set_id` stays empty until the creation
/// transaction has been confirmed on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ProofSet {
    pub id: i64,
    pub owner_id: i64,
    pub proof_set_id: String,
    pub transaction_hash: String,
    pub service_name: String,
    pub service_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProofSet {
    pub fn is_provisioned(&self) -> bool {
        !self.proof_set_id.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Piece {
    pub id: i64,
    pub owner_id: i64,
    pub cid: String,
    pub filename: String,
    pub size: i64,
    pub service_name: String,
    pub service_url: String,
    pub proof_set_id: i64,
    pub root_id: String,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to record a published piece.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPiece {
    pub owner_id: i64,
    pub cid: String,
    pub filename: String,
    pub size: i64,
    pub service_name: String,
    pub service_url: String,
    pub proof_set_id: i64,
    pub root_id: String,
}

/// Identifiers produced by a successful publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicationResult {
    pub cid: String,
    pub proof_set_id: String,
    pub record_id: String,
    pub degraded: bool,
}

/// Outcome of removing a piece's root from its proof set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootRemoval {
    pub piece_id: i64,
    pub proof_set_id: String,
    pub root_id: String,
    /// Whatever `remove-roots` printed.
    pub output: String,
}
