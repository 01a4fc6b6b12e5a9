use async_trait::async_trait;
use hotvault_core::models::{NewPiece, Piece, ProofSet};
use hotvault_core::AppError;

/// Durable records the pipeline reads and writes.
#[async_trait]
pub trait PieceStore: Send + Sync {
    /// The owner's proof set, provisioned or not.
    async fn find_proof_set(&self, owner_id: i64) -> Result<Option<ProofSet>, AppError>;

    /// Record a proof-set creation transaction. The remote id stays empty until
    /// [`PieceStore::set_remote_proof_set_id`] is called.
    async fn record_proof_set_creation(
        &self,
        owner_id: i64,
        transaction_hash: &str,
        service_name: &str,
        service_url: &str,
    ) -> Result<ProofSet, AppError>;

    async fn set_remote_proof_set_id(
        &self,
        owner_id: i64,
        proof_set_id: &str,
    ) -> Result<(), AppError>;

    async fn create_piece(&self, piece: NewPiece) -> Result<Piece, AppError>;

    /// The owner's pieces, newest first.
    async fn list_pieces(&self, owner_id: i64) -> Result<Vec<Piece>, AppError>;

    async fn find_piece(&self, owner_id: i64, piece_id: i64) -> Result<Option<Piece>, AppError>;

    /// Lookup by the full stored CID (`base:sub`).
    async fn find_piece_by_cid(&self, owner_id: i64, cid: &str)
        -> Result<Option<Piece>, AppError>;

    /// Returns `false` when the owner has no such piece.
    async fn delete_piece(&self, owner_id: i64, piece_id: i64) -> Result<bool, AppError>;
}
