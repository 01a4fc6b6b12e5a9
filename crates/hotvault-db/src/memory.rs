use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use hotvault_core::models::{NewPiece, Piece, ProofSet};
use hotvault_core::AppError;
use tokio::sync::RwLock;

use crate::store::PieceStore;

/// Process-local store used when no database is configured, and by tests.
#[derive(Default)]
pub struct InMemoryPieceStore {
    proof_sets: RwLock<HashMap<i64, ProofSet>>,
    pieces: RwLock<Vec<Piece>>,
    next_id: AtomicI64,
}

impl InMemoryPieceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Seed a proof set directly. An empty `proof_set_id` means "not provisioned".
    pub async fn insert_proof_set(&self, owner_id: i64, proof_set_id: &str) -> ProofSet {
        let now = Utc::now();
        let proof_set = ProofSet {
            id: self.allocate_id(),
            owner_id,
            proof_set_id: proof_set_id.to_string(),
            transaction_hash: String::new(),
            service_name: String::new(),
            service_url: String::new(),
            created_at: now,
            updated_at: now,
        };
        self.proof_sets
            .write()
            .await
            .insert(owner_id, proof_set.clone());
        proof_set
    }
}

#[async_trait]
impl PieceStore for InMemoryPieceStore {
    async fn find_proof_set(&self, owner_id: i64) -> Result<Option<ProofSet>, AppError> {
        Ok(self.proof_sets.read().await.get(&owner_id).cloned())
    }

    async fn record_proof_set_creation(
        &self,
        owner_id: i64,
        transaction_hash: &str,
        service_name: &str,
        service_url: &str,
    ) -> Result<ProofSet, AppError> {
        let now = Utc::now();
        let mut proof_sets = self.proof_sets.write().await;
        let id = match proof_sets.get(&owner_id) {
            Some(existing) => existing.id,
            None => self.allocate_id(),
        };
        let proof_set = ProofSet {
            id,
            owner_id,
            proof_set_id: proof_sets
                .get(&owner_id)
                .map(|p| p.proof_set_id.clone())
                .unwrap_or_default(),
            transaction_hash: transaction_hash.to_string(),
            service_name: service_name.to_string(),
            service_url: service_url.to_string(),
            created_at: proof_sets
                .get(&owner_id)
                .map(|p| p.created_at)
                .unwrap_or(now),
            updated_at: now,
        };
        proof_sets.insert(owner_id, proof_set.clone());
        Ok(proof_set)
    }

    async fn set_remote_proof_set_id(
        &self,
        owner_id: i64,
        proof_set_id: &str,
    ) -> Result<(), AppError> {
        let mut proof_sets = self.proof_sets.write().await;
        let proof_set = proof_sets.get_mut(&owner_id).ok_or_else(|| {
            AppError::NotFound(format!("No proof set recorded for owner {}", owner_id))
        })?;
        proof_set.proof_set_id = proof_set_id.to_string();
        proof_set.updated_at = Utc::now();
        Ok(())
    }

    async fn create_piece(&self, piece: NewPiece) -> Result<Piece, AppError> {
        let record = Piece {
            id: self.allocate_id(),
            owner_id: piece.owner_id,
            cid: piece.cid,
            filename: piece.filename,
            size: piece.size,
            service_name: piece.service_name,
            service_url: piece.service_url,
            proof_set_id: piece.proof_set_id,
            root_id: piece.root_id,
            created_at: Utc::now(),
        };
        self.pieces.write().await.push(record.clone());
        Ok(record)
    }

    async fn list_pieces(&self, owner_id: i64) -> Result<Vec<Piece>, AppError> {
        Ok(self
            .pieces
            .read()
            .await
            .iter()
            .rev()
            .filter(|p| p.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn find_piece(&self, owner_id: i64, piece_id: i64) -> Result<Option<Piece>, AppError> {
        Ok(self
            .pieces
            .read()
            .await
            .iter()
            .find(|p| p.owner_id == owner_id && p.id == piece_id)
            .cloned())
    }

    async fn find_piece_by_cid(
        &self,
        owner_id: i64,
        cid: &str,
    ) -> Result<Option<Piece>, AppError> {
        Ok(self
            .pieces
            .read()
            .await
            .iter()
            .rev()
            .find(|p| p.owner_id == owner_id && p.cid == cid)
            .cloned())
    }

    async fn delete_piece(&self, owner_id: i64, piece_id: i64) -> Result<bool, AppError> {
        let mut pieces = self.pieces.write().await;
        let before = pieces.len();
        pieces.retain(|p| !(p.owner_id == owner_id && p.id == piece_id));
        Ok(pieces.len() != before)
    }
}
