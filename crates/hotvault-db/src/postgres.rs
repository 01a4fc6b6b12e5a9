use async_trait::async_trait;
use hotvault_core::models::{NewPiece, Piece, ProofSet};
use hotvault_core::AppError;
use sqlx::PgPool;

use crate::store::PieceStore;

/// Repository for proof sets and pieces
#[derive(Clone)]
pub struct PgPieceStore {
    pool: PgPool,
}

impl PgPieceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PieceStore for PgPieceStore {
    async fn find_proof_set(&self, owner_id: i64) -> Result<Option<ProofSet>, AppError> {
        // Use dynamic SQLx queries to avoid requiring DATABASE_URL/sqlx prepare
        let row = sqlx::query_as::<_, ProofSet>(
            r#"
            SELECT id, owner_id, proof_set_id, transaction_hash,
                   service_name, service_url, created_at, updated_at
            FROM proof_sets
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn record_proof_set_creation(
        &self,
        owner_id: i64,
        transaction_hash: &str,
        service_name: &str,
        service_url: &str,
    ) -> Result<ProofSet, AppError> {
        let row = sqlx::query_as::<_, ProofSet>(
            r#"
            INSERT INTO proof_sets (owner_id, proof_set_id, transaction_hash, service_name, service_url)
            VALUES ($1, '', $2, $3, $4)
            ON CONFLICT (owner_id) DO UPDATE
            SET transaction_hash = EXCLUDED.transaction_hash,
                service_name = EXCLUDED.service_name,
                service_url = EXCLUDED.service_url,
                updated_at = NOW()
            RETURNING id, owner_id, proof_set_id, transaction_hash,
                      service_name, service_url, created_at, updated_at
            "#,
        )
        .bind(owner_id)
        .bind(transaction_hash)
        .bind(service_name)
        .bind(service_url)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn set_remote_proof_set_id(
        &self,
        owner_id: i64,
        proof_set_id: &str,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE proof_sets
            SET proof_set_id = $2, updated_at = NOW()
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .bind(proof_set_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "No proof set recorded for owner {}",
                owner_id
            )));
        }

        Ok(())
    }

    #[tracing::instrument(skip(self, piece), fields(owner_id = piece.owner_id, cid = %piece.cid))]
    async fn create_piece(&self, piece: NewPiece) -> Result<Piece, AppError> {
        let row = sqlx::query_as::<_, Piece>(
            r#"
            INSERT INTO pieces (
                owner_id, cid, filename, size, service_name,
                service_url, proof_set_id, root_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, owner_id, cid, filename, size, service_name,
                      service_url, proof_set_id, root_id, created_at
            "#,
        )
        .bind(piece.owner_id)
        .bind(&piece.cid)
        .bind(&piece.filename)
        .bind(piece.size)
        .bind(&piece.service_name)
        .bind(&piece.service_url)
        .bind(piece.proof_set_id)
        .bind(&piece.root_id)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(piece_id = row.id, "Piece recorded");
        Ok(row)
    }

    async fn list_pieces(&self, owner_id: i64) -> Result<Vec<Piece>, AppError> {
        let rows = sqlx::query_as::<_, Piece>(
            r#"
            SELECT id, owner_id, cid, filename, size, service_name,
                   service_url, proof_set_id, root_id, created_at
            FROM pieces
            WHERE owner_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn find_piece(&self, owner_id: i64, piece_id: i64) -> Result<Option<Piece>, AppError> {
        let row = sqlx::query_as::<_, Piece>(
            r#"
            SELECT id, owner_id, cid, filename, size, service_name,
                   service_url, proof_set_id, root_id, created_at
            FROM pieces
            WHERE owner_id = $1 AND id = $2
            "#,
        )
        .bind(owner_id)
        .bind(piece_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn find_piece_by_cid(
        &self,
        owner_id: i64,
        cid: &str,
    ) -> Result<Option<Piece>, AppError> {
        let row = sqlx::query_as::<_, Piece>(
            r#"
            SELECT id, owner_id, cid, filename, size, service_name,
                   service_url, proof_set_id, root_id, created_at
            FROM pieces
            WHERE owner_id = $1 AND cid = $2
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(owner_id)
        .bind(cid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn delete_piece(&self, owner_id: i64, piece_id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM pieces WHERE owner_id = $1 AND id = $2")
            .bind(owner_id)
            .bind(piece_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
