//! Piece store setup

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use hotvault_core::Config;
use hotvault_db::{InMemoryPieceStore, PgPieceStore, PieceStore};
use sqlx::postgres::PgPoolOptions;

/// Connect to PostgreSQL and run migrations, or fall back to memory when no
/// `DATABASE_URL` is configured.
pub async fn setup_store(config: &Config) -> Result<Arc<dyn PieceStore>> {
    let Some(database_url) = config.database_url() else {
        tracing::warn!("DATABASE_URL not set; proof sets and pieces are kept in memory only");
        return Ok(Arc::new(InMemoryPieceStore::new()));
    };

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!(
        max_connections = config.db_max_connections,
        "Database connected successfully"
    );

    // Run pending migrations on startup (path: workspace migrations/ from crate root)
    let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
    let migrator = sqlx::migrate::Migrator::new(migrations_dir)
        .await
        .context("Failed to load migrations")?;
    migrator
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(Arc::new(PgPieceStore::new(pool)))
}
