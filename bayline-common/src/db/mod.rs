//! Database pool initialization and schema

pub mod models;
pub mod schema;

pub use models::*;
pub use schema::init_schema;

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Initialize the database connection pool and create tables if needed.
///
/// Enables foreign keys, WAL journaling (concurrent readers with one
/// writer during parallel import), and a busy timeout on every connection.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000));

    // Pool sized for the parallel import workflow
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    schema::init_schema(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory pool with the schema applied.
///
/// Every fresh connection to `sqlite::memory:` sees its own empty database,
/// so the pool is capped at one connection to keep the schema visible to
/// all queries. Intended for tests.
pub async fn memory_pool() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    schema::init_schema(&pool).await?;

    Ok(pool)
}
