//! Database layer for PaperMap
//!
//! Provides:
//! - SeaORM entity models for the five store tables
//! - Typed records crossing the normalizer/store boundary
//! - Repository with idempotent paper insertion and the unclassified anti-join
//! - Connection pool management

pub mod models;
mod records;
mod repository;

pub use records::{
    AuthorRecord, BatchReport, ClassificationRecord, DependentFailure, InsertOutcome, NormalizedPaper, RowReport,
    TermType,
};
pub use repository::{InitMode, Repository};

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

/// Database connection pool wrapper.
///
/// The pipeline is the only writer for the duration of a run, so there is a
/// single primary connection pool and no read replica.
#[derive(Clone)]
pub struct DbPool {
    primary: DatabaseConnection,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to database...");
        ensure_sqlite_dir(&config.url)?;

        let mut opts = ConnectOptions::new(&config.url);
        opts.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(false);

        let primary = Database::connect(opts)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect: {}", e),
            })?;

        info!(backend = ?primary.get_database_backend(), "Database connection established");

        Ok(Self { primary })
    }

    /// Single-connection in-memory SQLite pool (tests and dry runs).
    ///
    /// Every SQLite connection to `:memory:` sees its own database, so the
    /// pool is pinned to one connection.
    pub async fn in_memory() -> Result<Self> {
        Self::new(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            connect_timeout_secs: 5,
            idle_timeout_secs: 3600,
        })
        .await
    }

    /// Get the connection
    pub fn conn(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.primary
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Ping failed: {}", e),
            })?;

        Ok(())
    }
}

/// SQLite creates the file on `mode=rwc` but not its parent directory
fn ensure_sqlite_dir(url: &str) -> Result<()> {
    let Some(rest) = url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    let file = rest.split('?').next().unwrap_or_default();
    if file.is_empty() || file.starts_with(':') {
        return Ok(());
    }
    match std::path::Path::new(file).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir).map_err(Into::into),
        _ => Ok(()),
    }
}
