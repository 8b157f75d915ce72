//! PaperMap Common Library
//!
//! Shared code for the PaperMap harvesting pipeline including:
//! - Relational store (entities, repository, schema bootstrap)
//! - Progress tracking across runs
//! - Error types and handling
//! - Configuration management
//! - Metrics helpers

pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod progress;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{BatchReport, DbPool, InitMode, InsertOutcome, Repository};
pub use errors::{AppError, Result};
pub use progress::{Progress, ProgressStore};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Largest page the search API will serve in one request
pub const MAX_PAGE_SIZE: u32 = 200;
