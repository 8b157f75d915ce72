//! Error types for PaperMap
//!
//! Provides:
//! - Distinct error types for the store, progress and configuration layers
//! - Error codes for machine-readable identification in logs
//! - A retryability hint for the caller deciding whether to re-run

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Format errors (1xxx)
    InvalidFormat,

    // Resource errors (4xxx)
    PaperNotFound,

    // Conflict errors (5xxx)
    StoreAlreadyExists,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,

    // Storage errors (8xxx)
    ProgressError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::InvalidFormat => 1001,

            ErrorCode::PaperNotFound => 4001,

            ErrorCode::StoreAlreadyExists => 5001,

            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,

            ErrorCode::ProgressError => 8001,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Format errors
    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    // Resource errors
    #[error("Paper not found: {id}")]
    PaperNotFound { id: i32 },

    // Conflict errors
    #[error("Store already exists (tables present: {}); refusing destructive initialize", tables.join(", "))]
    StoreAlreadyExists { tables: Vec<String> },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // Progress file errors
    #[error("Progress store error at {path}: {message}")]
    Progress { path: String, message: String },

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::PaperNotFound { .. } => ErrorCode::PaperNotFound,
            AppError::StoreAlreadyExists { .. } => ErrorCode::StoreAlreadyExists,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::Progress { .. } => ErrorCode::ProgressError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
        }
    }

    /// Whether a later run can be expected to succeed without operator action.
    ///
    /// Startup-class failures (a live store asked to reinitialize, a broken
    /// config) halt until someone fixes them.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Database(_) | AppError::DatabaseConnection { .. } | AppError::Progress { .. }
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}
