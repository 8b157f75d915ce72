//! Ingestion service error types

use papermap_common::AppError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestionError>;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Search request for '{query}' at offset {offset} failed: {source}")]
    Transport {
        query: String,
        offset: u64,
        #[source]
        source: reqwest::Error,
    },

    #[error("Search API returned {status} for '{query}' at offset {offset}: {body}")]
    HttpStatus {
        query: String,
        offset: u64,
        status: u16,
        body: String,
    },

    #[error("Search response for '{query}' at offset {offset} has no 'articles' list")]
    MissingArticles { query: String, offset: u64 },

    #[error("Undecodable search response for '{query}' at offset {offset}: {message}")]
    Decode {
        query: String,
        offset: u64,
        message: String,
    },

    #[error("Malformed record {record}: {message}")]
    MalformedRecord { record: String, message: String },

    #[error("Classifier error: {message}")]
    Classifier { message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Store error: {0}")]
    Store(#[from] AppError),
}

impl IngestionError {
    /// Whether the next scheduled run can be expected to get past this.
    ///
    /// Only store errors can abort a run; a live store asked to reinitialize
    /// or a broken configuration needs an operator.
    pub fn is_retryable(&self) -> bool {
        match self {
            IngestionError::Store(e) => e.is_retryable(),
            IngestionError::ConfigError(_) => false,
            _ => true,
        }
    }

    pub(crate) fn malformed(record: impl Into<String>, message: impl Into<String>) -> Self {
        IngestionError::MalformedRecord {
            record: record.into(),
            message: message.into(),
        }
    }
}
