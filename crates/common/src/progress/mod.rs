//! Per-category pagination progress
//!
//! A JSON object on disk mapping category name to the next zero-based offset
//! to fetch. Loading never fails the pipeline: a missing or unreadable file
//! yields an empty map. Saving writes a sibling temp file and renames it over
//! the target, so a crash mid-save leaves the previous state intact.

use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Category name to next offset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Progress(BTreeMap<String, u64>);

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next offset for a category; unseen categories start at zero
    pub fn offset(&self, category: &str) -> u64 {
        self.0.get(category).copied().unwrap_or(0)
    }

    /// Move a category forward to `offset`.
    ///
    /// Offsets never move backwards; a lower value is ignored and the
    /// current one returned.
    pub fn advance_to(&mut self, category: &str, offset: u64) -> u64 {
        let entry = self.0.entry(category.to_string()).or_insert(0);
        if offset > *entry {
            *entry = offset;
        } else if offset < *entry {
            warn!(category, current = *entry, requested = offset, "Ignoring backwards progress update");
        }
        *entry
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, u64)> for Progress {
    fn from_iter<T: IntoIterator<Item = (String, u64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Durable progress file
#[derive(Debug, Clone)]
pub struct ProgressStore {
    path: PathBuf,
}

impl ProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the progress file, falling back to an empty map
    pub fn load(&self) -> Progress {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "Progress file not found, starting from scratch");
                return Progress::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Progress file unreadable, starting from scratch");
                return Progress::new();
            }
        };

        match serde_json::from_str::<Progress>(&raw) {
            Ok(progress) => {
                debug!(path = %self.path.display(), categories = progress.0.len(), "Progress loaded");
                progress
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Progress file corrupt, starting from scratch");
                Progress::new()
            }
        }
    }

    /// Atomically replace the progress file
    pub fn save(&self, progress: &Progress) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| self.error(e))?;

        let body = serde_json::to_vec_pretty(progress)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| self.error(e))?;
        tmp.write_all(&body).map_err(|e| self.error(e))?;
        tmp.as_file().sync_all().map_err(|e| self.error(e))?;
        tmp.persist(&self.path).map_err(|e| self.error(e.error))?;

        debug!(path = %self.path.display(), "Progress saved");
        Ok(())
    }

    fn error(&self, err: std::io::Error) -> AppError {
        AppError::Progress {
            path: self.path.display().to_string(),
            message: err.to_string(),
        }
    }
}
