//! Error types shared across the crate.

use std::path::PathBuf;

/// Input rejected before any record is touched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("quality rating must be between 0 and 5, got {0}")]
    QualityOutOfRange(i64),
    #[error("{field} must be a non-negative count, got {value}")]
    InvalidCount { field: &'static str, value: i64 },
    #[error("correct answers ({correct}) exceed total attempts ({total})")]
    CorrectExceedsTotal { correct: u32, total: u32 },
    #[error("score must be between 0.0 and 1.0, got {0}")]
    ScoreOutOfRange(f64),
    #[error("invalid identifier {0:?}")]
    InvalidId(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Failures of the record store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Another writer saved the record after it was loaded
    #[error("write conflict on {path:?}: expected version {expected}, found {found}")]
    Conflict {
        path: PathBuf,
        expected: u64,
        found: u64,
    },
    /// Record is locked by a concurrent writer
    #[error("record is locked: {0:?}")]
    Locked(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Crate-level error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::Store(StoreError::Conflict { .. }) | Error::Store(StoreError::Locked(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
