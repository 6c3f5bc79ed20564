//! I/O error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON in a run file or configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid file format.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] tracklet_core::Error),

    /// Every input of a conversion batch failed.
    #[error("all {} input files failed to convert (first: {})", .count, .first.display())]
    AllInputsFailed { count: usize, first: PathBuf },
}

impl From<tracklet_core::DecodeError> for Error {
    fn from(err: tracklet_core::DecodeError) -> Self {
        Self::CoreError(err.into())
    }
}
