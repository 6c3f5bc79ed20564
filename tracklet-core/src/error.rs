//! Error types for tracklet-core.

use thiserror::Error;

/// Result type alias for tracklet operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while decoding or encoding packed cell identifiers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// A field value does not fit in its declared width.
    #[error("field `{field}` value {value} does not fit in {width} bits")]
    FieldOverflow {
        field: &'static str,
        value: u64,
        width: u8,
    },

    /// Two bit fields share at least one bit.
    #[error("bit fields `{first}` and `{second}` overlap")]
    Overlap {
        first: &'static str,
        second: &'static str,
    },

    /// A bit field is empty, too wide, or runs past bit 63.
    #[error("bit field `{field}` at offset {offset} with width {width} is out of range")]
    FieldRange {
        field: &'static str,
        offset: u8,
        width: u8,
    },

    /// The textual encoding could not be parsed.
    #[error("invalid cell ID encoding: {0}")]
    InvalidEncoding(String),
}

/// Core error types for tracklet operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Cell ID decoding error.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A stage produced no rows after filtering.
    #[error("{stage} produced no output ({context})")]
    EmptyResult {
        stage: &'static str,
        context: String,
    },
}

impl Error {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }
}
