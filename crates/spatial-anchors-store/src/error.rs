//! Error types for the anchor store.

use std::path::PathBuf;

/// Failures of the underlying key-value backend.
#[derive(Debug, thiserror::Error)]
pub enum PrefsError {
    #[error("I/O error on preferences file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed preferences file {path}: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Key '{key}' does not hold a {expected} value")]
    TypeMismatch { key: String, expected: &'static str },
}

/// A stored string that is not a valid `"<uuid>, <name>"` pair.
#[derive(Debug, thiserror::Error)]
pub enum ParseRecordError {
    #[error("missing \", \" delimiter")]
    MissingDelimiter,

    #[error("invalid anchor identifier '{value}': {source}")]
    InvalidIdentifier {
        value: String,
        #[source]
        source: uuid::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Corrupt anchor record at index {index} ('{value}'): {source}")]
    CorruptRecord {
        index: usize,
        value: String,
        #[source]
        source: ParseRecordError,
    },

    #[error("Anchor record at index {index} is missing from the store")]
    MissingRecord { index: usize },

    #[error("Stored anchor count is out of range: {0}")]
    InvalidCount(i64),

    #[error("Preferences backend error: {0}")]
    Backend(#[from] PrefsError),
}

pub type Result<T> = std::result::Result<T, StoreError>;
