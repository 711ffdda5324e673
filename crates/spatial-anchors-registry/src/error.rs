use spatial_anchors_store::StoreError;
use uuid::Uuid;

use crate::provider::ProviderError;

/// Failures of anchor bookkeeping.
///
/// Only [`AnchorError::MissingCollaborator`] is ever returned to callers.
/// The others describe outcomes of asynchronous requests, which are logged
/// and leave prior state untouched.
#[derive(Debug, thiserror::Error)]
pub enum AnchorError {
    #[error("Missing required collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error("Unreadable anchor store: {0}")]
    CorruptRecord(#[from] StoreError),

    #[error("Unable to create anchor '{name}': {source}")]
    CreationFailure {
        name: String,
        #[source]
        source: ProviderError,
    },

    #[error("Failed to localize anchor {id}: {source}")]
    LocalizationFailure {
        id: Uuid,
        #[source]
        source: ProviderError,
    },

    #[error("Failed to save anchor {id}: {source}")]
    SaveFailure {
        id: Uuid,
        #[source]
        source: ProviderError,
    },

    #[error("Failed to erase {count} anchor(s): {source}")]
    EraseFailure {
        count: usize,
        #[source]
        source: ProviderError,
    },
}

pub type Result<T> = std::result::Result<T, AnchorError>;
