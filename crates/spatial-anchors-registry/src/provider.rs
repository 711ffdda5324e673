//! Contract consumed from the spatial tracking runtime.
//!
//! The runtime creates anchors, assigns their identifiers, persists their
//! pose state on-device and re-localizes them later. This crate only keeps
//! the bookkeeping around those calls.

use async_trait::async_trait;
use uuid::Uuid;

use crate::pose::Pose;

/// Failure reported by the tracking runtime
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("tracking runtime returned status {0}")]
    Status(String),

    #[error("anchor {0} is not known to the tracking runtime")]
    UnknownAnchor(Uuid),
}

/// A freshly created anchor that the runtime has localized
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalizedAnchor {
    pub id: Uuid,
    pub pose: Pose,
}

/// Handle to a persisted anchor that has been loaded but not yet localized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnboundAnchor {
    id: Uuid,
}

impl UnboundAnchor {
    pub fn new(id: Uuid) -> Self {
        Self { id }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// Asynchronous anchor operations offered by the tracking runtime.
///
/// Each call completes independently; completions of sibling calls carry no
/// ordering guarantee.
#[async_trait]
pub trait AnchorProvider: Send + Sync {
    /// Create an anchor at `pose` and wait until it is localized.
    async fn create_anchor(&self, pose: Pose) -> Result<LocalizedAnchor, ProviderError>;

    /// Persist the anchor's pose state on-device.
    async fn save_anchor(&self, id: Uuid) -> Result<(), ProviderError>;

    /// Erase persisted pose state for all `ids`.
    async fn erase_anchors(&self, ids: &[Uuid]) -> Result<(), ProviderError>;

    /// Look up persisted anchors. Identifiers the runtime does not know are
    /// left out of the result.
    async fn load_unbound(&self, ids: &[Uuid]) -> Result<Vec<UnboundAnchor>, ProviderError>;

    /// Localize a loaded anchor and return its pose.
    async fn localize(&self, anchor: &UnboundAnchor) -> Result<Pose, ProviderError>;
}
