//! Runtime anchor bookkeeping.
//!
//! [`AnchorRegistry`] is the set of anchors instantiated in this process run.
//! [`AnchorSession`] owns the registry together with the persistence store and
//! drives the tracking runtime ([`AnchorProvider`]): creating and saving
//! anchors, erasing them, and reloading persisted anchors with their display
//! names and representation templates.
//!
//! Results of runtime calls arrive in any order. The session applies each one
//! as it is drained, and a pose that arrives after the bound set was wiped is
//! discarded.

pub mod error;
pub mod load;
pub mod mock;
pub mod pose;
pub mod provider;
pub mod registry;
pub mod session;
pub mod templates;

pub use error::{AnchorError, Result};
pub use load::{LoadState, LoadSummary, LoadTracker};
pub use mock::MockAnchorProvider;
pub use pose::{Pose, Quaternion, Vector3};
pub use provider::{AnchorProvider, LocalizedAnchor, ProviderError, UnboundAnchor};
pub use registry::{AnchorRegistry, BoundAnchor, CreationRequest, PendingHandle};
pub use session::{AnchorSession, AnchorSessionBuilder};
pub use templates::{AnchorTemplate, TemplateCatalog, TemplateCatalogBuilder};
