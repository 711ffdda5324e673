//! Anchor persistence for spatial-anchors.
//!
//! Anchor identifiers and display names are kept in a flat key-value store
//! (the same shape as a game engine's player preferences):
//!
//! | Key | Type | Meaning |
//! |---|---|---|
//! | `numUuids` | integer | number of stored records |
//! | `uuid{i}` | string | `"<uuid>, <name>"` |
//!
//! Poses are never stored here. The tracking runtime re-resolves them from
//! the identifier on every load.
//!
//! # Usage
//!
//! ```
//! use spatial_anchors_store::{AnchorPersistenceStore, AnchorRecord, MemoryPrefs};
//! use uuid::Uuid;
//!
//! let mut store = AnchorPersistenceStore::new(MemoryPrefs::new());
//! let record = AnchorRecord::new(Uuid::new_v4(), "Anchor20240101_120000");
//! store.append(&record).unwrap();
//! assert_eq!(store.count().unwrap(), 1);
//! assert_eq!(store.read_all().unwrap(), vec![record]);
//! ```

pub mod error;
pub mod prefs;
pub mod record;
pub mod store;

pub use error::{ParseRecordError, PrefsError, Result, StoreError};
pub use prefs::{FilePrefs, KeyValueStore, MemoryPrefs, PrefValue};
pub use record::{AnchorRecord, RECORD_DELIMITER};
pub use store::AnchorPersistenceStore;
