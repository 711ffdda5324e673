//! Spatial anchor persistence and re-localization bookkeeping.
//!
//! This crate ties the workspace together:
//!
//! - [`config`]: TOML configuration (`spatial-anchors-config`)
//! - [`store`]: the flat key-value anchor store (`spatial-anchors-store`)
//! - [`registry`]: runtime registry and load coordinator (`spatial-anchors-registry`)
//!
//! [`open_session`] assembles a file-backed [`AnchorSession`] from an
//! [`AppConfig`].

pub mod telemetry;

pub use spatial_anchors_config as config;
pub use spatial_anchors_registry as registry;
pub use spatial_anchors_store as store;

pub use spatial_anchors_config::AppConfig;
pub use spatial_anchors_registry::{
    AnchorProvider, AnchorSession, AnchorTemplate, BoundAnchor, Pose, TemplateCatalog,
};
pub use spatial_anchors_store::{AnchorPersistenceStore, AnchorRecord, FilePrefs};
pub use uuid::Uuid;

use anyhow::{Context, Result};
use std::sync::Arc;

/// Open the configured anchor store file and build a session around it.
///
/// Must be called from within a tokio runtime.
pub fn open_session(
    config: &AppConfig,
    provider: Arc<dyn AnchorProvider>,
    catalog: TemplateCatalog,
) -> Result<AnchorSession<FilePrefs>> {
    let path = config
        .store
        .resolved_path()
        .context("No data directory for the anchor store; set store.path")?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create store directory: {}", parent.display()))?;
    }

    let prefs = FilePrefs::open(path.clone())
        .with_context(|| format!("Failed to open anchor store: {}", path.display()))?;
    let store = AnchorPersistenceStore::with_config(prefs, config.store.clone());

    let session = AnchorSession::builder()
        .provider(provider)
        .store(store)
        .catalog(catalog)
        .naming(config.naming.clone())
        .build()
        .context("Failed to assemble anchor session")?;

    tracing::info!("Opened anchor store at {}", path.display());
    Ok(session)
}
