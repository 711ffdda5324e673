//! Anchor session: the single owner of registry, store and in-flight requests.
//!
//! Every tracking-runtime call is spawned as a task that posts a
//! [`Completion`] back onto a queue. Only the session applies completions
//! (from [`AnchorSession::process_completions`] or
//! [`AnchorSession::run_until_idle`]), so all registry and store mutation
//! happens on the owner's thread of control. Dropping the session aborts the
//! tasks and closes the queue; nothing can touch a torn-down registry.

use chrono::Local;
use spatial_anchors_config::NamingConfig;
use spatial_anchors_store::{AnchorPersistenceStore, AnchorRecord, KeyValueStore};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use uuid::Uuid;

use crate::error::{AnchorError, Result};
use crate::load::{LoadState, LoadSummary, LoadTracker};
use crate::pose::Pose;
use crate::provider::{AnchorProvider, LocalizedAnchor, ProviderError, UnboundAnchor};
use crate::registry::{AnchorRegistry, BoundAnchor, PendingHandle};
use crate::templates::TemplateCatalog;

const FALLBACK_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug)]
enum EraseScope {
    Single(Uuid),
    /// Every identifier known when the erase was issued
    All(Vec<Uuid>),
}

#[derive(Debug)]
enum Completion {
    Created {
        handle: PendingHandle,
        result: std::result::Result<LocalizedAnchor, ProviderError>,
    },
    Saved {
        id: Uuid,
        name: String,
        result: std::result::Result<(), ProviderError>,
    },
    Erased {
        scope: EraseScope,
        result: std::result::Result<(), ProviderError>,
    },
    Unbound {
        generation: u64,
        requested: Vec<Uuid>,
        result: std::result::Result<Vec<UnboundAnchor>, ProviderError>,
    },
    Localized {
        generation: u64,
        id: Uuid,
        result: std::result::Result<Pose, ProviderError>,
    },
}

enum Wake {
    Completion(Option<Completion>),
    Joined(Option<std::result::Result<(), JoinError>>),
}

/// Top-level anchor bookkeeping for one process run.
pub struct AnchorSession<K> {
    provider: Arc<dyn AnchorProvider>,
    registry: AnchorRegistry,
    store: AnchorPersistenceStore<K>,
    catalog: TemplateCatalog,
    naming: NamingConfig,
    loads: LoadTracker,
    /// Bumped whenever the bound set is wiped; older localizations are dropped.
    generation: u64,
    /// Identifiers the runtime confirmed erased; late poses for them are dropped.
    erased: HashSet<Uuid>,
    runtime: Handle,
    tasks: JoinSet<()>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    in_flight: usize,
}

impl<K: KeyValueStore> AnchorSession<K> {
    pub fn builder() -> AnchorSessionBuilder<K> {
        AnchorSessionBuilder::new()
    }

    pub fn registry(&self) -> &AnchorRegistry {
        &self.registry
    }

    pub fn store(&self) -> &AnchorPersistenceStore<K> {
        &self.store
    }

    /// Direct store access, bypassing the session's bookkeeping.
    pub fn store_mut(&mut self) -> &mut AnchorPersistenceStore<K> {
        &mut self.store
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    pub fn load_state(&self, id: Uuid) -> Option<LoadState> {
        self.loads.state(id)
    }

    pub fn load_summary(&self) -> LoadSummary {
        self.loads.summary()
    }

    /// Number of runtime requests whose completion has not been applied yet
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight == 0
    }

    /// Ask the runtime to create and localize an anchor at `pose`.
    ///
    /// Without a hint the anchor is named from the configured prefix and the
    /// current local time. With `save_requested` the anchor is saved and
    /// recorded in the store once it is localized.
    pub fn request_anchor(
        &mut self,
        pose: Pose,
        name_hint: Option<&str>,
        save_requested: bool,
    ) -> PendingHandle {
        let name = match name_hint {
            Some(hint) if !hint.is_empty() => hint.to_string(),
            _ => self.generate_name(),
        };
        tracing::debug!("Requesting anchor '{}' (save: {})", name, save_requested);

        let handle = self
            .registry
            .resolve_creation_request(name, save_requested, pose);
        let provider = Arc::clone(&self.provider);
        self.dispatch(async move {
            Completion::Created {
                handle,
                result: provider.create_anchor(pose).await,
            }
        });
        handle
    }

    /// Save a bound anchor with the runtime and, on success, record it.
    pub fn save_anchor(&mut self, id: Uuid) -> bool {
        let Some(anchor) = self.registry.get(id) else {
            tracing::warn!("No bound anchor {} to save", id);
            return false;
        };
        let name = anchor
            .name
            .clone()
            .unwrap_or_else(|| anchor.template.clone());
        self.dispatch_save(id, name);
        true
    }

    pub fn save_last_created(&mut self) -> bool {
        match self.registry.last_created() {
            Some(id) => self.save_anchor(id),
            None => {
                tracing::warn!("No anchor to save");
                false
            }
        }
    }

    /// Erase the most recently created anchor from the runtime and drop it
    /// from the registry. The store keeps its record.
    pub fn erase_last_created(&mut self) -> bool {
        let Some(id) = self.registry.last_created() else {
            tracing::warn!("No anchor to unsave");
            return false;
        };
        let provider = Arc::clone(&self.provider);
        self.dispatch(async move {
            Completion::Erased {
                scope: EraseScope::Single(id),
                result: provider.erase_anchors(&[id]).await,
            }
        });
        true
    }

    /// Erase every known anchor from the runtime, then drop those anchors
    /// from the registry and the store. On failure nothing changes.
    ///
    /// Only the anchors known now are affected. Anchors created or saved
    /// while the erase is in flight survive it.
    pub fn erase_all(&mut self) {
        let mut ids: Vec<Uuid> = Vec::new();
        let mut seen = HashSet::new();
        let stored = match self.store.read_all_lenient() {
            Ok(records) => records.into_iter().map(|r| r.id).collect(),
            Err(err) => {
                tracing::warn!("Erasing without stored identifiers: {}", err);
                Vec::new()
            }
        };
        let candidates = self
            .registry
            .bound_ids()
            .into_iter()
            .chain(self.registry.pending_uuids().iter().copied())
            .chain(stored);
        for id in candidates {
            if seen.insert(id) {
                ids.push(id);
            }
        }

        if ids.is_empty() {
            // Only unreadable entries can be left.
            if let Err(err) = self.store.clear_all() {
                tracing::error!("Failed to clear anchor store: {}", err);
            }
            return;
        }

        let provider = Arc::clone(&self.provider);
        self.dispatch(async move {
            let result = provider.erase_anchors(&ids).await;
            Completion::Erased {
                scope: EraseScope::All(ids),
                result,
            }
        });
    }

    /// Drop every runtime anchor without touching persisted state.
    pub fn despawn_all(&mut self) -> usize {
        self.generation += 1;
        self.loads.clear();
        let removed = self.registry.clear_bound().len();
        tracing::info!("Despawned {} anchors", removed);
        removed
    }

    /// Load and localize every anchor recorded in the store.
    ///
    /// Returns the number of identifiers submitted. An unreadable store is
    /// logged and nothing is submitted.
    pub fn load_persisted(&mut self) -> usize {
        match self.store.read_identifiers() {
            Ok(ids) => self.submit_load(ids),
            Err(err) => {
                tracing::error!("{}", AnchorError::CorruptRecord(err));
                0
            }
        }
    }

    /// Load and localize the anchors saved during this session.
    pub fn load_session_anchors(&mut self) -> usize {
        let ids: Vec<Uuid> = self.registry.pending_uuids().iter().copied().collect();
        self.submit_load(ids)
    }

    /// Apply every completion that has already arrived, without waiting.
    pub fn process_completions(&mut self) -> usize {
        self.reap_tasks();
        let mut applied = 0;
        while let Ok(completion) = self.completion_rx.try_recv() {
            self.apply(completion);
            applied += 1;
        }
        applied
    }

    /// Wait for and apply completions until no request is in flight,
    /// including requests issued while applying.
    pub async fn run_until_idle(&mut self) -> usize {
        let mut applied = self.process_completions();
        while self.in_flight > 0 {
            if self.tasks.is_empty() {
                // Every task has finished, so any remaining completion is
                // already queued.
                applied += self.process_completions();
                if self.in_flight > 0 {
                    tracing::warn!("{} anchor requests ended without a result", self.in_flight);
                    self.in_flight = 0;
                }
                break;
            }

            let wake = tokio::select! {
                completion = self.completion_rx.recv() => Wake::Completion(completion),
                joined = self.tasks.join_next() => Wake::Joined(joined),
            };
            match wake {
                Wake::Completion(Some(completion)) => {
                    self.apply(completion);
                    applied += 1;
                }
                Wake::Completion(None) => break,
                Wake::Joined(Some(result)) => self.on_task_joined(result),
                Wake::Joined(None) => {}
            }
        }
        applied
    }

    /// Abort in-flight requests and tear the session down.
    pub fn shutdown(mut self) {
        if self.in_flight > 0 {
            tracing::info!("Discarding {} in-flight anchor requests", self.in_flight);
        }
        self.tasks.abort_all();
        self.completion_rx.close();
    }

    fn generate_name(&self) -> String {
        let now = Local::now();
        let mut name = self.naming.prefix.clone();
        if write!(name, "{}", now.format(&self.naming.timestamp_format)).is_err() {
            tracing::warn!(
                "Invalid naming.timestamp_format '{}', using default",
                self.naming.timestamp_format
            );
            name = self.naming.prefix.clone();
            let _ = write!(name, "{}", now.format(FALLBACK_TIMESTAMP_FORMAT));
        }
        name
    }

    fn dispatch<F>(&mut self, request: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let tx = self.completion_tx.clone();
        self.in_flight += 1;
        self.tasks.spawn_on(
            async move {
                let completion = request.await;
                if tx.send(completion).is_err() {
                    tracing::trace!("Anchor session closed, dropping completion");
                }
            },
            &self.runtime,
        );
    }

    fn dispatch_save(&mut self, id: Uuid, name: String) {
        let provider = Arc::clone(&self.provider);
        self.dispatch(async move {
            Completion::Saved {
                id,
                name,
                result: provider.save_anchor(id).await,
            }
        });
    }

    fn dispatch_localize(&mut self, generation: u64, anchor: UnboundAnchor) {
        let provider = Arc::clone(&self.provider);
        self.dispatch(async move {
            Completion::Localized {
                generation,
                id: anchor.id(),
                result: provider.localize(&anchor).await,
            }
        });
    }

    fn submit_load(&mut self, ids: Vec<Uuid>) -> usize {
        if ids.is_empty() {
            tracing::info!("No anchors to load");
            return 0;
        }

        let requested = self.loads.request(ids);
        self.loads.begin_localizing(&requested);
        let count = requested.len();
        let generation = self.generation;
        let provider = Arc::clone(&self.provider);
        self.dispatch(async move {
            let result = provider.load_unbound(&requested).await;
            Completion::Unbound {
                generation,
                requested,
                result,
            }
        });
        tracing::debug!("Submitted {} anchors for localization", count);
        count
    }

    fn reap_tasks(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            self.on_task_joined(result);
        }
    }

    fn on_task_joined(&mut self, result: std::result::Result<(), JoinError>) {
        if let Err(err) = result {
            // The task never posted its completion.
            tracing::error!("Anchor request task failed: {}", err);
            self.in_flight = self.in_flight.saturating_sub(1);
        }
    }

    /// Forget anchors the runtime no longer has.
    fn drop_erased(&mut self, ids: &[Uuid]) {
        for id in ids {
            self.registry.unregister(*id);
            self.registry.forget_persistent(*id);
            self.loads.forget(*id);
            self.erased.insert(*id);
        }
    }

    fn append_record(&mut self, id: Uuid, name: String) {
        match self.store.find_by_identifier(id) {
            Ok(Some(_)) => {
                tracing::debug!("Anchor {} already recorded", id);
                return;
            }
            Ok(None) => {}
            Err(err) => tracing::warn!("Recording anchor {} into unreadable store: {}", id, err),
        }
        if let Err(err) = self.store.append(&AnchorRecord::new(id, name)) {
            tracing::error!("Failed to record anchor {}: {}", id, err);
        }
    }

    fn lookup_name(&self, id: Uuid) -> Option<String> {
        match self.store.find_by_identifier(id) {
            Ok(record) => record.map(|r| r.name),
            Err(err) => {
                tracing::warn!("Name lookup for anchor {} failed: {}", id, err);
                None
            }
        }
    }

    fn apply(&mut self, completion: Completion) {
        self.in_flight = self.in_flight.saturating_sub(1);

        match completion {
            Completion::Created { handle, result } => {
                let Some(request) = self.registry.take_creation(handle) else {
                    tracing::debug!("Dropping completion for unknown creation {:?}", handle);
                    return;
                };
                match result {
                    Ok(anchor) => {
                        let template = self.catalog.resolve(Some(request.name.as_str())).name.clone();
                        self.registry.register_bound(BoundAnchor {
                            id: anchor.id,
                            name: Some(request.name.clone()),
                            pose: anchor.pose,
                            template,
                        });
                        self.registry.set_last_created(anchor.id);
                        tracing::info!("Created anchor '{}' with UUID {}", request.name, anchor.id);

                        if request.save_requested {
                            self.dispatch_save(anchor.id, request.name);
                        }
                    }
                    Err(source) => {
                        let name = request.name;
                        tracing::error!("{}", AnchorError::CreationFailure { name, source });
                    }
                }
            }

            Completion::Saved { id, name, result } => match result {
                Ok(()) => {
                    tracing::info!("Saved anchor with UUID {}", id);
                    if self.registry.mark_persistent(id) {
                        self.append_record(id, name);
                    }
                }
                Err(source) => tracing::warn!("{}", AnchorError::SaveFailure { id, source }),
            },

            Completion::Erased { scope, result } => match (scope, result) {
                (EraseScope::Single(id), Ok(())) => {
                    self.drop_erased(&[id]);
                    tracing::info!("Unsaved anchor with UUID {}", id);
                }
                (EraseScope::All(ids), Ok(())) => {
                    self.drop_erased(&ids);
                    let erased: HashSet<Uuid> = ids.iter().copied().collect();
                    if let Err(err) = self.store.retain(|r| !erased.contains(&r.id)) {
                        tracing::error!("Failed to remove erased anchors from store: {}", err);
                    }
                    tracing::info!("All {} anchors unsaved and cleared", ids.len());
                }
                (EraseScope::Single(_), Err(source)) => {
                    tracing::warn!("{}", AnchorError::EraseFailure { count: 1, source });
                }
                (EraseScope::All(ids), Err(source)) => {
                    let count = ids.len();
                    tracing::warn!("{}", AnchorError::EraseFailure { count, source });
                }
            },

            Completion::Unbound {
                generation,
                requested,
                result,
            } => {
                if generation != self.generation {
                    tracing::debug!("Dropping stale load of {} anchors", requested.len());
                    return;
                }
                match result {
                    Ok(unbound) => {
                        let returned: HashSet<Uuid> = unbound.iter().map(|a| a.id()).collect();
                        tracing::info!("Loaded {} of {} anchors", returned.len(), requested.len());
                        for id in requested.iter().filter(|id| !returned.contains(id)) {
                            self.loads.finish(*id, false);
                            let source = ProviderError::UnknownAnchor(*id);
                            tracing::warn!("{}", AnchorError::LocalizationFailure { id: *id, source });
                        }
                        for anchor in unbound {
                            if self.erased.contains(&anchor.id()) {
                                self.loads.finish(anchor.id(), false);
                                continue;
                            }
                            self.dispatch_localize(generation, anchor);
                        }
                    }
                    Err(source) => {
                        for id in &requested {
                            self.loads.finish(*id, false);
                        }
                        tracing::error!("Failed to load anchors: {}", source);
                    }
                }
            }

            Completion::Localized {
                generation,
                id,
                result,
            } => {
                if generation != self.generation || self.erased.contains(&id) {
                    tracing::debug!("Dropping stale localization of {}", id);
                    return;
                }
                match result {
                    Ok(pose) => {
                        let name = self.lookup_name(id);
                        let template = self.catalog.resolve(name.as_deref()).name.clone();
                        tracing::info!(
                            "Localized anchor with UUID {} and name {}",
                            id,
                            name.as_deref().unwrap_or("<none>")
                        );
                        self.registry.register_bound(BoundAnchor {
                            id,
                            name,
                            pose,
                            template,
                        });
                        self.loads.finish(id, true);
                    }
                    Err(source) => {
                        self.loads.finish(id, false);
                        tracing::warn!("{}", AnchorError::LocalizationFailure { id, source });
                    }
                }
            }
        }
    }
}

/// Assembles an [`AnchorSession`] from its collaborators.
pub struct AnchorSessionBuilder<K> {
    provider: Option<Arc<dyn AnchorProvider>>,
    store: Option<AnchorPersistenceStore<K>>,
    catalog: Option<TemplateCatalog>,
    naming: NamingConfig,
    runtime: Option<Handle>,
}

impl<K: KeyValueStore> AnchorSessionBuilder<K> {
    pub fn new() -> Self {
        Self {
            provider: None,
            store: None,
            catalog: None,
            naming: NamingConfig::default(),
            runtime: None,
        }
    }

    pub fn provider(mut self, provider: Arc<dyn AnchorProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn store(mut self, store: AnchorPersistenceStore<K>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn catalog(mut self, catalog: TemplateCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn naming(mut self, naming: NamingConfig) -> Self {
        self.naming = naming;
        self
    }

    /// Runtime that request tasks are spawned on. Defaults to the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Fails with [`AnchorError::MissingCollaborator`] if anything required is unset.
    pub fn build(self) -> Result<AnchorSession<K>> {
        let provider = self
            .provider
            .ok_or(AnchorError::MissingCollaborator("anchor provider"))?;
        let store = self
            .store
            .ok_or(AnchorError::MissingCollaborator("anchor store"))?;
        let catalog = self
            .catalog
            .ok_or(AnchorError::MissingCollaborator("anchor template catalog"))?;
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current()
                .map_err(|_| AnchorError::MissingCollaborator("tokio runtime"))?,
        };

        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Ok(AnchorSession {
            provider,
            registry: AnchorRegistry::new(),
            store,
            catalog,
            naming: self.naming,
            loads: LoadTracker::new(),
            generation: 0,
            erased: HashSet::new(),
            runtime,
            tasks: JoinSet::new(),
            completion_tx,
            completion_rx,
            in_flight: 0,
        })
    }
}

impl<K: KeyValueStore> Default for AnchorSessionBuilder<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockAnchorProvider;
    use crate::pose::{Quaternion, Vector3};
    use crate::templates::AnchorTemplate;
    use spatial_anchors_store::MemoryPrefs;
    use std::time::Duration;

    fn catalog() -> TemplateCatalog {
        TemplateCatalog::builder()
            .template(AnchorTemplate::new("North_marker"))
            .default_template(AnchorTemplate::new("generic"))
            .build()
            .unwrap()
    }

    fn session_with(
        provider: Arc<MockAnchorProvider>,
        store: AnchorPersistenceStore<MemoryPrefs>,
    ) -> AnchorSession<MemoryPrefs> {
        AnchorSession::builder()
            .provider(provider)
            .store(store)
            .catalog(catalog())
            .build()
            .unwrap()
    }

    fn session(provider: Arc<MockAnchorProvider>) -> AnchorSession<MemoryPrefs> {
        session_with(provider, AnchorPersistenceStore::new(MemoryPrefs::new()))
    }

    fn pose(x: f32) -> Pose {
        Pose::new(Vector3::new(x, 1.5, 2.0), Quaternion::from_yaw(0.5))
    }

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    /// Store with records for the given ids, plus a provider that has them
    /// persisted on-device.
    fn seeded(entries: &[(u128, &str)]) -> (MockAnchorProvider, AnchorPersistenceStore<MemoryPrefs>) {
        let mut store = AnchorPersistenceStore::new(MemoryPrefs::new());
        let mut provider = MockAnchorProvider::new();
        for (n, name) in entries {
            store.append(&AnchorRecord::new(id(*n), *name)).unwrap();
            provider = provider.with_persisted(id(*n), pose(*n as f32));
        }
        (provider, store)
    }

    #[tokio::test]
    async fn test_create_and_save() {
        let provider = Arc::new(MockAnchorProvider::new());
        let mut session = session(provider.clone());

        session.request_anchor(pose(1.0), Some("Wall"), true);
        assert_eq!(session.in_flight(), 1);
        session.run_until_idle().await;

        assert_eq!(session.registry().len(), 1);
        let anchor = session.registry().bound()[0].clone();
        assert_eq!(anchor.name.as_deref(), Some("Wall"));
        assert_eq!(anchor.template, "generic");
        assert_eq!(anchor.pose, pose(1.0));
        assert_eq!(session.registry().last_created(), Some(anchor.id));
        assert!(session.registry().is_persistent(anchor.id));

        let records = session.store().read_all().unwrap();
        assert_eq!(records, vec![AnchorRecord::new(anchor.id, "Wall")]);
        assert!(provider.is_persisted(anchor.id));
        assert!(session.is_idle());
    }

    #[tokio::test]
    async fn test_create_without_save() {
        let provider = Arc::new(MockAnchorProvider::new());
        let mut session = session(provider.clone());

        session.request_anchor(pose(1.0), Some("Transient"), false);
        session.run_until_idle().await;

        assert_eq!(session.registry().len(), 1);
        assert!(session.registry().pending_uuids().is_empty());
        assert_eq!(session.store().count().unwrap(), 0);
        assert!(provider.save_calls().is_empty());
    }

    #[tokio::test]
    async fn test_generated_name() {
        let provider = Arc::new(MockAnchorProvider::new());
        let mut session = session(provider);

        session.request_anchor(pose(1.0), None, false);
        session.run_until_idle().await;

        let name = session.registry().bound()[0].name.clone().unwrap();
        assert!(name.starts_with("Anchor"));
        // "Anchor" + "YYYYmmdd_HHMMSS"
        assert_eq!(name.len(), "Anchor".len() + 15);
    }

    #[tokio::test]
    async fn test_creation_failure_is_discarded() {
        let provider = Arc::new(MockAnchorProvider::new().failing_creates());
        let mut session = session(provider);

        session.request_anchor(pose(1.0), Some("Wall"), true);
        session.run_until_idle().await;

        assert!(session.registry().is_empty());
        assert_eq!(session.registry().pending_creations(), 0);
        assert_eq!(session.store().count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_save_failure_leaves_state() {
        let provider = Arc::new(MockAnchorProvider::new().failing_saves());
        let mut session = session(provider.clone());

        session.request_anchor(pose(1.0), Some("Wall"), true);
        session.run_until_idle().await;

        assert_eq!(session.registry().len(), 1);
        assert!(session.registry().pending_uuids().is_empty());
        assert_eq!(session.store().count().unwrap(), 0);
        assert_eq!(provider.save_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_save_records_once() {
        let provider = Arc::new(MockAnchorProvider::new());
        let mut session = session(provider.clone());

        session.request_anchor(pose(1.0), Some("Wall"), true);
        session.run_until_idle().await;
        assert!(session.save_last_created());
        session.run_until_idle().await;

        assert_eq!(provider.save_calls().len(), 2);
        assert_eq!(session.store().count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_nothing_to_save_or_erase() {
        let provider = Arc::new(MockAnchorProvider::new());
        let mut session = session(provider);

        assert!(!session.save_last_created());
        assert!(!session.erase_last_created());
        assert!(!session.save_anchor(id(42)));
        assert!(session.is_idle());
    }

    #[tokio::test]
    async fn test_load_out_of_order_completions() {
        let (provider, store) = seeded(&[(1, "North"), (2, "South"), (3, "West")]);
        let provider = Arc::new(
            provider
                .with_localize_delay(id(1), Duration::from_millis(30))
                .with_localize_delay(id(3), Duration::from_millis(10)),
        );
        let mut session = session_with(provider, store);

        assert_eq!(session.load_persisted(), 3);
        assert_eq!(session.load_state(id(1)), Some(LoadState::Localizing));
        session.run_until_idle().await;

        // Completion order was 2, 3, 1.
        let ids = session.registry().bound_ids();
        assert_eq!(ids, vec![id(2), id(3), id(1)]);
        for n in 1..=3 {
            assert_eq!(session.load_state(id(n)), Some(LoadState::Bound));
        }

        let north = session.registry().get(id(1)).unwrap();
        assert_eq!(north.name.as_deref(), Some("North"));
        assert_eq!(north.template, "North_marker");
        assert_eq!(north.pose, pose(1.0));
        let south = session.registry().find_by_name("South").unwrap();
        assert_eq!(south.template, "generic");
    }

    #[tokio::test]
    async fn test_duplicate_records_load_once() {
        let (provider, store) = seeded(&[(1, "North"), (1, "North again")]);
        let mut session = session_with(Arc::new(provider), store);

        assert_eq!(session.load_persisted(), 1);
        session.run_until_idle().await;
        assert_eq!(session.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_localization_failure_keeps_record() {
        let (provider, store) = seeded(&[(1, "North"), (2, "South")]);
        let provider = Arc::new(provider.with_unlocalizable(id(2)));
        let mut session = session_with(provider, store);

        session.load_persisted();
        session.run_until_idle().await;

        assert_eq!(session.registry().bound_ids(), vec![id(1)]);
        assert_eq!(session.load_state(id(2)), Some(LoadState::Failed));
        assert_eq!(session.store().count().unwrap(), 2);
        assert_eq!(
            session.load_summary(),
            LoadSummary {
                bound: 1,
                failed: 1,
                ..LoadSummary::default()
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_to_runtime_fails() {
        let mut store = AnchorPersistenceStore::new(MemoryPrefs::new());
        store.append(&AnchorRecord::new(id(5), "Ghost")).unwrap();
        let mut session = session_with(Arc::new(MockAnchorProvider::new()), store);

        session.load_persisted();
        session.run_until_idle().await;

        assert!(session.registry().is_empty());
        assert_eq!(session.load_state(id(5)), Some(LoadState::Failed));
    }

    #[tokio::test]
    async fn test_load_failure_fails_batch() {
        let (provider, store) = seeded(&[(1, "North"), (2, "South")]);
        let provider = Arc::new(provider.failing_loads());
        let mut session = session_with(provider, store);

        session.load_persisted();
        session.run_until_idle().await;

        assert!(session.registry().is_empty());
        assert_eq!(session.load_summary().failed, 2);
    }

    #[tokio::test]
    async fn test_corrupt_store_submits_nothing() {
        let (provider, mut store) = seeded(&[(1, "North")]);
        store.prefs_mut().set_string("uuid0", "garbage");
        let mut session = session_with(Arc::new(provider), store);

        assert_eq!(session.load_persisted(), 0);
        assert!(session.is_idle());
    }

    #[tokio::test]
    async fn test_empty_store_loads_nothing() {
        let mut session = session(Arc::new(MockAnchorProvider::new()));
        assert_eq!(session.load_persisted(), 0);
        assert!(session.is_idle());
    }

    #[tokio::test]
    async fn test_missing_name_uses_default_template() {
        let provider = Arc::new(MockAnchorProvider::new());
        let mut session = session(provider);

        session.request_anchor(pose(1.0), Some("North"), true);
        session.run_until_idle().await;
        let anchor_id = session.registry().bound()[0].id;

        session.store_mut().clear_all().unwrap();
        session.despawn_all();
        assert_eq!(session.load_session_anchors(), 1);
        session.run_until_idle().await;

        assert_eq!(session.registry().len(), 1);
        let anchor = session.registry().get(anchor_id).unwrap();
        assert_eq!(anchor.name, None);
        assert_eq!(anchor.template, "generic");
    }

    #[tokio::test]
    async fn test_erase_last_created_keeps_store() {
        let provider = Arc::new(MockAnchorProvider::new());
        let mut session = session(provider.clone());

        session.request_anchor(pose(1.0), Some("Wall"), true);
        session.run_until_idle().await;
        let anchor_id = session.registry().bound()[0].id;

        assert!(session.erase_last_created());
        session.run_until_idle().await;

        assert!(session.registry().is_empty());
        assert!(!session.registry().is_persistent(anchor_id));
        assert_eq!(session.registry().last_created(), None);
        assert_eq!(session.store().count().unwrap(), 1);
        assert!(!provider.is_persisted(anchor_id));
    }

    #[tokio::test]
    async fn test_erase_all() {
        let (provider, store) = seeded(&[(1, "North")]);
        let provider = Arc::new(provider);
        let mut session = session_with(provider.clone(), store);

        session.request_anchor(pose(2.0), Some("Wall"), true);
        session.request_anchor(pose(3.0), Some("Door"), false);
        session.run_until_idle().await;
        assert_eq!(session.store().count().unwrap(), 2);

        session.erase_all();
        session.run_until_idle().await;

        assert!(session.registry().is_empty());
        assert!(session.registry().pending_uuids().is_empty());
        assert_eq!(session.store().count().unwrap(), 0);
        assert!(provider.persisted_ids().is_empty());
        assert_eq!(provider.erase_calls().len(), 1);
        assert_eq!(provider.erase_calls()[0].len(), 3);
    }

    #[tokio::test]
    async fn test_erase_failure_changes_nothing() {
        let (provider, store) = seeded(&[(1, "North")]);
        let provider = Arc::new(provider.failing_erases());
        let mut session = session_with(provider, store);

        session.load_persisted();
        session.run_until_idle().await;
        session.erase_all();
        session.run_until_idle().await;

        assert_eq!(session.registry().len(), 1);
        assert_eq!(session.store().count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_erase_all_spares_anchors_created_meanwhile() {
        let (provider, store) = seeded(&[(1, "Old")]);
        let provider = Arc::new(provider);
        let mut session = session_with(provider.clone(), store);

        session.request_anchor(pose(2.0), Some("New"), true);
        session.erase_all();
        session.run_until_idle().await;

        assert_eq!(provider.erase_calls(), vec![vec![id(1)]]);
        assert_eq!(session.registry().len(), 1);
        let new_id = session.registry().find_by_name("New").unwrap().id;
        assert!(session.registry().is_persistent(new_id));
        assert_eq!(
            session.store().read_all().unwrap(),
            vec![AnchorRecord::new(new_id, "New")]
        );
        assert_eq!(provider.persisted_ids(), vec![new_id]);
    }

    #[tokio::test]
    async fn test_erase_all_reaches_records_after_corrupt_entry() {
        let (provider, mut store) = seeded(&[(1, "North"), (2, "South")]);
        store.prefs_mut().set_string("uuid0", "garbage");
        let provider = Arc::new(provider);
        let mut session = session_with(provider.clone(), store);

        session.erase_all();
        session.run_until_idle().await;

        assert_eq!(provider.erase_calls(), vec![vec![id(2)]]);
        assert!(!provider.is_persisted(id(2)));
        assert_eq!(session.store().count().unwrap(), 0);
        assert!(session.store().prefs().is_empty());
    }

    #[tokio::test]
    async fn test_erase_all_with_only_garbage_clears_store() {
        let mut store = AnchorPersistenceStore::new(MemoryPrefs::new());
        store.prefs_mut().set_int("numUuids", 1);
        store.prefs_mut().set_string("uuid0", "garbage");
        let provider = Arc::new(MockAnchorProvider::new());
        let mut session = session_with(provider.clone(), store);

        session.erase_all();
        assert!(session.is_idle());
        assert!(provider.erase_calls().is_empty());
        assert!(session.store().prefs().is_empty());
    }

    #[tokio::test]
    async fn test_despawn_drops_stale_localizations() {
        let (provider, store) = seeded(&[(1, "North"), (2, "South")]);
        let provider = Arc::new(
            provider
                .with_localize_delay(id(1), Duration::from_millis(20))
                .with_localize_delay(id(2), Duration::from_millis(20)),
        );
        let mut session = session_with(provider, store);

        session.load_persisted();
        session.process_completions();
        assert_eq!(session.despawn_all(), 0);
        session.run_until_idle().await;

        assert!(session.registry().is_empty());
        assert_eq!(session.store().count().unwrap(), 2);

        // A fresh load still works.
        session.load_persisted();
        session.run_until_idle().await;
        assert_eq!(session.registry().len(), 2);
    }

    #[tokio::test]
    async fn test_drop_with_requests_in_flight() {
        let (provider, store) = seeded(&[(1, "North")]);
        let provider = Arc::new(
            provider
                .with_localize_delay(id(1), Duration::from_millis(50)),
        );
        let mut session = session_with(provider.clone(), store);

        session.load_persisted();
        session.request_anchor(pose(1.0), Some("Wall"), true);
        session.shutdown();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(provider.save_calls().is_empty());
        assert_eq!(Arc::strong_count(&provider), 1);
    }

    #[tokio::test]
    async fn test_missing_collaborators() {
        let err = AnchorSession::<MemoryPrefs>::builder()
            .store(AnchorPersistenceStore::new(MemoryPrefs::new()))
            .catalog(catalog())
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, AnchorError::MissingCollaborator("anchor provider")));

        let err = AnchorSession::<MemoryPrefs>::builder()
            .provider(Arc::new(MockAnchorProvider::new()))
            .store(AnchorPersistenceStore::new(MemoryPrefs::new()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, AnchorError::MissingCollaborator("anchor template catalog")));
    }

    #[test]
    fn test_build_outside_runtime_fails() {
        let err = AnchorSession::builder()
            .provider(Arc::new(MockAnchorProvider::new()))
            .store(AnchorPersistenceStore::new(MemoryPrefs::new()))
            .catalog(catalog())
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, AnchorError::MissingCollaborator("tokio runtime")));
    }
}
