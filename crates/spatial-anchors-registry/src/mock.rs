//! In-process tracking runtime for tests and offline runs.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use crate::pose::Pose;
use crate::provider::{AnchorProvider, LocalizedAnchor, ProviderError, UnboundAnchor};

#[derive(Debug, Default)]
struct MockState {
    /// Anchors created this run
    live: HashMap<Uuid, Pose>,
    /// Anchors persisted on-device
    persisted: HashMap<Uuid, Pose>,
    unlocalizable: HashSet<Uuid>,
    localize_delays: HashMap<Uuid, Duration>,
    fail_creates: bool,
    fail_saves: bool,
    fail_erases: bool,
    fail_loads: bool,
    save_calls: Vec<Uuid>,
    erase_calls: Vec<Vec<Uuid>>,
}

/// Mock tracking runtime.
///
/// Created anchors get random identifiers and keep the requested pose.
/// Failures and per-anchor localization delays are configured up front.
#[derive(Debug, Default)]
pub struct MockAnchorProvider {
    state: Mutex<MockState>,
}

impl MockAnchorProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend `id` was persisted on-device by an earlier run.
    pub fn with_persisted(self, id: Uuid, pose: Pose) -> Self {
        self.state().persisted.insert(id, pose);
        self
    }

    /// Loadable, but localization always fails.
    pub fn with_unlocalizable(self, id: Uuid) -> Self {
        self.state().unlocalizable.insert(id);
        self
    }

    pub fn with_localize_delay(self, id: Uuid, delay: Duration) -> Self {
        self.state().localize_delays.insert(id, delay);
        self
    }

    pub fn failing_creates(self) -> Self {
        self.state().fail_creates = true;
        self
    }

    pub fn failing_saves(self) -> Self {
        self.state().fail_saves = true;
        self
    }

    pub fn failing_erases(self) -> Self {
        self.state().fail_erases = true;
        self
    }

    pub fn failing_loads(self) -> Self {
        self.state().fail_loads = true;
        self
    }

    pub fn is_persisted(&self, id: Uuid) -> bool {
        self.state().persisted.contains_key(&id)
    }

    pub fn persisted_ids(&self) -> Vec<Uuid> {
        self.state().persisted.keys().copied().collect()
    }

    pub fn save_calls(&self) -> Vec<Uuid> {
        self.state().save_calls.clone()
    }

    pub fn erase_calls(&self) -> Vec<Vec<Uuid>> {
        self.state().erase_calls.clone()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl AnchorProvider for MockAnchorProvider {
    async fn create_anchor(&self, pose: Pose) -> Result<LocalizedAnchor, ProviderError> {
        let mut state = self.state();
        if state.fail_creates {
            return Err(ProviderError::Status("create failed".to_string()));
        }
        let id = Uuid::new_v4();
        state.live.insert(id, pose);
        Ok(LocalizedAnchor { id, pose })
    }

    async fn save_anchor(&self, id: Uuid) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.save_calls.push(id);
        if state.fail_saves {
            return Err(ProviderError::Status("save failed".to_string()));
        }
        let pose = state
            .live
            .get(&id)
            .or_else(|| state.persisted.get(&id))
            .copied()
            .ok_or(ProviderError::UnknownAnchor(id))?;
        state.persisted.insert(id, pose);
        Ok(())
    }

    async fn erase_anchors(&self, ids: &[Uuid]) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.erase_calls.push(ids.to_vec());
        if state.fail_erases {
            return Err(ProviderError::Status("erase failed".to_string()));
        }
        for id in ids {
            state.persisted.remove(id);
        }
        Ok(())
    }

    async fn load_unbound(&self, ids: &[Uuid]) -> Result<Vec<UnboundAnchor>, ProviderError> {
        let state = self.state();
        if state.fail_loads {
            return Err(ProviderError::Status("load failed".to_string()));
        }
        Ok(ids
            .iter()
            .filter(|id| state.persisted.contains_key(id))
            .map(|id| UnboundAnchor::new(*id))
            .collect())
    }

    async fn localize(&self, anchor: &UnboundAnchor) -> Result<Pose, ProviderError> {
        let id = anchor.id();
        let delay = self.state().localize_delays.get(&id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state();
        if state.unlocalizable.contains(&id) {
            return Err(ProviderError::Status("localization failed".to_string()));
        }
        state
            .persisted
            .get(&id)
            .copied()
            .ok_or(ProviderError::UnknownAnchor(id))
    }
}
