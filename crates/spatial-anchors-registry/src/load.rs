//! Per-identifier progress of a bulk load.
//!
//! ```text
//! Requested -> Localizing -> Bound
//!                         \-> Failed
//! ```
//!
//! `Bound` and `Failed` are terminal for a load call. A new load moves the
//! identifier back to `Requested`.

use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadState {
    /// Read from the store, not yet submitted
    Requested,
    /// Submitted to the tracking runtime, waiting for a pose
    Localizing,
    Bound,
    /// No pose this session; the stored record is kept for a later load
    Failed,
}

impl LoadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadState::Bound | LoadState::Failed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub requested: usize,
    pub localizing: usize,
    pub bound: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct LoadTracker {
    states: HashMap<Uuid, LoadState>,
}

impl LoadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `ids` as requested and return them without duplicates, in
    /// first-seen order.
    pub fn request(&mut self, ids: impl IntoIterator<Item = Uuid>) -> Vec<Uuid> {
        let mut seen = HashSet::new();
        let mut unique = Vec::new();
        for id in ids {
            if seen.insert(id) {
                self.states.insert(id, LoadState::Requested);
                unique.push(id);
            }
        }
        unique
    }

    pub fn begin_localizing(&mut self, ids: &[Uuid]) {
        for id in ids {
            if let Some(state) = self.states.get_mut(id) {
                if *state == LoadState::Requested {
                    *state = LoadState::Localizing;
                }
            }
        }
    }

    /// Move an identifier out of `Localizing`. Returns `false` (and changes
    /// nothing) if it was not localizing.
    pub fn finish(&mut self, id: Uuid, bound: bool) -> bool {
        match self.states.get_mut(&id) {
            Some(state) if *state == LoadState::Localizing => {
                *state = if bound {
                    LoadState::Bound
                } else {
                    LoadState::Failed
                };
                true
            }
            _ => false,
        }
    }

    /// Stop tracking `id`, e.g. once the runtime erased it.
    pub fn forget(&mut self, id: Uuid) -> Option<LoadState> {
        self.states.remove(&id)
    }

    pub fn state(&self, id: Uuid) -> Option<LoadState> {
        self.states.get(&id).copied()
    }

    pub fn summary(&self) -> LoadSummary {
        let mut summary = LoadSummary::default();
        for state in self.states.values() {
            match state {
                LoadState::Requested => summary.requested += 1,
                LoadState::Localizing => summary.localizing += 1,
                LoadState::Bound => summary.bound += 1,
                LoadState::Failed => summary.failed += 1,
            }
        }
        summary
    }

    pub fn is_settled(&self) -> bool {
        self.states.values().all(LoadState::is_terminal)
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}
