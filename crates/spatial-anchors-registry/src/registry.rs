//! In-memory set of live anchors for the current process run.

use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::pose::Pose;

/// A pose-resolved anchor instantiated in this session
#[derive(Debug, Clone, PartialEq)]
pub struct BoundAnchor {
    pub id: Uuid,
    /// Display name; `None` when no persisted name was found
    pub name: Option<String>,
    pub pose: Pose,
    /// Name of the template the anchor was instantiated from
    pub template: String,
}

/// Handle to an outstanding creation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PendingHandle(u64);

impl PendingHandle {
    pub fn get(&self) -> u64 {
        self.0
    }
}

/// A creation intent waiting for the tracking runtime to localize it
#[derive(Debug, Clone, PartialEq)]
pub struct CreationRequest {
    pub name: String,
    pub save_requested: bool,
    pub pose: Pose,
}

/// Authoritative set of instantiated anchors.
///
/// Holds the bound anchors (at most one entry per identifier), the
/// identifiers confirmed persisted this session and the creation intents
/// still in flight.
#[derive(Debug, Default)]
pub struct AnchorRegistry {
    bound: Vec<BoundAnchor>,
    pending_uuids: HashSet<Uuid>,
    creations: HashMap<PendingHandle, CreationRequest>,
    next_handle: u64,
    last_created: Option<Uuid>,
}

impl AnchorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pose-resolved anchor.
    ///
    /// Registering an identifier that is already bound replaces that entry
    /// in place, so the final set does not depend on completion order.
    /// Returns `true` when the identifier was not bound before.
    pub fn register_bound(&mut self, anchor: BoundAnchor) -> bool {
        match self.bound.iter_mut().find(|a| a.id == anchor.id) {
            Some(existing) => {
                *existing = anchor;
                false
            }
            None => {
                self.bound.push(anchor);
                true
            }
        }
    }

    /// Remove a bound anchor. The persistence store is not touched.
    pub fn unregister(&mut self, id: Uuid) -> Option<BoundAnchor> {
        let index = self.bound.iter().position(|a| a.id == id)?;
        if self.last_created == Some(id) {
            self.last_created = None;
        }
        Some(self.bound.remove(index))
    }

    /// Drop every bound anchor, keeping the persistent flags.
    pub fn clear_bound(&mut self) -> Vec<BoundAnchor> {
        self.last_created = None;
        std::mem::take(&mut self.bound)
    }

    pub fn get(&self, id: Uuid) -> Option<&BoundAnchor> {
        self.bound.iter().find(|a| a.id == id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.get(id).is_some()
    }

    /// First bound anchor with exactly this name.
    pub fn find_by_name(&self, name: &str) -> Option<&BoundAnchor> {
        self.bound.iter().find(|a| a.name.as_deref() == Some(name))
    }

    pub fn bound(&self) -> &[BoundAnchor] {
        &self.bound
    }

    pub fn bound_ids(&self) -> Vec<Uuid> {
        self.bound.iter().map(|a| a.id).collect()
    }

    pub fn len(&self) -> usize {
        self.bound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bound.is_empty()
    }

    /// Remember that the runtime confirmed a durable save of `id`.
    /// Returns `true` if it was not already marked.
    pub fn mark_persistent(&mut self, id: Uuid) -> bool {
        self.pending_uuids.insert(id)
    }

    pub fn is_persistent(&self, id: Uuid) -> bool {
        self.pending_uuids.contains(&id)
    }

    pub fn forget_persistent(&mut self, id: Uuid) -> bool {
        self.pending_uuids.remove(&id)
    }

    pub fn clear_persistent(&mut self) {
        self.pending_uuids.clear();
    }

    pub fn pending_uuids(&self) -> &HashSet<Uuid> {
        &self.pending_uuids
    }

    /// Record a creation intent. The caller completes it with
    /// [`take_creation`](Self::take_creation) once localization finishes.
    pub fn resolve_creation_request(
        &mut self,
        name_hint: impl Into<String>,
        save_requested: bool,
        pose: Pose,
    ) -> PendingHandle {
        let handle = PendingHandle(self.next_handle);
        self.next_handle += 1;
        self.creations.insert(
            handle,
            CreationRequest {
                name: name_hint.into(),
                save_requested,
                pose,
            },
        );
        handle
    }

    pub fn take_creation(&mut self, handle: PendingHandle) -> Option<CreationRequest> {
        self.creations.remove(&handle)
    }

    pub fn pending_creations(&self) -> usize {
        self.creations.len()
    }

    pub fn last_created(&self) -> Option<Uuid> {
        self.last_created
    }

    pub fn set_last_created(&mut self, id: Uuid) {
        self.last_created = Some(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::Vector3;

    fn anchor(n: u128, name: &str) -> BoundAnchor {
        BoundAnchor {
            id: Uuid::from_u128(n),
            name: Some(name.to_string()),
            pose: Pose::from_position(Vector3::new(n as f32, 0.0, 0.0)),
            template: "generic".to_string(),
        }
    }

    fn sorted_ids(registry: &AnchorRegistry) -> Vec<Uuid> {
        let mut ids = registry.bound_ids();
        ids.sort();
        ids
    }

    #[test]
    fn test_register_order_does_not_matter() {
        let (a, b, c) = (anchor(1, "A"), anchor(2, "B"), anchor(3, "C"));

        let mut forward = AnchorRegistry::new();
        for x in [&a, &b, &c] {
            forward.register_bound(x.clone());
        }

        let mut shuffled = AnchorRegistry::new();
        for x in [&b, &c, &a] {
            shuffled.register_bound(x.clone());
        }

        assert_eq!(sorted_ids(&forward), sorted_ids(&shuffled));
        assert_eq!(shuffled.len(), 3);
    }

    #[test]
    fn test_register_same_id_replaces() {
        let mut registry = AnchorRegistry::new();
        assert!(registry.register_bound(anchor(1, "Old")));
        assert!(registry.register_bound(anchor(2, "Other")));
        assert!(!registry.register_bound(anchor(1, "New")));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.bound()[0].name.as_deref(), Some("New"));
    }

    #[test]
    fn test_unregister() {
        let mut registry = AnchorRegistry::new();
        registry.register_bound(anchor(1, "A"));
        registry.set_last_created(Uuid::from_u128(1));
        registry.mark_persistent(Uuid::from_u128(1));

        let removed = registry.unregister(Uuid::from_u128(1)).unwrap();
        assert_eq!(removed.name.as_deref(), Some("A"));
        assert!(registry.is_empty());
        assert_eq!(registry.last_created(), None);
        assert!(registry.is_persistent(Uuid::from_u128(1)));
        assert!(registry.unregister(Uuid::from_u128(1)).is_none());
    }

    #[test]
    fn test_find_by_name_first_match() {
        let mut registry = AnchorRegistry::new();
        registry.register_bound(anchor(1, "North"));
        registry.register_bound(anchor(2, "North"));

        assert_eq!(registry.find_by_name("North").unwrap().id, Uuid::from_u128(1));
        assert!(registry.find_by_name("Nor").is_none());
    }

    #[test]
    fn test_mark_persistent() {
        let mut registry = AnchorRegistry::new();
        let id = Uuid::from_u128(9);
        assert!(registry.mark_persistent(id));
        assert!(!registry.mark_persistent(id));
        assert_eq!(registry.pending_uuids().len(), 1);

        registry.clear_persistent();
        assert!(!registry.is_persistent(id));
    }

    #[test]
    fn test_creation_requests() {
        let mut registry = AnchorRegistry::new();
        let first = registry.resolve_creation_request("Wall", true, Pose::IDENTITY);
        let second = registry.resolve_creation_request("Door", false, Pose::IDENTITY);
        assert_ne!(first, second);
        assert_eq!(registry.pending_creations(), 2);

        let request = registry.take_creation(second).unwrap();
        assert_eq!(request.name, "Door");
        assert!(!request.save_requested);
        assert!(registry.take_creation(second).is_none());
        assert_eq!(registry.pending_creations(), 1);
    }

    #[test]
    fn test_clear_bound_keeps_persistent_flags() {
        let mut registry = AnchorRegistry::new();
        registry.register_bound(anchor(1, "A"));
        registry.register_bound(anchor(2, "B"));
        registry.mark_persistent(Uuid::from_u128(1));

        let removed = registry.clear_bound();
        assert_eq!(removed.len(), 2);
        assert!(registry.is_empty());
        assert!(registry.is_persistent(Uuid::from_u128(1)));
    }
}
