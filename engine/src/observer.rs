//! Per-entity observer registry.
//!
//! Screens register a callback for the entity ids they render; the cache
//! notifies them synchronously on every mutation so a tap is reflected in
//! the same render tick. Registration returns an [`ObserverId`] that the
//! screen uses to unregister when it unmounts.

use crate::{Entity, EntityId};
use std::collections::HashMap;

/// Identifier for a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// What happened to an observed entity.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityChange {
    /// The entity was created or its fields changed
    Updated(Entity),
    /// The entity left the cache (e.g. a listing that sold out of a
    /// filtered marketplace view)
    Removed(EntityId),
}

type ObserverFn = Box<dyn Fn(&EntityChange) + Send>;

/// Observer callbacks keyed by entity id.
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    observers: HashMap<EntityId, Vec<(ObserverId, ObserverFn)>>,
    next_id: u64,
}

impl ObserverRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a callback for one entity id.
    pub(crate) fn register(
        &mut self,
        entity_id: impl Into<EntityId>,
        callback: ObserverFn,
    ) -> ObserverId {
        self.next_id += 1;
        let id = ObserverId(self.next_id);
        self.observers
            .entry(entity_id.into())
            .or_default()
            .push((id, callback));
        id
    }

    /// Remove a previously registered callback.
    pub(crate) fn unregister(&mut self, entity_id: &str, id: ObserverId) {
        if let Some(list) = self.observers.get_mut(entity_id) {
            list.retain(|(observer_id, _)| *observer_id != id);
            if list.is_empty() {
                self.observers.remove(entity_id);
            }
        }
    }

    /// Synchronously invoke every observer registered for the entity.
    pub(crate) fn notify(&self, entity_id: &str, change: &EntityChange) {
        if let Some(list) = self.observers.get(entity_id) {
            for (_, callback) in list {
                callback(change);
            }
        }
    }

    /// Number of observers registered for an entity.
    pub(crate) fn count_for(&self, entity_id: &str) -> usize {
        self.observers.get(entity_id).map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("entities", &self.observers.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}
