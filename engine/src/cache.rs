//! Entity cache - the single shared view of remote state.
//!
//! The cache is a read-through, write-behind view of the remote store.
//! Optimistic patches land synchronously; authoritative rows merge in
//! without regressing optimistic fields that are still awaiting their
//! confirm or rollback.

use crate::{
    error::Result,
    observer::{EntityChange, ObserverRegistry},
    pending::PriorFields,
    Entity, EntityId, Error, MutationKind, ObserverId, OptimisticPatch, PatchToken,
    PendingMutation, Timestamp,
};
use std::collections::HashMap;

/// The shared in-memory entity cache.
///
/// Owned exclusively by the sync core; screens read entities and register
/// observers through it, and never touch the remote store directly.
#[derive(Debug, Default)]
pub struct EntityCache {
    /// Cached entities by id
    entities: HashMap<EntityId, Entity>,
    /// In-flight optimistic mutations
    pending: Vec<PendingMutation>,
    /// Monotonic token source
    next_token: u64,
    /// Per-entity observers, notified synchronously
    observers: ObserverRegistry,
}

impl EntityCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            pending: Vec::new(),
            next_token: 0,
            observers: ObserverRegistry::new(),
        }
    }

    /// Get an entity by id.
    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Check whether an entity is cached.
    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    /// Iterate over all cached entities.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Number of cached entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check whether the cache holds no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Merge an authoritative row into the cache.
    ///
    /// Fields covered by an in-flight [`PendingMutation`] keep their
    /// optimistic values; everything else is overwritten from the trusted
    /// source. Applying the same row twice is a no-op, which makes
    /// duplicate change notifications harmless.
    pub fn upsert_authoritative(&mut self, incoming: Entity) {
        let id = incoming.id().clone();
        let mut merged = incoming;

        if let Some(current) = self.entities.get(&id) {
            for pending in self.pending.iter().filter(|p| p.entity_id == id) {
                preserve_optimistic_fields(&mut merged, current, pending.kind);
            }

            if *current == merged {
                return;
            }
        }

        self.entities.insert(id.clone(), merged.clone());
        self.observers.notify(&id, &EntityChange::Updated(merged));
    }

    /// Drop an entity from the cache, along with any of its pending
    /// mutations. Used when an authoritative fetch shows the row no longer
    /// matches the watched set (e.g. a listing that sold).
    pub fn remove(&mut self, id: &str) -> Option<Entity> {
        let removed = self.entities.remove(id)?;
        self.pending.retain(|p| p.entity_id != id);
        self.observers
            .notify(id, &EntityChange::Removed(id.to_string()));
        Some(removed)
    }

    /// Apply a typed optimistic patch to a cached entity.
    ///
    /// Records a [`PendingMutation`] carrying the prior field values and
    /// returns its token. Fails with [`Error::MutationInFlight`] if a
    /// pending mutation of the same kind already targets the entity;
    /// the caller serializes intents behind the in-flight one.
    pub fn apply_optimistic(
        &mut self,
        entity_id: &str,
        patch: OptimisticPatch,
        applied_at: Timestamp,
    ) -> Result<PatchToken> {
        let kind = patch.kind();
        if self.has_pending(entity_id, kind) {
            return Err(Error::MutationInFlight {
                entity_id: entity_id.to_string(),
                kind,
            });
        }

        let entity = self
            .entities
            .get_mut(entity_id)
            .ok_or_else(|| Error::EntityNotFound(entity_id.to_string()))?;

        let prior = apply_patch(entity, patch)?;
        let updated = entity.clone();

        self.next_token += 1;
        let token = PatchToken(self.next_token);
        self.pending.push(PendingMutation::new(
            token,
            entity_id.to_string(),
            kind,
            applied_at,
            prior,
        ));

        self.observers
            .notify(entity_id, &EntityChange::Updated(updated));
        Ok(token)
    }

    /// Confirm an optimistic patch: the remote write succeeded, so the
    /// cached state is already correct and only the bookkeeping is dropped.
    pub fn confirm(&mut self, token: PatchToken) -> Result<()> {
        let idx = self
            .pending
            .iter()
            .position(|p| p.token == token)
            .ok_or(Error::UnknownToken)?;
        self.pending.remove(idx);
        Ok(())
    }

    /// Roll back an optimistic patch, restoring the recorded prior fields.
    pub fn rollback(&mut self, token: PatchToken) -> Result<()> {
        let idx = self
            .pending
            .iter()
            .position(|p| p.token == token)
            .ok_or(Error::UnknownToken)?;
        let pending = self.pending.remove(idx);

        let entity = self
            .entities
            .get_mut(&pending.entity_id)
            .ok_or_else(|| Error::EntityNotFound(pending.entity_id.clone()))?;

        restore_prior(entity, &pending.prior, &pending.entity_id)?;
        let updated = entity.clone();

        self.observers
            .notify(&pending.entity_id, &EntityChange::Updated(updated));
        Ok(())
    }

    /// Check for an in-flight pending mutation on `(entity, kind)`.
    pub fn has_pending(&self, entity_id: &str, kind: MutationKind) -> bool {
        self.pending
            .iter()
            .any(|p| p.entity_id == entity_id && p.kind == kind)
    }

    /// All in-flight pending mutations.
    pub fn pending(&self) -> &[PendingMutation] {
        &self.pending
    }

    /// Count of in-flight pending mutations.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Register an observer for one entity id. The callback fires
    /// synchronously on every mutation of that entity.
    pub fn subscribe(
        &mut self,
        entity_id: impl Into<EntityId>,
        callback: impl Fn(&EntityChange) + Send + 'static,
    ) -> ObserverId {
        self.observers.register(entity_id, Box::new(callback))
    }

    /// Remove a previously registered observer.
    pub fn unsubscribe(&mut self, entity_id: &str, id: ObserverId) {
        self.observers.unregister(entity_id, id);
    }

    /// Number of observers watching an entity.
    pub fn observer_count(&self, entity_id: &str) -> usize {
        self.observers.count_for(entity_id)
    }
}

/// Apply a patch in place, returning the snapshot of the touched fields.
fn apply_patch(entity: &mut Entity, patch: OptimisticPatch) -> Result<PriorFields> {
    match (patch, entity) {
        (OptimisticPatch::ToggleReaction, Entity::Post(post)) => {
            let prior = PriorFields::Reaction {
                count: post.like_count,
                viewer_flag: post.viewer_has_liked,
            };
            if post.viewer_has_liked {
                post.like_count = post.like_count.saturating_sub(1);
            } else {
                post.like_count += 1;
            }
            post.viewer_has_liked = !post.viewer_has_liked;
            Ok(prior)
        }
        (OptimisticPatch::ToggleReaction, Entity::Comment(comment)) => {
            let prior = PriorFields::Reaction {
                count: comment.reaction_count,
                viewer_flag: comment.viewer_has_reacted,
            };
            if comment.viewer_has_reacted {
                comment.reaction_count = comment.reaction_count.saturating_sub(1);
            } else {
                comment.reaction_count += 1;
            }
            comment.viewer_has_reacted = !comment.viewer_has_reacted;
            Ok(prior)
        }
        (OptimisticPatch::BumpCommentCount { delta }, Entity::Post(post)) => {
            let prior = PriorFields::CommentCount {
                count: post.comment_count,
            };
            post.comment_count = post.comment_count.saturating_add_signed(delta);
            Ok(prior)
        }
        (_, entity) => Err(Error::KindMismatch(entity.id().clone())),
    }
}

/// Restore the snapshot taken by [`apply_patch`].
fn restore_prior(entity: &mut Entity, prior: &PriorFields, entity_id: &str) -> Result<()> {
    match (prior, entity) {
        (PriorFields::Reaction { count, viewer_flag }, Entity::Post(post)) => {
            post.like_count = *count;
            post.viewer_has_liked = *viewer_flag;
            Ok(())
        }
        (PriorFields::Reaction { count, viewer_flag }, Entity::Comment(comment)) => {
            comment.reaction_count = *count;
            comment.viewer_has_reacted = *viewer_flag;
            Ok(())
        }
        (PriorFields::CommentCount { count }, Entity::Post(post)) => {
            post.comment_count = *count;
            Ok(())
        }
        _ => Err(Error::KindMismatch(entity_id.to_string())),
    }
}

/// Keep the fields owned by an in-flight mutation at their cached
/// (optimistic) values instead of the incoming authoritative ones.
fn preserve_optimistic_fields(merged: &mut Entity, current: &Entity, kind: MutationKind) {
    match (kind, merged, current) {
        (MutationKind::ReactionToggle, Entity::Post(merged), Entity::Post(current)) => {
            merged.like_count = current.like_count;
            merged.viewer_has_liked = current.viewer_has_liked;
        }
        (MutationKind::ReactionToggle, Entity::Comment(merged), Entity::Comment(current)) => {
            merged.reaction_count = current.reaction_count;
            merged.viewer_has_reacted = current.viewer_has_reacted;
        }
        (MutationKind::CommentCreate, Entity::Post(merged), Entity::Post(current)) => {
            merged.comment_count = current.comment_count;
        }
        // Acquisition is never patched optimistically; nothing to shield.
        _ => {}
    }
}
