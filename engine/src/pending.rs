//! Pending-mutation bookkeeping for in-flight optimistic changes.
//!
//! Local intents are expressed as typed patches, not ad-hoc field writes.
//! Each applied patch records the prior values of the fields it touched, so
//! rollback restores exactly the pre-patch state without re-deriving it.

use crate::{EntityId, Timestamp};
use serde::{Deserialize, Serialize};

/// Opaque handle to an applied optimistic patch.
///
/// Handed out by [`crate::EntityCache::apply_optimistic`] and consumed by
/// `confirm` or `rollback`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatchToken(pub(crate) u64);

/// The kinds of mutation the coordinator issues.
///
/// At most one mutation may be in flight per `(entity, MutationKind)`
/// pair; further intents wait behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationKind {
    /// Like/unlike a post or react/unreact to a comment
    ReactionToggle,
    /// Post a comment (bumps the parent post's comment count)
    CommentCreate,
    /// Buy a listing. Never patched optimistically; the kind exists so the
    /// coordinator can serialize acquisition attempts per listing.
    Acquisition,
}

/// A typed optimistic patch to apply to a cached entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "patch", rename_all = "camelCase")]
pub enum OptimisticPatch {
    /// Flip the viewer's reaction flag and adjust the count by ±1
    ToggleReaction,
    /// Adjust a post's comment count (a new comment is `delta: 1`)
    BumpCommentCount { delta: i64 },
}

impl OptimisticPatch {
    /// The mutation kind this patch belongs to.
    pub fn kind(&self) -> MutationKind {
        match self {
            OptimisticPatch::ToggleReaction => MutationKind::ReactionToggle,
            OptimisticPatch::BumpCommentCount { .. } => MutationKind::CommentCreate,
        }
    }
}

/// Snapshot of the fields a patch touched, taken before applying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "fields", rename_all = "camelCase")]
pub(crate) enum PriorFields {
    /// Reaction count and viewer flag of a post or comment
    Reaction { count: u64, viewer_flag: bool },
    /// Comment count of a post
    CommentCount { count: u64 },
}

/// Local bookkeeping for one in-flight optimistic mutation.
///
/// Exists only between optimistic application and settlement; `confirm`
/// and `rollback` both remove the record. While present it shields its
/// fields from authoritative overwrites. Never persisted remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMutation {
    /// Token identifying this mutation
    pub token: PatchToken,
    /// Entity the patch was applied to
    pub entity_id: EntityId,
    /// What kind of mutation is in flight
    pub kind: MutationKind,
    /// When the patch was applied locally (milliseconds since epoch)
    pub applied_at: Timestamp,
    /// Pre-patch values of the touched fields, for exact rollback
    pub(crate) prior: PriorFields,
}

impl PendingMutation {
    pub(crate) fn new(
        token: PatchToken,
        entity_id: EntityId,
        kind: MutationKind,
        applied_at: Timestamp,
        prior: PriorFields,
    ) -> Self {
        Self {
            token,
            entity_id,
            kind,
            applied_at,
            prior,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_kind_mapping() {
        assert_eq!(
            OptimisticPatch::ToggleReaction.kind(),
            MutationKind::ReactionToggle
        );
        assert_eq!(
            OptimisticPatch::BumpCommentCount { delta: 1 }.kind(),
            MutationKind::CommentCreate
        );
    }

    #[test]
    fn records_application_time_and_kind() {
        let pending = PendingMutation::new(
            PatchToken(1),
            "post_1".into(),
            MutationKind::ReactionToggle,
            1000,
            PriorFields::Reaction {
                count: 5,
                viewer_flag: false,
            },
        );
        assert_eq!(pending.applied_at, 1000);
        assert_eq!(pending.kind, MutationKind::ReactionToggle);
    }

    #[test]
    fn serialization_roundtrip() {
        let pending = PendingMutation::new(
            PatchToken(7),
            "post_1".into(),
            MutationKind::CommentCreate,
            2000,
            PriorFields::CommentCount { count: 3 },
        );

        let json = serde_json::to_string(&pending).unwrap();
        assert!(json.contains("appliedAt")); // camelCase
        let parsed: PendingMutation = serde_json::from_str(&json).unwrap();
        assert_eq!(pending, parsed);
    }
}
