//! Typed entity model for cached state.
//!
//! Entities mirror remote rows plus the derived, per-viewer fields the UI
//! renders (counts and `viewer_has_*` flags). The sync layer computes the
//! derived fields when hydrating authoritative rows, so the cache always
//! holds render-ready values.

use crate::{EntityId, UserId};
use serde::{Deserialize, Serialize};

/// What a reaction is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectType {
    Post,
    Comment,
}

/// Discriminant for the entity kinds the cache governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Post,
    Comment,
    Listing,
}

/// A feed post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    /// Unique identifier
    pub id: EntityId,
    /// Author of the post
    pub author_id: UserId,
    /// Text content
    pub content: String,
    /// Optional media reference (storage path or URL)
    pub media_ref: Option<String>,
    /// Number of likes, authoritative or optimistically adjusted
    pub like_count: u64,
    /// Number of comments on the post
    pub comment_count: u64,
    /// Whether the current viewer has liked this post (derived, per-viewer)
    pub viewer_has_liked: bool,
}

/// A comment on a post. Replies nest exactly one level deep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    /// Unique identifier
    pub id: EntityId,
    /// Post this comment belongs to
    pub post_id: EntityId,
    /// Parent comment for replies. Must reference a top-level comment on
    /// the same post; replies-of-replies collapse to the parent's list.
    pub parent_comment_id: Option<EntityId>,
    /// Author of the comment
    pub author_id: UserId,
    /// Text content
    pub content: String,
    /// Number of reactions on the comment
    pub reaction_count: u64,
    /// Whether the current viewer has reacted (derived, per-viewer)
    pub viewer_has_reacted: bool,
}

/// A marketplace listing (an art piece offered for sale).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    /// Unique identifier
    pub id: EntityId,
    /// Seller. May never equal `buyer_id`.
    pub owner_id: UserId,
    /// Buyer once sold. Immutable once set; a listing is never "unbought".
    pub buyer_id: Option<UserId>,
    /// Asking price in minor currency units
    pub price_cents: u64,
    /// Display title, also used for marketplace search filters
    pub title: String,
}

impl Listing {
    /// A listing is available while nobody has bought it.
    pub fn is_available(&self) -> bool {
        self.buyer_id.is_none()
    }
}

/// Any entity the cache can hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Entity {
    Post(Post),
    Comment(Comment),
    Listing(Listing),
}

impl Entity {
    /// The entity's unique identifier.
    pub fn id(&self) -> &EntityId {
        match self {
            Entity::Post(p) => &p.id,
            Entity::Comment(c) => &c.id,
            Entity::Listing(l) => &l.id,
        }
    }

    /// The entity's kind discriminant.
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Post(_) => EntityKind::Post,
            Entity::Comment(_) => EntityKind::Comment,
            Entity::Listing(_) => EntityKind::Listing,
        }
    }

    /// Borrow as a post, if this is one.
    pub fn as_post(&self) -> Option<&Post> {
        match self {
            Entity::Post(p) => Some(p),
            _ => None,
        }
    }

    /// Borrow as a comment, if this is one.
    pub fn as_comment(&self) -> Option<&Comment> {
        match self {
            Entity::Comment(c) => Some(c),
            _ => None,
        }
    }

    /// Borrow as a listing, if this is one.
    pub fn as_listing(&self) -> Option<&Listing> {
        match self {
            Entity::Listing(l) => Some(l),
            _ => None,
        }
    }
}
