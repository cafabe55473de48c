//! # Atelier Engine
//!
//! The optimistic entity cache at the heart of the Atelier mobile client.
//!
//! Screens read entities from one shared [`EntityCache`]; user intents are
//! applied to the cache *optimistically* (before the remote write confirms)
//! and later confirmed or rolled back. Authoritative rows fetched from the
//! remote store are merged in without regressing optimistic state that is
//! still in flight.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine has no knowledge of network, timers, or platform
//! - **Synchronous**: every cache mutation completes in the caller's tick,
//!   so a tap is reflected in the same render pass
//! - **Invertible**: every optimistic patch records the prior field values,
//!   making rollback exact rather than a guess
//! - **Idempotent merges**: applying the same authoritative row twice leaves
//!   the cache unchanged, which makes duplicate notifications harmless
//!
//! ## Core Concepts
//!
//! ### Entities
//!
//! Cached state is typed: [`Post`], [`Comment`], and [`Listing`], wrapped in
//! the [`Entity`] enum. Posts and comments carry derived, per-viewer fields
//! (`viewer_has_liked`, `reaction_count`) that the sync layer computes when
//! hydrating rows.
//!
//! ### Pending mutations
//!
//! [`EntityCache::apply_optimistic`] records a [`PendingMutation`] and hands
//! back a [`PatchToken`]. At most one in-flight mutation may exist per
//! `(entity, kind)` pair; the async layer serializes further intents behind
//! it. [`EntityCache::confirm`] drops the bookkeeping (the cache is already
//! correct); [`EntityCache::rollback`] restores the recorded prior fields.
//!
//! ### Authoritative merges
//!
//! [`EntityCache::upsert_authoritative`] overwrites cached fields from a
//! trusted source, except fields covered by an in-flight pending mutation,
//! which keep their optimistic values until that mutation settles.
//!
//! ### Observers
//!
//! Every mutation notifies per-entity observers synchronously (no batching).
//! Registration returns an [`ObserverId`] for later removal when a screen
//! goes away.
//!
//! ## Quick Start
//!
//! ```rust
//! use atelier_engine::{Entity, EntityCache, OptimisticPatch, Post};
//!
//! let mut cache = EntityCache::new();
//! cache.upsert_authoritative(Entity::Post(Post {
//!     id: "post_1".into(),
//!     author_id: "ana".into(),
//!     content: "first piece".into(),
//!     media_ref: None,
//!     like_count: 5,
//!     comment_count: 0,
//!     viewer_has_liked: false,
//! }));
//!
//! let token = cache
//!     .apply_optimistic("post_1", OptimisticPatch::ToggleReaction, 1_706_745_600_000)
//!     .unwrap();
//!
//! // Visible immediately, before any network round trip.
//! let post = cache.get("post_1").unwrap().as_post().unwrap();
//! assert_eq!(post.like_count, 6);
//! assert!(post.viewer_has_liked);
//!
//! // Remote write failed: restore exactly what was there before.
//! cache.rollback(token).unwrap();
//! let post = cache.get("post_1").unwrap().as_post().unwrap();
//! assert_eq!(post.like_count, 5);
//! ```

pub mod cache;
pub mod entity;
pub mod error;
pub mod observer;
pub mod pending;

// Re-export main types at crate root
pub use cache::EntityCache;
pub use entity::{Comment, Entity, EntityKind, Listing, Post, SubjectType};
pub use error::Error;
pub use observer::{EntityChange, ObserverId};
pub use pending::{MutationKind, OptimisticPatch, PatchToken, PendingMutation};

/// Type aliases for clarity
pub type EntityId = String;
pub type UserId = String;
pub type Timestamp = u64;
