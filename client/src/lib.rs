//! # Atelier Client
//!
//! The async synchronization layer that sits between Atelier screens and
//! the remote store. It owns one shared [`atelier_engine::EntityCache`] and
//! exposes the only interface screens use for governed entities:
//!
//! - reactive reads: [`SyncClient::entity`] and [`SyncClient::subscribe`]
//! - [`SyncClient::toggle_reaction`] - optimistic like/unlike
//! - [`SyncClient::acquire_listing`] - exclusive purchase of a listing
//! - [`SyncClient::post_comment`] - comment with optimistic count bump
//! - [`SyncClient::refresh`] - explicit reconciliation of a scope
//!
//! The remote store and the realtime change feed are external collaborators
//! behind the [`RemoteStore`] and [`ChangeNotifier`] traits; the client
//! never assumes more of them than row CRUD, aggregate counts, one
//! conditional-update primitive, and an at-least-once event channel.
//!
//! All reconciliation funnels through a single [`ReconcileLoop`] task:
//! change notifications and caller refreshes coalesce into batched fetches
//! whose results merge into the cache idempotently.

pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod reconcile;
pub mod remote;

pub use client::{Subscription, SyncClient};
pub use config::SyncConfig;
pub use coordinator::MutationCoordinator;
pub use error::{Result, SyncError};
pub use reconcile::{ReconcileLoop, RefreshHandle, Scope, Trigger};
pub use remote::{
    ChangeEvent, ChangeNotifier, CommentRow, EventType, ListingRow, NewComment, PostRow,
    RemoteStore, StoreError, StoreResult, Table,
};

use atelier_engine::EntityCache;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The cache as shared between the coordinator, the reconciliation loop,
/// and screens.
pub type SharedCache = Arc<Mutex<EntityCache>>;

/// Lock the shared cache, recovering from a poisoned mutex; cache state is
/// plain data and stays usable even if a holder panicked.
pub(crate) fn lock(cache: &SharedCache) -> MutexGuard<'_, EntityCache> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
