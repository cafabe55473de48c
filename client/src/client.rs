//! The top-level sync client.
//!
//! Wires one shared cache to a [`MutationCoordinator`] and a background
//! [`ReconcileLoop`], and pumps change notifications from the
//! [`ChangeNotifier`] into the loop. Screens hold one `SyncClient` and go
//! through it for every read and write of governed entities.

use atelier_engine::{Entity, EntityId, ObserverId, SubjectType, UserId};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::coordinator::MutationCoordinator;
use crate::error::Result;
use crate::reconcile::{ReconcileLoop, RefreshHandle, Scope};
use crate::remote::{ChangeNotifier, RemoteStore};
use crate::{lock, SharedCache};

/// Client facade over the cache, the coordinator, and the reconcile loop.
pub struct SyncClient<S> {
    cache: SharedCache,
    coordinator: MutationCoordinator<S>,
    handle: RefreshHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl<S: RemoteStore + 'static> SyncClient<S> {
    /// Build the client and spawn its background tasks. Must run inside a
    /// tokio runtime.
    pub fn new(
        store: Arc<S>,
        notifier: &dyn ChangeNotifier,
        viewer: Option<UserId>,
        config: SyncConfig,
    ) -> Self {
        let cache: SharedCache = SharedCache::default();

        let (reconcile, handle) = ReconcileLoop::new(
            cache.clone(),
            store.clone(),
            viewer.clone(),
            config.clone(),
        );
        let coordinator = MutationCoordinator::new(
            cache.clone(),
            store,
            viewer.clone(),
            config.remote_timeout,
            handle.clone(),
        );

        let mut events = notifier.subscribe(&config.watched_tables);
        let pump_handle = handle.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                pump_handle.notify(event);
            }
            debug!("change feed closed");
        });
        let loop_task = tokio::spawn(reconcile.run());

        info!(viewer = ?viewer, tables = config.watched_tables.len(), "sync client started");

        Self {
            cache,
            coordinator,
            handle,
            tasks: vec![pump, loop_task],
        }
    }

    /// Snapshot of a cached entity.
    pub fn entity(&self, id: &str) -> Option<Entity> {
        lock(&self.cache).get(id).cloned()
    }

    /// Number of entities currently cached.
    pub fn cached_count(&self) -> usize {
        lock(&self.cache).len()
    }

    /// Watch one entity. The callback fires synchronously with the
    /// mutation that changed it; the subscription ends when the returned
    /// guard drops.
    pub fn subscribe(
        &self,
        entity_id: impl Into<EntityId>,
        callback: impl Fn(&atelier_engine::EntityChange) + Send + 'static,
    ) -> Subscription {
        let entity_id = entity_id.into();
        let observer = lock(&self.cache).subscribe(entity_id.clone(), callback);
        Subscription {
            cache: self.cache.clone(),
            entity_id,
            observer: Some(observer),
        }
    }

    /// Flip the viewer's reaction on a post or comment.
    pub async fn toggle_reaction(&self, subject: SubjectType, subject_id: &str) -> Result<bool> {
        self.coordinator.toggle_reaction(subject, subject_id).await
    }

    /// Buy a listing for the viewer.
    pub async fn acquire_listing(&self, listing_id: &str) -> Result<()> {
        self.coordinator.acquire_listing(listing_id).await
    }

    /// Post a comment or a reply. Returns the new comment's id.
    pub async fn post_comment(
        &self,
        post_id: &str,
        parent_comment_id: Option<&str>,
        content: impl Into<String>,
    ) -> Result<EntityId> {
        self.coordinator
            .post_comment(post_id, parent_comment_id, content)
            .await
    }

    /// Queue an authoritative refetch of a scope.
    pub fn refresh(&self, scope: Scope) {
        self.handle.refresh(scope);
    }

    /// Whether a reconciliation pass is currently fetching.
    pub fn is_refreshing(&self) -> bool {
        self.handle.is_refreshing()
    }
}

impl<S> Drop for SyncClient<S> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Guard for one entity observer; unsubscribes on drop.
pub struct Subscription {
    cache: SharedCache,
    entity_id: EntityId,
    observer: Option<ObserverId>,
}

impl Subscription {
    /// The entity this subscription watches.
    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    /// Stop watching before the guard drops.
    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(observer) = self.observer.take() {
            lock(&self.cache).unsubscribe(&self.entity_id, observer);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
