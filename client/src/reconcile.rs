//! Reconciliation loop.
//!
//! One task owns all authoritative refetches. Change notifications from
//! the realtime feed and explicit refresh requests both land on the same
//! channel, get mapped to a refetch [`Scope`], and are coalesced so a
//! burst of notifications causes one fetch per scope. Results merge into
//! the cache through `upsert_authoritative`, which is idempotent, so
//! duplicate or overlapping notifications are harmless.

use atelier_engine::{Comment, Entity, EntityId, Post, SubjectType, UserId};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::error::Result;
use crate::remote::{ChangeEvent, RemoteStore, StoreResult, Table};
use crate::{lock, SharedCache};

/// What a reconciliation pass refetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// One post, with its counts and viewer flags.
    Post(EntityId),
    /// The whole feed.
    Feed,
    /// All comments of a post, plus the post's comment count.
    CommentsOf(EntityId),
    /// Reaction state of one post or comment.
    Subject(SubjectType, EntityId),
    /// One listing.
    Listing(EntityId),
    /// The available-listings set (applies the configured title filter).
    Listings,
}

/// Input to the reconciliation loop.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// A realtime row change; mapped to a scope before fetching.
    Notification(ChangeEvent),
    /// An explicit refresh of a known scope.
    Refresh(Scope),
}

/// Cheap cloneable handle for feeding the loop.
#[derive(Debug, Clone)]
pub struct RefreshHandle {
    tx: mpsc::UnboundedSender<Trigger>,
    fetching: Arc<AtomicBool>,
}

impl RefreshHandle {
    /// Request a refetch of a scope. Fire-and-forget; if the loop is gone
    /// the request is dropped.
    pub fn refresh(&self, scope: Scope) {
        let _ = self.tx.send(Trigger::Refresh(scope));
    }

    /// Forward a realtime change notification.
    pub fn notify(&self, event: ChangeEvent) {
        let _ = self.tx.send(Trigger::Notification(event));
    }

    /// Whether a reconciliation pass is currently fetching. Suitable for
    /// a "refreshing" indicator in the UI.
    pub fn is_refreshing(&self) -> bool {
        self.fetching.load(Ordering::SeqCst)
    }

    /// Handle with no loop behind it; triggers queue on the receiver.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<Trigger>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                fetching: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }
}

/// The reconciliation loop. Single consumer of the trigger channel.
pub struct ReconcileLoop<S> {
    cache: SharedCache,
    store: Arc<S>,
    viewer: Option<UserId>,
    config: SyncConfig,
    rx: mpsc::UnboundedReceiver<Trigger>,
    fetching: Arc<AtomicBool>,
}

impl<S: RemoteStore> ReconcileLoop<S> {
    /// Create the loop and its feeding handle.
    pub fn new(
        cache: SharedCache,
        store: Arc<S>,
        viewer: Option<UserId>,
        config: SyncConfig,
    ) -> (Self, RefreshHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let fetching = Arc::new(AtomicBool::new(false));
        (
            Self {
                cache,
                store,
                viewer,
                config,
                rx,
                fetching: fetching.clone(),
            },
            RefreshHandle { tx, fetching },
        )
    }

    /// Run until every [`RefreshHandle`] is dropped.
    pub async fn run(mut self) {
        while let Some(trigger) = self.rx.recv().await {
            let mut scopes = Vec::new();
            if let Some(scope) = scope_for(&trigger) {
                scopes.push(scope);
            }

            // Drain whatever queued up while we were idle; one fetch per
            // distinct scope.
            while let Ok(trigger) = self.rx.try_recv() {
                if let Some(scope) = scope_for(&trigger) {
                    if !scopes.contains(&scope) {
                        scopes.push(scope);
                    }
                }
            }

            if scopes.is_empty() {
                continue;
            }

            self.fetching.store(true, Ordering::SeqCst);
            debug!(scopes = ?scopes, "reconciliation pass");

            for scope in scopes {
                if let Err(err) = self.fetch_scope(&scope).await {
                    warn!(?scope, error = %err, "reconciliation fetch failed");
                }
            }

            self.fetching.store(false, Ordering::SeqCst);
        }
        debug!("reconcile loop shutting down");
    }

    async fn fetch_scope(&self, scope: &Scope) -> Result<()> {
        match scope {
            Scope::Post(id) => self.refetch_post(id).await,
            Scope::Feed => self.refetch_feed().await,
            Scope::CommentsOf(post_id) => self.refetch_comments(post_id).await,
            Scope::Subject(subject, id) => self.refetch_subject(*subject, id).await,
            Scope::Listing(id) => self.refetch_listing(id).await,
            Scope::Listings => self.refetch_listings().await,
        }
    }

    async fn refetch_post(&self, id: &str) -> Result<()> {
        match self.store.fetch_post(id).await? {
            Some(row) => {
                let post = self.hydrate_post(row).await?;
                lock(&self.cache).upsert_authoritative(Entity::Post(post));
            }
            None => {
                lock(&self.cache).remove(id);
            }
        }
        Ok(())
    }

    async fn refetch_feed(&self) -> Result<()> {
        let rows = self.store.fetch_posts().await?;
        for row in rows {
            let post = self.hydrate_post(row).await?;
            lock(&self.cache).upsert_authoritative(Entity::Post(post));
        }
        Ok(())
    }

    async fn refetch_comments(&self, post_id: &str) -> Result<()> {
        let rows = self.store.fetch_comments(post_id).await?;
        for row in rows {
            let comment = self.hydrate_comment(row).await?;
            lock(&self.cache).upsert_authoritative(Entity::Comment(comment));
        }

        // Keep the parent post's count in step with the comment set.
        let count = self.store.count_comments(post_id).await?;
        let mut cache = lock(&self.cache);
        if let Some(post) = cache.get(post_id).and_then(Entity::as_post) {
            let mut post = post.clone();
            post.comment_count = count;
            cache.upsert_authoritative(Entity::Post(post));
        }
        Ok(())
    }

    async fn refetch_subject(&self, subject: SubjectType, id: &str) -> Result<()> {
        let count = self.store.count_reactions(subject, id).await?;
        let reacted = self.viewer_reacted(subject, id).await?;

        let mut cache = lock(&self.cache);
        match (subject, cache.get(id).cloned()) {
            (SubjectType::Post, Some(Entity::Post(mut post))) => {
                post.like_count = count;
                post.viewer_has_liked = reacted;
                cache.upsert_authoritative(Entity::Post(post));
            }
            (SubjectType::Comment, Some(Entity::Comment(mut comment))) => {
                comment.reaction_count = count;
                comment.viewer_has_reacted = reacted;
                cache.upsert_authoritative(Entity::Comment(comment));
            }
            // Nothing cached to reconcile onto.
            _ => {}
        }
        Ok(())
    }

    async fn refetch_listing(&self, id: &str) -> Result<()> {
        match self.store.fetch_listing(id).await? {
            Some(row) => {
                lock(&self.cache).upsert_authoritative(Entity::Listing(row.into()));
            }
            None => {
                lock(&self.cache).remove(id);
            }
        }
        Ok(())
    }

    async fn refetch_listings(&self) -> Result<()> {
        let rows = self
            .store
            .fetch_available_listings(self.config.listing_title_filter.as_deref())
            .await?;

        let fetched_ids: Vec<EntityId> = rows.iter().map(|r| r.id.clone()).collect();

        let mut cache = lock(&self.cache);
        for row in rows {
            cache.upsert_authoritative(Entity::Listing(row.into()));
        }

        // Listings that left the available set (sold elsewhere) are
        // evicted rather than kept stale.
        let gone: Vec<EntityId> = cache
            .iter()
            .filter_map(Entity::as_listing)
            .filter(|l| l.is_available() && !fetched_ids.contains(&l.id))
            .map(|l| l.id.clone())
            .collect();
        for id in gone {
            cache.remove(&id);
        }
        Ok(())
    }

    /// Hydrate a post row into a render-ready entity.
    async fn hydrate_post(&self, row: crate::remote::PostRow) -> Result<Post> {
        let like_count = self.store.count_reactions(SubjectType::Post, &row.id).await?;
        let comment_count = self.store.count_comments(&row.id).await?;
        let viewer_has_liked = self.viewer_reacted(SubjectType::Post, &row.id).await?;

        Ok(Post {
            id: row.id,
            author_id: row.author_id,
            content: row.content,
            media_ref: row.media_ref,
            like_count,
            comment_count,
            viewer_has_liked,
        })
    }

    /// Hydrate a comment row into a render-ready entity.
    async fn hydrate_comment(&self, row: crate::remote::CommentRow) -> Result<Comment> {
        let reaction_count = self
            .store
            .count_reactions(SubjectType::Comment, &row.id)
            .await?;
        let viewer_has_reacted = self.viewer_reacted(SubjectType::Comment, &row.id).await?;

        Ok(Comment {
            id: row.id,
            post_id: row.post_id,
            parent_comment_id: row.parent_comment_id,
            author_id: row.author_id,
            content: row.content,
            reaction_count,
            viewer_has_reacted,
        })
    }

    async fn viewer_reacted(&self, subject: SubjectType, id: &str) -> StoreResult<bool> {
        match &self.viewer {
            Some(viewer) => self.store.viewer_has_reaction(subject, id, viewer).await,
            None => Ok(false),
        }
    }
}

/// Map a trigger to the scope it should refetch.
///
/// Notification payloads only steer the choice of scope; the data itself
/// always comes from a fresh authoritative read.
fn scope_for(trigger: &Trigger) -> Option<Scope> {
    match trigger {
        Trigger::Refresh(scope) => Some(scope.clone()),
        Trigger::Notification(event) => match event.table {
            Table::Posts => match row_str(event, "id") {
                Some(id) => Some(Scope::Post(id)),
                None => Some(Scope::Feed),
            },
            Table::Comments => row_str(event, "postId").map(Scope::CommentsOf),
            Table::Reactions => {
                let subject = row_value(event, "subjectType")
                    .and_then(|v| serde_json::from_value::<SubjectType>(v).ok())?;
                let id = row_str(event, "subjectId")?;
                Some(Scope::Subject(subject, id))
            }
            Table::Listings => Some(Scope::Listings),
        },
    }
}

fn row_value(event: &ChangeEvent, key: &str) -> Option<Value> {
    event
        .new_row
        .as_ref()
        .and_then(|row| row.get(key))
        .or_else(|| event.old_row.as_ref().and_then(|row| row.get(key)))
        .cloned()
}

fn row_str(event: &ChangeEvent, key: &str) -> Option<String> {
    row_value(event, key)
        .as_ref()
        .and_then(Value::as_str)
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::EventType;
    use serde_json::json;

    fn event(table: Table, new_row: Option<Value>, old_row: Option<Value>) -> ChangeEvent {
        ChangeEvent {
            table,
            event_type: EventType::Update,
            new_row,
            old_row,
        }
    }

    #[test]
    fn post_notification_maps_to_post_scope() {
        let trigger = Trigger::Notification(event(
            Table::Posts,
            Some(json!({"id": "post_1", "content": "x"})),
            None,
        ));
        assert_eq!(scope_for(&trigger), Some(Scope::Post("post_1".into())));
    }

    #[test]
    fn post_notification_without_id_falls_back_to_feed() {
        let trigger = Trigger::Notification(event(Table::Posts, None, None));
        assert_eq!(scope_for(&trigger), Some(Scope::Feed));
    }

    #[test]
    fn comment_notification_maps_to_comments_scope() {
        let trigger = Trigger::Notification(event(
            Table::Comments,
            Some(json!({"id": "comment_9", "postId": "post_1"})),
            None,
        ));
        assert_eq!(
            scope_for(&trigger),
            Some(Scope::CommentsOf("post_1".into()))
        );
    }

    #[test]
    fn reaction_delete_reads_old_row() {
        let trigger = Trigger::Notification(event(
            Table::Reactions,
            None,
            Some(json!({"subjectType": "comment", "subjectId": "comment_3"})),
        ));
        assert_eq!(
            scope_for(&trigger),
            Some(Scope::Subject(SubjectType::Comment, "comment_3".into()))
        );
    }

    #[test]
    fn listing_notification_maps_to_marketplace_scope() {
        let trigger = Trigger::Notification(event(
            Table::Listings,
            Some(json!({"id": "listing_1", "buyerId": "ben"})),
            None,
        ));
        assert_eq!(scope_for(&trigger), Some(Scope::Listings));
    }

    #[test]
    fn malformed_reaction_notification_is_ignored() {
        let trigger = Trigger::Notification(event(
            Table::Reactions,
            Some(json!({"subjectType": "galaxy"})),
            None,
        ));
        assert_eq!(scope_for(&trigger), None);
    }

    #[test]
    fn refresh_trigger_passes_scope_through() {
        let trigger = Trigger::Refresh(Scope::Feed);
        assert_eq!(scope_for(&trigger), Some(Scope::Feed));
    }
}
