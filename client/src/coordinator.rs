//! Mutation coordinator.
//!
//! Implements the three write paths: reaction toggles, comment posting,
//! and exclusive listing acquisition. Each mutation applies its optimistic
//! patch synchronously, makes exactly one remote write, then confirms or
//! rolls back. Rapid repeats of the same intent on the same entity are
//! serialized behind a per-`(entity, kind)` lane lock, so a double tap
//! becomes toggle-then-untoggle rather than two racing inserts.
//!
//! The write-then-settle tail of every mutation runs as its own runtime
//! task. A caller that stops polling (screen teardown, `select!`) does
//! not cancel the mutation: the remote write still happens and the
//! pending record is always confirmed or rolled back, so the cache can
//! never be left shielding optimistic fields forever.

use atelier_engine::{
    Comment, Entity, EntityId, MutationKind, OptimisticPatch, SubjectType, UserId,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::reconcile::{RefreshHandle, Scope};
use crate::remote::{with_timeout, NewComment, RemoteStore};
use crate::{lock, now_millis, SharedCache};

type LaneKey = (EntityId, MutationKind);
type LaneMap = Arc<Mutex<HashMap<LaneKey, Arc<tokio::sync::Mutex<()>>>>>;

/// Drives optimistic mutations against the cache and the remote store.
pub struct MutationCoordinator<S> {
    cache: SharedCache,
    store: Arc<S>,
    viewer: Option<UserId>,
    remote_timeout: Duration,
    handle: RefreshHandle,
    /// One async lock per in-flight mutation lane. Queued callers wait for
    /// the in-flight mutation to settle, then run against the updated
    /// cache state. Entries are evicted once no task holds them.
    lanes: LaneMap,
}

/// Everything a detached mutation task owns. Cloned out of the
/// coordinator so the task has no lifetime tie to the caller.
struct MutationCtx<S> {
    cache: SharedCache,
    store: Arc<S>,
    handle: RefreshHandle,
    timeout: Duration,
    lanes: LaneMap,
    key: LaneKey,
}

impl<S: RemoteStore + 'static> MutationCoordinator<S> {
    pub fn new(
        cache: SharedCache,
        store: Arc<S>,
        viewer: Option<UserId>,
        remote_timeout: Duration,
        handle: RefreshHandle,
    ) -> Self {
        Self {
            cache,
            store,
            viewer,
            remote_timeout,
            handle,
            lanes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Flip the viewer's reaction on a post or comment.
    ///
    /// The count and flag flip in the cache immediately; exactly one remote
    /// write follows (an insert if the viewer had no reaction, a delete if
    /// they had one). On failure the flip is rolled back and an
    /// authoritative refetch of the subject is requested. Returns the
    /// viewer's reaction state after the toggle.
    pub async fn toggle_reaction(&self, subject: SubjectType, subject_id: &str) -> Result<bool> {
        let viewer = self.viewer.clone().ok_or(SyncError::Unauthenticated)?;
        let ctx = self.ctx(subject_id, MutationKind::ReactionToggle);
        settled(tokio::spawn(Self::toggle_task(ctx, viewer, subject))).await
    }

    async fn toggle_task(
        ctx: MutationCtx<S>,
        viewer: UserId,
        subject: SubjectType,
    ) -> Result<bool> {
        let mutation_id = Uuid::new_v4();
        let subject_id = ctx.key.0.clone();
        let lane = acquire_lane(&ctx.lanes, &ctx.key);
        let guard = lane.lock().await;

        let result = async {
            let (token, was_reacted) = {
                let mut cache = lock(&ctx.cache);
                let was_reacted = match cache.get(&subject_id) {
                    Some(Entity::Post(post)) => post.viewer_has_liked,
                    Some(Entity::Comment(comment)) => comment.viewer_has_reacted,
                    Some(_) => {
                        return Err(SyncError::Store(format!("not reactable: {subject_id}")))
                    }
                    None => {
                        return Err(
                            atelier_engine::Error::EntityNotFound(subject_id.clone()).into()
                        )
                    }
                };
                let token = cache.apply_optimistic(
                    &subject_id,
                    OptimisticPatch::ToggleReaction,
                    now_millis(),
                )?;
                (token, was_reacted)
            };

            debug!(%mutation_id, subject_id, was_reacted, "reaction toggle applied optimistically");

            let write = if was_reacted {
                with_timeout(
                    ctx.timeout,
                    ctx.store.delete_reaction(subject, &subject_id, &viewer),
                )
                .await
            } else {
                with_timeout(
                    ctx.timeout,
                    ctx.store.insert_reaction(subject, &subject_id, &viewer),
                )
                .await
            };

            match write {
                Ok(()) => {
                    // The token is gone if the subject was evicted
                    // mid-flight; nothing left to settle then.
                    if let Err(cache_err) = lock(&ctx.cache).confirm(token) {
                        warn!(%mutation_id, subject_id, error = %cache_err, "confirm skipped");
                    }
                    debug!(%mutation_id, subject_id, "reaction toggle confirmed");
                    Ok(!was_reacted)
                }
                Err(err) => {
                    if let Err(cache_err) = lock(&ctx.cache).rollback(token) {
                        warn!(%mutation_id, subject_id, error = %cache_err, "rollback skipped");
                    }
                    warn!(%mutation_id, subject_id, error = %err, "reaction toggle rolled back");
                    ctx.handle
                        .refresh(Scope::Subject(subject, subject_id.clone()));
                    Err(err)
                }
            }
        }
        .await;

        drop(guard);
        release_lane(&ctx.lanes, &ctx.key, lane);
        result
    }

    /// Acquire a listing exclusively for the viewer.
    ///
    /// No optimistic patch: the purchase only shows once the conditional
    /// remote update confirms it. The owner is read fresh from the store
    /// for the self-purchase check, never from the cache. A conditional
    /// update that affects zero rows means someone else won the race;
    /// that maps to [`SyncError::AlreadySold`] and is never retried.
    pub async fn acquire_listing(&self, listing_id: &str) -> Result<()> {
        let viewer = self.viewer.clone().ok_or(SyncError::Unauthenticated)?;
        let ctx = self.ctx(listing_id, MutationKind::Acquisition);
        settled(tokio::spawn(Self::acquisition_task(ctx, viewer))).await
    }

    async fn acquisition_task(ctx: MutationCtx<S>, viewer: UserId) -> Result<()> {
        let mutation_id = Uuid::new_v4();
        let listing_id = ctx.key.0.clone();
        let lane = acquire_lane(&ctx.lanes, &ctx.key);
        let guard = lane.lock().await;

        let result = async {
            let owner =
                with_timeout(ctx.timeout, ctx.store.fetch_listing_owner(&listing_id)).await?;
            if owner == viewer {
                debug!(%mutation_id, listing_id, "self-purchase rejected before any write");
                return Err(SyncError::SelfPurchaseForbidden);
            }

            let affected = match with_timeout(
                ctx.timeout,
                ctx.store.acquire_listing(&listing_id, &viewer),
            )
            .await
            {
                Ok(n) => n,
                Err(err) => {
                    warn!(%mutation_id, listing_id, error = %err, "acquisition failed");
                    ctx.handle.refresh(Scope::Listing(listing_id.clone()));
                    return Err(err);
                }
            };

            if affected == 0 {
                warn!(%mutation_id, listing_id, "lost acquisition race");
                ctx.handle.refresh(Scope::Listing(listing_id.clone()));
                return Err(SyncError::AlreadySold);
            }

            info!(%mutation_id, listing_id, buyer = %viewer, "listing acquired");

            // Pull the settled row straight away so the buyer sees their
            // purchase without waiting for a notification.
            match with_timeout(ctx.timeout, ctx.store.fetch_listing(&listing_id)).await {
                Ok(Some(row)) => {
                    lock(&ctx.cache).upsert_authoritative(Entity::Listing(row.into()));
                }
                Ok(None) | Err(_) => {
                    ctx.handle.refresh(Scope::Listing(listing_id.clone()));
                }
            }
            Ok(())
        }
        .await;

        drop(guard);
        release_lane(&ctx.lanes, &ctx.key, lane);
        result
    }

    /// Post a comment (or reply) on a post.
    ///
    /// The parent post's comment count bumps optimistically; the comment
    /// row itself only appears once the insert confirms. A reply to a
    /// reply is re-parented onto the top-level ancestor so threads stay
    /// one level deep. Returns the new comment's id.
    pub async fn post_comment(
        &self,
        post_id: &str,
        parent_comment_id: Option<&str>,
        content: impl Into<String>,
    ) -> Result<EntityId> {
        let viewer = self.viewer.clone().ok_or(SyncError::Unauthenticated)?;
        let parent = self.resolve_parent(post_id, parent_comment_id)?;
        let ctx = self.ctx(post_id, MutationKind::CommentCreate);
        settled(tokio::spawn(Self::comment_task(
            ctx,
            viewer,
            parent,
            content.into(),
        )))
        .await
    }

    async fn comment_task(
        ctx: MutationCtx<S>,
        viewer: UserId,
        parent: Option<EntityId>,
        content: String,
    ) -> Result<EntityId> {
        let mutation_id = Uuid::new_v4();
        let post_id = ctx.key.0.clone();
        let lane = acquire_lane(&ctx.lanes, &ctx.key);
        let guard = lane.lock().await;

        let result = async {
            let token = lock(&ctx.cache).apply_optimistic(
                &post_id,
                OptimisticPatch::BumpCommentCount { delta: 1 },
                now_millis(),
            )?;

            let insert = with_timeout(
                ctx.timeout,
                ctx.store.insert_comment(NewComment {
                    post_id: post_id.clone(),
                    parent_comment_id: parent.clone(),
                    author_id: viewer.clone(),
                    content,
                }),
            )
            .await;

            let row = match insert {
                Ok(row) => row,
                Err(err) => {
                    if let Err(cache_err) = lock(&ctx.cache).rollback(token) {
                        warn!(%mutation_id, post_id, error = %cache_err, "rollback skipped");
                    }
                    warn!(%mutation_id, post_id, error = %err, "comment insert rolled back");
                    ctx.handle.refresh(Scope::Post(post_id.clone()));
                    return Err(err);
                }
            };

            let comment_id = row.id.clone();
            {
                let mut cache = lock(&ctx.cache);
                if let Err(cache_err) = cache.confirm(token) {
                    warn!(%mutation_id, post_id, error = %cache_err, "confirm skipped");
                }
                cache.upsert_authoritative(Entity::Comment(Comment {
                    id: row.id,
                    post_id: row.post_id,
                    parent_comment_id: row.parent_comment_id,
                    author_id: row.author_id,
                    content: row.content,
                    reaction_count: 0,
                    viewer_has_reacted: false,
                }));
            }
            debug!(%mutation_id, post_id, comment_id = %comment_id, "comment confirmed");

            // Replace the optimistic bump with the authoritative count.
            match with_timeout(ctx.timeout, ctx.store.count_comments(&post_id)).await {
                Ok(count) => {
                    let mut cache = lock(&ctx.cache);
                    if let Some(post) = cache.get(&post_id).and_then(Entity::as_post) {
                        let mut post = post.clone();
                        post.comment_count = count;
                        cache.upsert_authoritative(Entity::Post(post));
                    }
                }
                Err(err) => {
                    warn!(%mutation_id, post_id, error = %err, "comment count refetch failed");
                    ctx.handle.refresh(Scope::Post(post_id.clone()));
                }
            }

            Ok(comment_id)
        }
        .await;

        drop(guard);
        release_lane(&ctx.lanes, &ctx.key, lane);
        result
    }

    /// Validate and normalize a reply's parent. A reply to a reply
    /// collapses onto the top-level ancestor; a parent cached under a
    /// different post is refused. An uncached parent id is passed through
    /// as given.
    fn resolve_parent(
        &self,
        post_id: &str,
        parent_comment_id: Option<&str>,
    ) -> Result<Option<EntityId>> {
        let Some(parent_id) = parent_comment_id else {
            return Ok(None);
        };

        let cache = lock(&self.cache);
        match cache.get(parent_id).and_then(Entity::as_comment) {
            Some(parent) => {
                if parent.post_id != post_id {
                    return Err(SyncError::InvalidParent(format!(
                        "{parent_id} belongs to {}",
                        parent.post_id
                    )));
                }
                // Collapse one level: replying to a reply anchors on the
                // reply's own parent.
                Ok(Some(
                    parent
                        .parent_comment_id
                        .clone()
                        .unwrap_or_else(|| parent_id.to_string()),
                ))
            }
            None => Ok(Some(parent_id.to_string())),
        }
    }

    fn ctx(&self, entity_id: &str, kind: MutationKind) -> MutationCtx<S> {
        MutationCtx {
            cache: self.cache.clone(),
            store: self.store.clone(),
            handle: self.handle.clone(),
            timeout: self.remote_timeout,
            lanes: self.lanes.clone(),
            key: (entity_id.to_string(), kind),
        }
    }

    #[cfg(test)]
    fn lane_count(&self) -> usize {
        self.lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Await a detached mutation task. The task keeps running to settlement
/// even if this future is dropped.
async fn settled<T>(task: JoinHandle<Result<T>>) -> Result<T> {
    match task.await {
        Ok(result) => result,
        Err(err) => Err(SyncError::Store(format!("mutation task stopped: {err}"))),
    }
}

fn acquire_lane(lanes: &LaneMap, key: &LaneKey) -> Arc<tokio::sync::Mutex<()>> {
    let mut lanes = lanes.lock().unwrap_or_else(PoisonError::into_inner);
    lanes.entry(key.clone()).or_default().clone()
}

/// Give a lane back, dropping the map entry once no task holds it.
fn release_lane(lanes: &LaneMap, key: &LaneKey, lane: Arc<tokio::sync::Mutex<()>>) {
    drop(lane);
    let mut lanes = lanes.lock().unwrap_or_else(PoisonError::into_inner);
    if lanes.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
        lanes.remove(key);
    }
}
