//! Remote store and change feed seams.
//!
//! The sync layer talks to the backing store through [`RemoteStore`] and
//! receives realtime row changes through [`ChangeNotifier`]. Both are
//! traits so tests can drive the layer with in-memory fakes.

use async_trait::async_trait;
use atelier_engine::{EntityId, Listing, SubjectType, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::error::SyncError;

/// Result type for remote store calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failures reported by the backing store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// A concurrent write invalidated this one.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The requested row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network or transport failure.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// The store refused the write (constraint, policy).
    #[error("rejected: {0}")]
    Rejected(String),
}

/// A post row as stored remotely. Aggregates and viewer-derived fields
/// are not columns; they are computed at hydration time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRow {
    pub id: EntityId,
    pub author_id: UserId,
    pub content: String,
    pub media_ref: Option<String>,
}

/// A comment row as stored remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRow {
    pub id: EntityId,
    pub post_id: EntityId,
    pub parent_comment_id: Option<EntityId>,
    pub author_id: UserId,
    pub content: String,
}

/// A listing row as stored remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingRow {
    pub id: EntityId,
    pub owner_id: UserId,
    pub buyer_id: Option<UserId>,
    pub price_cents: u64,
    pub title: String,
}

impl From<ListingRow> for Listing {
    fn from(row: ListingRow) -> Self {
        Listing {
            id: row.id,
            owner_id: row.owner_id,
            buyer_id: row.buyer_id,
            price_cents: row.price_cents,
            title: row.title,
        }
    }
}

/// Payload for inserting a comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    pub post_id: EntityId,
    pub parent_comment_id: Option<EntityId>,
    pub author_id: UserId,
    pub content: String,
}

/// Remote tables the client watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Posts,
    Comments,
    Reactions,
    Listings,
}

/// Kind of row change carried by a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Insert,
    Update,
    Delete,
}

/// A realtime change notification. Row payloads are raw JSON; the
/// reconcile loop only reads the handful of fields it needs to pick a
/// refetch scope, and never merges notification payloads directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub table: Table,
    pub event_type: EventType,
    pub new_row: Option<Value>,
    pub old_row: Option<Value>,
}

/// The backing store interface.
///
/// `acquire_listing` is the one conditional write: it must atomically set
/// the buyer only where the row currently has none, and report the number
/// of rows affected. Everything else is plain reads, counts, and inserts.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn fetch_post(&self, id: &str) -> StoreResult<Option<PostRow>>;

    async fn fetch_posts(&self) -> StoreResult<Vec<PostRow>>;

    async fn fetch_comments(&self, post_id: &str) -> StoreResult<Vec<CommentRow>>;

    async fn fetch_listing(&self, id: &str) -> StoreResult<Option<ListingRow>>;

    /// Listings with no buyer, optionally filtered by a title substring.
    async fn fetch_available_listings(
        &self,
        title_filter: Option<&str>,
    ) -> StoreResult<Vec<ListingRow>>;

    /// Owner of a listing, fetched fresh for the self-purchase check.
    async fn fetch_listing_owner(&self, id: &str) -> StoreResult<UserId>;

    async fn count_reactions(&self, subject: SubjectType, subject_id: &str) -> StoreResult<u64>;

    async fn viewer_has_reaction(
        &self,
        subject: SubjectType,
        subject_id: &str,
        viewer: &str,
    ) -> StoreResult<bool>;

    async fn insert_reaction(
        &self,
        subject: SubjectType,
        subject_id: &str,
        viewer: &str,
    ) -> StoreResult<()>;

    async fn delete_reaction(
        &self,
        subject: SubjectType,
        subject_id: &str,
        viewer: &str,
    ) -> StoreResult<()>;

    async fn count_comments(&self, post_id: &str) -> StoreResult<u64>;

    async fn insert_comment(&self, comment: NewComment) -> StoreResult<CommentRow>;

    /// Conditionally set the buyer where none is set yet. Returns the
    /// number of rows affected: 1 when this caller won, 0 when the row
    /// was already taken.
    async fn acquire_listing(&self, listing_id: &str, buyer_id: &str) -> StoreResult<u64>;
}

/// Source of realtime change notifications.
pub trait ChangeNotifier: Send + Sync {
    /// Subscribe to row changes on the given tables. Delivery is
    /// at-least-once; duplicates are expected and harmless downstream.
    fn subscribe(&self, tables: &[Table]) -> mpsc::UnboundedReceiver<ChangeEvent>;
}

/// Race a remote call against the configured deadline.
pub(crate) async fn with_timeout<T, F>(limit: Duration, fut: F) -> crate::error::Result<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(SyncError::from),
        Err(_) => Err(SyncError::Timeout),
    }
}
