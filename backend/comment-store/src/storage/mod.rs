//! Storage contract shared by the in-memory and Postgres backends.
//!
//! Both backends implement [`Storage`] with identical semantics; callers
//! normally hold one as `Arc<dyn Storage>`.

pub mod memory;
pub mod postgres;
pub(crate) mod tree;

pub use memory::InMemoryStorage;
pub use postgres::PostgresStorage;

use async_trait::async_trait;
use futures::Stream;
use parking_lot::Mutex;
use std::fmt;
use std::ops::Range;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::{Comment, Post};

#[async_trait]
pub trait Storage: Send + Sync {
    /// Create a post. Always succeeds for the in-memory backend.
    async fn new_post(&self, text: &str, comments_enabled: bool) -> StoreResult<Post>;

    async fn get_post(&self, post_id: Uuid) -> StoreResult<Post>;

    /// Posts ordered newest first. An offset past the end yields an empty
    /// page, never an error.
    async fn get_posts(&self, limit: usize, offset: usize) -> StoreResult<Vec<Post>>;

    async fn set_comments_enabled(&self, post_id: Uuid, enabled: bool) -> StoreResult<Post>;

    /// Add a comment, top-level when `parent_id` is `None`.
    ///
    /// Fails with `PostNotFound`, `CommentsDisabled`, `ParentNotFound`
    /// (parent missing or owned by another post) or `ReplyTooDeep` (parent
    /// already at [`MAX_REPLY_DEPTH`](crate::models::MAX_REPLY_DEPTH)).
    /// Either the comment is fully stored or nothing changes.
    async fn add_comment(
        &self,
        post_id: Uuid,
        parent_id: Option<Uuid>,
        text: &str,
    ) -> StoreResult<Comment>;

    /// Top-level comments in creation order, paginated, each carrying its
    /// complete reply subtree.
    async fn get_comments_tree(
        &self,
        post_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Comment>>;

    /// Receive comments added to `post_id` from now on.
    async fn subscribe_to_comments(&self, post_id: Uuid) -> StoreResult<CommentSubscription>;
}

/// Slice of `0..total` selected by `limit`/`offset`.
///
/// `None` when `offset` is at or past the end; an oversized `limit` is
/// clipped to what is available.
pub(crate) fn page_window(total: usize, limit: usize, offset: usize) -> Option<Range<usize>> {
    if offset >= total {
        return None;
    }
    Some(offset..offset.saturating_add(limit).min(total))
}

/// Cancellation handle for a comment subscription.
///
/// `cancel` may be called any number of times; only the first call does
/// anything. Dropping the handle cancels the subscription as well.
pub struct Unsubscribe {
    action: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Unsubscribe {
    pub(crate) fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Mutex::new(Some(Box::new(action))),
        }
    }

    pub fn cancel(&self) {
        // take first so the action runs without holding the mutex
        let action = self.action.lock().take();
        if let Some(action) = action {
            action();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.action.lock().is_none()
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        if let Some(action) = self.action.get_mut().take() {
            action();
        }
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Live feed of comments added to one post.
///
/// Events arrive on a bounded queue owned by this subscription. The queue is
/// closed once the subscription is cancelled; `recv` then drains what is
/// left and returns `None`.
pub struct CommentSubscription {
    post_id: Uuid,
    events: mpsc::Receiver<Comment>,
    unsubscribe: Unsubscribe,
}

impl CommentSubscription {
    pub(crate) fn new(post_id: Uuid, events: mpsc::Receiver<Comment>, unsubscribe: Unsubscribe) -> Self {
        Self {
            post_id,
            events,
            unsubscribe,
        }
    }

    pub fn post_id(&self) -> Uuid {
        self.post_id
    }

    /// Next comment, or `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<Comment> {
        self.events.recv().await
    }

    /// Stop delivery. Safe to call repeatedly.
    pub fn unsubscribe(&self) {
        self.unsubscribe.cancel();
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.unsubscribe.is_cancelled()
    }

    /// Split into the raw event source and its cancellation handle.
    pub fn into_parts(self) -> (mpsc::Receiver<Comment>, Unsubscribe) {
        (self.events, self.unsubscribe)
    }
}

impl Stream for CommentSubscription {
    type Item = Comment;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Comment>> {
        self.get_mut().events.poll_recv(cx)
    }
}

impl fmt::Debug for CommentSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommentSubscription")
            .field("post_id", &self.post_id)
            .field("unsubscribe", &self.unsubscribe)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_page_window_clips_oversized_limit() {
        assert_eq!(page_window(5, 3, 0), Some(0..3));
        assert_eq!(page_window(5, 3, 3), Some(3..5));
        assert_eq!(page_window(5, usize::MAX, 1), Some(1..5));
    }

    #[test]
    fn test_page_window_offset_at_or_past_end_is_empty() {
        assert_eq!(page_window(5, 3, 5), None);
        assert_eq!(page_window(5, 3, 6), None);
        assert_eq!(page_window(0, 10, 0), None);
    }

    #[test]
    fn test_page_window_zero_limit() {
        assert_eq!(page_window(5, 0, 2), Some(2..2));
    }

    #[test]
    fn test_unsubscribe_runs_action_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = Unsubscribe::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!handle.is_cancelled());
        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
        drop(handle);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropping_unsubscribe_cancels() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        drop(Unsubscribe::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscription_stream_ends_when_sender_closes() {
        use futures::StreamExt;

        let (tx, rx) = mpsc::channel(2);
        let post_id = Uuid::new_v4();
        let mut subscription = CommentSubscription::new(post_id, rx, Unsubscribe::new(|| {}));

        let comment = Comment::new(post_id, None, "hi");
        tx.send(comment.clone()).await.unwrap();
        drop(tx);

        assert_eq!(subscription.next().await, Some(comment));
        assert_eq!(subscription.next().await, None);
    }
}
