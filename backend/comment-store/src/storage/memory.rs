//! In-process storage backend.
//!
//! All state lives in one aggregate behind a single reader/writer lock:
//! reads take the shared side, every mutation (including subscriber list
//! changes and the notification fan-out) takes the exclusive side. Nothing
//! here blocks on I/O, so the lock is only ever held briefly.
//!
//! Notifications are best effort: each subscriber owns a queue of capacity 1
//! and a comment that finds the queue full is dropped for that subscriber.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{page_window, tree, CommentSubscription, Storage, Unsubscribe};
use crate::error::{StoreError, StoreResult};
use crate::metrics::{self, ACTIVE_SUBSCRIPTIONS, NOTIFICATIONS_DROPPED_TOTAL};
use crate::models::{Comment, Post, MAX_REPLY_DEPTH};

const BACKEND: &str = "memory";

/// Queue capacity of every in-process subscriber.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 1;

/// Position of a comment under its post: either top level or below a comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ParentKey {
    Root,
    Comment(Uuid),
}

impl From<Option<Uuid>> for ParentKey {
    fn from(parent_id: Option<Uuid>) -> Self {
        parent_id.map_or(ParentKey::Root, ParentKey::Comment)
    }
}

/// Where a stored comment sits: its post and its reply depth.
#[derive(Debug, Clone, Copy)]
struct Placement {
    post_id: Uuid,
    depth: usize,
}

/// Unique identifier of one subscription, used for precise removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SubscriberId(Uuid);

struct Subscriber {
    id: SubscriberId,
    sender: mpsc::Sender<Comment>,
}

#[derive(Default)]
struct State {
    /// Posts in creation order
    posts: Vec<Post>,
    post_index: HashMap<Uuid, usize>,
    /// comment id -> owning post and depth
    placements: HashMap<Uuid, Placement>,
    /// (post id, parent) -> direct children in creation order
    comments: HashMap<(Uuid, ParentKey), Vec<Comment>>,
    /// post id -> live subscribers
    subscribers: HashMap<Uuid, Vec<Subscriber>>,
}

impl State {
    fn post_mut(&mut self, post_id: Uuid) -> Option<&mut Post> {
        let idx = *self.post_index.get(&post_id)?;
        self.posts.get_mut(idx)
    }

    fn post(&self, post_id: Uuid) -> Option<&Post> {
        self.post_index
            .get(&post_id)
            .and_then(|idx| self.posts.get(*idx))
    }

    fn children(&self, post_id: Uuid, parent: ParentKey) -> &[Comment] {
        self.comments
            .get(&(post_id, parent))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Push `comment` to every subscriber of its post without blocking.
    ///
    /// A full queue loses the event; a closed queue (receiver dropped)
    /// removes the subscriber.
    fn notify(&mut self, comment: &Comment) {
        let Some(subscribers) = self.subscribers.get_mut(&comment.post_id) else {
            return;
        };

        let before = subscribers.len();
        subscribers.retain(|subscriber| match subscriber.sender.try_send(comment.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                NOTIFICATIONS_DROPPED_TOTAL.with_label_values(&[BACKEND]).inc();
                warn!(
                    post_id = %comment.post_id,
                    comment_id = %comment.id,
                    subscriber = ?subscriber.id,
                    "Subscriber queue full, notification dropped"
                );
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });

        let pruned = before - subscribers.len();
        if pruned > 0 {
            ACTIVE_SUBSCRIPTIONS
                .with_label_values(&[BACKEND])
                .sub(pruned as i64);
            debug!(
                post_id = %comment.post_id,
                pruned,
                "Removed subscribers whose receivers were dropped"
            );
        }
        if subscribers.is_empty() {
            self.subscribers.remove(&comment.post_id);
        }
    }

    /// Remove one subscriber. Its sender is dropped here, which closes the
    /// queue only after the subscriber is no longer reachable by `notify`.
    fn remove_subscriber(&mut self, post_id: Uuid, subscriber_id: SubscriberId) {
        let Some(subscribers) = self.subscribers.get_mut(&post_id) else {
            return;
        };

        let before = subscribers.len();
        subscribers.retain(|s| s.id != subscriber_id);
        if subscribers.len() != before {
            ACTIVE_SUBSCRIPTIONS.with_label_values(&[BACKEND]).dec();
            debug!(
                post_id = %post_id,
                subscriber = ?subscriber_id,
                remaining = subscribers.len(),
                "Removed comment subscriber"
            );
        }
        if subscribers.is_empty() {
            self.subscribers.remove(&post_id);
        }
    }
}

/// Thread-safe in-memory store. Clones share the same underlying state.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    inner: Arc<RwLock<State>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live subscribers of a post (for debugging/metrics)
    pub fn subscriber_count(&self, post_id: Uuid) -> usize {
        self.inner
            .read()
            .subscribers
            .get(&post_id)
            .map_or(0, Vec::len)
    }

    fn unsubscribe_handle(&self, post_id: Uuid, subscriber_id: SubscriberId) -> Unsubscribe {
        let state: Weak<RwLock<State>> = Arc::downgrade(&self.inner);
        Unsubscribe::new(move || {
            if let Some(state) = state.upgrade() {
                state.write().remove_subscriber(post_id, subscriber_id);
            }
        })
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn new_post(&self, text: &str, comments_enabled: bool) -> StoreResult<Post> {
        let post = {
            // stamp under the lock so insertion order matches created_at order
            let mut state = self.inner.write();
            let post = Post::new(text, comments_enabled);
            let idx = state.posts.len();
            state.post_index.insert(post.id, idx);
            state.posts.push(post.clone());
            post
        };

        debug!(post_id = %post.id, "Created post");
        metrics::observe(BACKEND, "new_post", Ok(post))
    }

    async fn get_post(&self, post_id: Uuid) -> StoreResult<Post> {
        let result = self
            .inner
            .read()
            .post(post_id)
            .cloned()
            .ok_or(StoreError::PostNotFound(post_id));
        metrics::observe(BACKEND, "get_post", result)
    }

    async fn get_posts(&self, limit: usize, offset: usize) -> StoreResult<Vec<Post>> {
        let state = self.inner.read();
        let total = state.posts.len();

        // newest first: page index i maps to the i-th post from the end
        let page = page_window(total, limit, offset)
            .map(|range| {
                range
                    .map(|i| state.posts[total - 1 - i].clone())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        drop(state);

        metrics::observe(BACKEND, "get_posts", Ok(page))
    }

    async fn set_comments_enabled(&self, post_id: Uuid, enabled: bool) -> StoreResult<Post> {
        let result = {
            let mut state = self.inner.write();
            match state.post_mut(post_id) {
                Some(post) => {
                    post.comments_enabled = enabled;
                    Ok(post.clone())
                }
                None => Err(StoreError::PostNotFound(post_id)),
            }
        };

        if result.is_ok() {
            debug!(post_id = %post_id, enabled, "Updated comments_enabled");
        }
        metrics::observe(BACKEND, "set_comments_enabled", result)
    }

    async fn add_comment(
        &self,
        post_id: Uuid,
        parent_id: Option<Uuid>,
        text: &str,
    ) -> StoreResult<Comment> {
        let result = {
            let mut state = self.inner.write();
            insert_comment(&mut state, post_id, parent_id, text)
        };

        if let Ok(comment) = &result {
            debug!(
                post_id = %post_id,
                comment_id = %comment.id,
                parent_id = ?parent_id,
                "Added comment"
            );
        }
        metrics::observe(BACKEND, "add_comment", result)
    }

    async fn get_comments_tree(
        &self,
        post_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Comment>> {
        let result = {
            let state = self.inner.read();
            if state.post(post_id).is_none() {
                Err(StoreError::PostNotFound(post_id))
            } else {
                let roots = state.children(post_id, ParentKey::Root);
                let page = match page_window(roots.len(), limit, offset) {
                    Some(range) => tree::assemble(&roots[range], |id| {
                        state.children(post_id, ParentKey::Comment(id))
                    }),
                    None => Vec::new(),
                };
                Ok(page)
            }
        };
        metrics::observe(BACKEND, "get_comments_tree", result)
    }

    async fn subscribe_to_comments(&self, post_id: Uuid) -> StoreResult<CommentSubscription> {
        let subscriber_id = SubscriberId(Uuid::new_v4());

        let registered = {
            let mut state = self.inner.write();
            if state.post(post_id).is_none() {
                Err(StoreError::PostNotFound(post_id))
            } else {
                let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
                let subscribers = state.subscribers.entry(post_id).or_default();
                subscribers.push(Subscriber {
                    id: subscriber_id,
                    sender: tx,
                });
                debug!(
                    post_id = %post_id,
                    subscriber = ?subscriber_id,
                    total = subscribers.len(),
                    "Added comment subscriber"
                );
                Ok(rx)
            }
        };

        let result = registered.map(|rx| {
            ACTIVE_SUBSCRIPTIONS.with_label_values(&[BACKEND]).inc();
            CommentSubscription::new(post_id, rx, self.unsubscribe_handle(post_id, subscriber_id))
        });
        metrics::observe(BACKEND, "subscribe_to_comments", result)
    }
}

/// Validate and store a comment, then fan it out. Runs entirely under the
/// exclusive lock so subscribers only ever see comments that reads can find.
fn insert_comment(
    state: &mut State,
    post_id: Uuid,
    parent_id: Option<Uuid>,
    text: &str,
) -> StoreResult<Comment> {
    let post = state
        .post(post_id)
        .ok_or(StoreError::PostNotFound(post_id))?;
    if !post.comments_enabled {
        return Err(StoreError::CommentsDisabled(post_id));
    }

    let depth = match parent_id {
        None => 0,
        Some(parent) => match state.placements.get(&parent) {
            Some(placement) if placement.post_id == post_id => {
                if placement.depth >= MAX_REPLY_DEPTH {
                    return Err(StoreError::ReplyTooDeep(parent));
                }
                placement.depth + 1
            }
            _ => return Err(StoreError::ParentNotFound(parent)),
        },
    };

    let comment = Comment::new(post_id, parent_id, text);
    state
        .comments
        .entry((post_id, ParentKey::from(parent_id)))
        .or_default()
        .push(comment.clone());
    state
        .placements
        .insert(comment.id, Placement { post_id, depth });

    state.notify(&comment);
    Ok(comment)
}
