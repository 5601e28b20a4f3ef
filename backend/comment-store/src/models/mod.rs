//! Data models for the comment store
//!
//! - Post: a piece of text that may accept comments
//! - Comment: a message on a post, optionally replying to another comment
//!
//! Values handed out by a store are detached copies; mutating them never
//! touches backend state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Deepest level a reply may sit at. Top-level comments are at depth 0.
///
/// Reply trees are plain nested values, so dropping, cloning or serializing
/// one recurses once per level; the cap keeps that bounded.
pub const MAX_REPLY_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: Uuid,
    pub text: String,
    pub comments_enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Post {
    pub(crate) fn new(text: &str, comments_enabled: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.to_string(),
            comments_enabled,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Comment {
    pub id: Uuid,
    pub post_id: Uuid,
    /// `None` for a top-level comment
    pub parent_id: Option<Uuid>,
    pub text: String,
    pub created_at: DateTime<Utc>,
    /// Reply subtree; only populated on values returned by
    /// `Storage::get_comments_tree`. Never persisted.
    #[sqlx(skip)]
    #[serde(default)]
    pub replies: Vec<Comment>,
}

impl Comment {
    pub(crate) fn new(post_id: Uuid, parent_id: Option<Uuid>, text: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            post_id,
            parent_id,
            text: text.to_string(),
            created_at: Utc::now(),
            replies: Vec::new(),
        }
    }

    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Copy of this comment without its reply subtree.
    pub fn detached(&self) -> Self {
        Self {
            id: self.id,
            post_id: self.post_id,
            parent_id: self.parent_id,
            text: self.text.clone(),
            created_at: self.created_at,
            replies: Vec::new(),
        }
    }

    /// Number of comments in this subtree, including `self`.
    pub fn subtree_len(&self) -> usize {
        let mut count = 0;
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            count += 1;
            pending.extend(node.replies.iter());
        }
        count
    }
}
