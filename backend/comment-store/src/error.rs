//! Error types for the comment store.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by every [`Storage`](crate::storage::Storage) backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The post id does not resolve
    #[error("post with ID {0} not found")]
    PostNotFound(Uuid),

    /// The parent comment does not exist within the target post
    #[error("parent comment with ID {0} not found")]
    ParentNotFound(Uuid),

    /// The parent comment already sits at the maximum reply depth
    #[error("parent comment {0} is at the maximum reply depth of {max}", max = crate::models::MAX_REPLY_DEPTH)]
    ReplyTooDeep(Uuid),

    /// Write attempted against a post with comments turned off
    #[error("comments are disabled for post {0}")]
    CommentsDisabled(Uuid),

    /// Connectivity or transaction failure in the durable backend
    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Initial schema creation failed
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Invalid store configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// True for both the post and the parent-comment variants.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::PostNotFound(_) | Self::ParentNotFound(_))
    }

    pub fn is_comments_disabled(&self) -> bool {
        matches!(self, Self::CommentsDisabled(_))
    }

    /// Short label used for metrics.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::PostNotFound(_) | Self::ParentNotFound(_) => "not_found",
            Self::CommentsDisabled(_) => "comments_disabled",
            Self::ReplyTooDeep(_) => "reply_too_deep",
            Self::Persistence(_) | Self::Migration(_) => "persistence",
            Self::Config(_) => "config",
        }
    }
}
