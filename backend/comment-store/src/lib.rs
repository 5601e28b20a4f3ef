//! # Comment Store
//!
//! Storage for posts and their threaded comments, with live notification of
//! newly added comments.
//!
//! Two interchangeable backends implement the [`Storage`] contract:
//! - [`InMemoryStorage`]: process-local, guarded by a single reader/writer
//!   lock; subscribers are notified inline with a non-blocking send.
//! - [`PostgresStorage`]: durable, transactional writes; subscribers are fed
//!   by a background poller per subscription (at-least-once delivery).
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use comment_store::{build_storage, StoreConfig};
//!
//! async fn run() -> Result<(), Box<dyn std::error::Error>> {
//!     let storage = build_storage(&StoreConfig::from_env()?).await?;
//!
//!     let post = storage.new_post("First post", true).await?;
//!     let mut feed = storage.subscribe_to_comments(post.id).await?;
//!
//!     let root = storage.add_comment(post.id, None, "Nice").await?;
//!     storage.add_comment(post.id, Some(root.id), "Agreed").await?;
//!
//!     if let Some(comment) = feed.recv().await {
//!         println!("new comment: {}", comment.text);
//!     }
//!     feed.unsubscribe();
//!
//!     let threads = storage.get_comments_tree(post.id, 10, 0).await?;
//!     assert_eq!(threads[0].replies.len(), 1);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See [`StoreConfig::from_env`]: `STORAGE_TYPE` selects the backend,
//! `DATABASE_URL` and the `DB_*` variables configure the Postgres pool.

pub mod config;
pub mod db;
pub mod error;
pub mod metrics;
pub mod models;
pub mod storage;

pub use config::{StorageBackend, StoreConfig};
pub use db::{build_storage, run_migrations, MIGRATOR};
pub use error::{StoreError, StoreResult};
pub use models::{Comment, Post, MAX_REPLY_DEPTH};
pub use storage::{CommentSubscription, InMemoryStorage, PostgresStorage, Storage, Unsubscribe};
