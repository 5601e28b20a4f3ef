//! Postgres storage backend.
//!
//! Writes go through transactions; correctness relies on the database's
//! isolation rather than any in-process lock. Comment subscriptions are fed
//! by one background poller per subscriber that queries for rows newer than
//! its watermark at a fixed interval.
//!
//! # Delivery guarantees
//!
//! Polling compares `created_at > watermark`, so delivery is at-least-once
//! per subscriber, not exactly-once: rows sharing a timestamp with the
//! watermark, or committed out of timestamp order, can be seen twice or
//! arrive late relative to their siblings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{page_window, tree, CommentSubscription, Storage, Unsubscribe};
use crate::error::{StoreError, StoreResult};
use crate::metrics::{self, ACTIVE_SUBSCRIPTIONS, POLL_ERRORS_TOTAL};
use crate::models::{Comment, Post, MAX_REPLY_DEPTH};

const BACKEND: &str = "postgres";

/// Interval between two change-feed polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(4);

/// Queue capacity of every Postgres-backed subscriber.
pub const DEFAULT_SUBSCRIPTION_BUFFER: usize = 5;

/// Durable store over a Postgres pool.
#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
    poll_interval: Duration,
    subscription_buffer: usize,
}

impl PostgresStorage {
    /// Wrap a live pool. The schema must already exist (see `db::MIGRATOR`).
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            poll_interval: DEFAULT_POLL_INTERVAL,
            subscription_buffer: DEFAULT_SUBSCRIPTION_BUFFER,
        }
    }

    /// Override the polling interval (at least one millisecond).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Override the per-subscriber queue capacity (at least one).
    pub fn with_subscription_buffer(mut self, capacity: usize) -> Self {
        self.subscription_buffer = capacity.max(1);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn post_exists(&self, post_id: Uuid) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM posts WHERE id = $1)")
            .bind(post_id)
            .fetch_one(&self.pool)
            .await
    }

    async fn load_comments_tree(
        &self,
        post_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Comment>> {
        if !self.post_exists(post_id).await? {
            return Err(StoreError::PostNotFound(post_id));
        }

        let comments = sqlx::query_as::<_, Comment>(
            r#"
            SELECT id, post_id, parent_id, text, created_at
            FROM comments
            WHERE post_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;

        // One pass: roots in creation order, replies grouped under their parent.
        let mut roots = Vec::new();
        let mut replies: HashMap<Uuid, Vec<Comment>> = HashMap::new();
        for comment in comments {
            match comment.parent_id {
                Some(parent) => replies.entry(parent).or_default().push(comment),
                None => roots.push(comment),
            }
        }

        let Some(range) = page_window(roots.len(), limit, offset) else {
            return Ok(Vec::new());
        };
        Ok(tree::assemble(&roots[range], |id| {
            replies.get(&id).map(Vec::as_slice).unwrap_or(&[])
        }))
    }

    async fn insert_comment(
        &self,
        post_id: Uuid,
        parent_id: Option<Uuid>,
        text: &str,
    ) -> StoreResult<Comment> {
        let mut tx = self.pool.begin().await?;

        // FOR SHARE holds off a concurrent comments_enabled toggle until commit
        let enabled = sqlx::query_scalar::<_, bool>(
            "SELECT comments_enabled FROM posts WHERE id = $1 FOR SHARE",
        )
        .bind(post_id)
        .fetch_optional(&mut *tx)
        .await?;

        match enabled {
            None => return Err(StoreError::PostNotFound(post_id)),
            Some(false) => return Err(StoreError::CommentsDisabled(post_id)),
            Some(true) => {}
        }

        let depth = match parent_id {
            None => 0,
            Some(parent) => {
                let parent_depth = sqlx::query_scalar::<_, i32>(
                    "SELECT depth FROM comments WHERE id = $1 AND post_id = $2",
                )
                .bind(parent)
                .bind(post_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(StoreError::ParentNotFound(parent))?;

                if usize::try_from(parent_depth).map_or(true, |d| d >= MAX_REPLY_DEPTH) {
                    return Err(StoreError::ReplyTooDeep(parent));
                }
                parent_depth + 1
            }
        };

        let comment = sqlx::query_as::<_, Comment>(
            r#"
            INSERT INTO comments (id, post_id, parent_id, text, depth)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, post_id, parent_id, text, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(post_id)
        .bind(parent_id)
        .bind(text)
        .bind(depth)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(comment)
    }

    async fn start_subscription(&self, post_id: Uuid) -> StoreResult<CommentSubscription> {
        // The watermark comes from the database clock so it is comparable
        // with the created_at values it will be checked against.
        let (exists, watermark) = sqlx::query_as::<_, (bool, DateTime<Utc>)>(
            "SELECT EXISTS(SELECT 1 FROM posts WHERE id = $1), clock_timestamp()",
        )
        .bind(post_id)
        .fetch_one(&self.pool)
        .await?;

        if !exists {
            return Err(StoreError::PostNotFound(post_id));
        }

        let (events_tx, events_rx) = mpsc::channel(self.subscription_buffer);
        let (shutdown_tx, shutdown_rx) = watch::channel(());

        let poller = CommentPoller {
            pool: self.pool.clone(),
            post_id,
            watermark,
            interval: self.poll_interval,
            events: events_tx,
            shutdown: shutdown_rx,
        };
        ACTIVE_SUBSCRIPTIONS.with_label_values(&[BACKEND]).inc();
        tokio::spawn(poller.run());

        let unsubscribe = Unsubscribe::new(move || {
            let _ = shutdown_tx.send(());
        });
        Ok(CommentSubscription::new(post_id, events_rx, unsubscribe))
    }
}

/// Bind a `usize` page parameter as a Postgres BIGINT.
fn to_sql_count(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn new_post(&self, text: &str, comments_enabled: bool) -> StoreResult<Post> {
        let result = sqlx::query_as::<_, Post>(
            r#"
            INSERT INTO posts (id, text, comments_enabled)
            VALUES ($1, $2, $3)
            RETURNING id, text, comments_enabled, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(text)
        .bind(comments_enabled)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from);

        if let Ok(post) = &result {
            debug!(post_id = %post.id, "Created post");
        }
        metrics::observe(BACKEND, "new_post", result)
    }

    async fn get_post(&self, post_id: Uuid) -> StoreResult<Post> {
        let result = sqlx::query_as::<_, Post>(
            r#"
            SELECT id, text, comments_enabled, created_at
            FROM posts
            WHERE id = $1
            "#,
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)
        .and_then(|post| post.ok_or(StoreError::PostNotFound(post_id)));

        metrics::observe(BACKEND, "get_post", result)
    }

    async fn get_posts(&self, limit: usize, offset: usize) -> StoreResult<Vec<Post>> {
        let result = sqlx::query_as::<_, Post>(
            r#"
            SELECT id, text, comments_enabled, created_at
            FROM posts
            ORDER BY created_at DESC, id DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(to_sql_count(limit))
        .bind(to_sql_count(offset))
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from);

        metrics::observe(BACKEND, "get_posts", result)
    }

    async fn set_comments_enabled(&self, post_id: Uuid, enabled: bool) -> StoreResult<Post> {
        let result = sqlx::query_as::<_, Post>(
            r#"
            UPDATE posts
            SET comments_enabled = $1
            WHERE id = $2
            RETURNING id, text, comments_enabled, created_at
            "#,
        )
        .bind(enabled)
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)
        .and_then(|post| post.ok_or(StoreError::PostNotFound(post_id)));

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
        let result = self.insert_comment(post_id, parent_id, text).await;

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
        let result = self.load_comments_tree(post_id, limit, offset).await;
        metrics::observe(BACKEND, "get_comments_tree", result)
    }

    async fn subscribe_to_comments(&self, post_id: Uuid) -> StoreResult<CommentSubscription> {
        let result = self.start_subscription(post_id).await;
        metrics::observe(BACKEND, "subscribe_to_comments", result)
    }
}

async fn fetch_comments_after(
    pool: &PgPool,
    post_id: Uuid,
    watermark: DateTime<Utc>,
) -> Result<Vec<Comment>, sqlx::Error> {
    sqlx::query_as::<_, Comment>(
        r#"
        SELECT id, post_id, parent_id, text, created_at
        FROM comments
        WHERE post_id = $1 AND created_at > $2
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(post_id)
    .bind(watermark)
    .fetch_all(pool)
    .await
}

/// Background task behind one Postgres subscription.
///
/// Owns its watermark and the sending half of the subscriber queue; the
/// queue closes when the task returns. The shutdown signal is checked first
/// at every suspension point: between ticks, during a query and during a
/// blocked send.
struct CommentPoller {
    pool: PgPool,
    post_id: Uuid,
    watermark: DateTime<Utc>,
    interval: Duration,
    events: mpsc::Sender<Comment>,
    shutdown: watch::Receiver<()>,
}

impl CommentPoller {
    async fn run(mut self) {
        info!(
            post_id = %self.post_id,
            interval_ms = self.interval.as_millis() as u64,
            "Comment poller started"
        );

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            let fetched = tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                fetched = fetch_comments_after(&self.pool, self.post_id, self.watermark) => fetched,
            };

            let comments = match fetched {
                Ok(comments) => comments,
                Err(e) => {
                    // skip this tick, try again on the next one
                    POLL_ERRORS_TOTAL.inc();
                    warn!(post_id = %self.post_id, error = %e, "Comment poll failed");
                    continue;
                }
            };

            if comments.is_empty() {
                continue;
            }
            debug!(
                post_id = %self.post_id,
                count = comments.len(),
                "Delivering polled comments"
            );

            if !self.deliver(comments).await {
                break;
            }
        }

        ACTIVE_SUBSCRIPTIONS.with_label_values(&[BACKEND]).dec();
        info!(post_id = %self.post_id, "Comment poller stopped");
    }

    /// Push comments in order, advancing the watermark after each send.
    /// Returns false when the subscription should end.
    async fn deliver(&mut self, comments: Vec<Comment>) -> bool {
        for comment in comments {
            let created_at = comment.created_at;

            let sent = tokio::select! {
                biased;
                _ = self.shutdown.changed() => return false,
                sent = self.events.send(comment) => sent,
            };

            if sent.is_err() {
                debug!(post_id = %self.post_id, "Subscriber receiver dropped");
                return false;
            }
            self.watermark = created_at;
        }
        true
    }
}
