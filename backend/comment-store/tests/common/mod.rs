//! Shared helpers for the storage integration suites.
//!
//! Every `check_*` function exercises one behaviour of the storage contract
//! and is run against both backends.

#![allow(dead_code)]

use comment_store::models::MAX_REPLY_DEPTH;
use comment_store::{PostgresStorage, Storage, StoreError};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use uuid::Uuid;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "comment_store=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Connect to `TEST_DATABASE_URL`, migrate and empty both tables.
///
/// Returns `None` (and the caller skips) when no database is reachable.
pub async fn postgres_storage(poll_interval: Duration) -> Option<PostgresStorage> {
    init_tracing();

    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping Postgres test");
        return None;
    };

    let pool = match PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(3))
        .connect(&url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Postgres not reachable ({}), skipping test", e);
            return None;
        }
    };

    comment_store::run_migrations(&pool)
        .await
        .expect("migrations should apply");
    sqlx::query("TRUNCATE comments, posts")
        .execute(&pool)
        .await
        .expect("tables should truncate");

    Some(PostgresStorage::new(pool).with_poll_interval(poll_interval))
}

/// Number of comments (at any depth) stored under `post_id`.
pub async fn count_comments(storage: &dyn Storage, post_id: Uuid) -> usize {
    storage
        .get_comments_tree(post_id, usize::MAX, 0)
        .await
        .expect("tree should load")
        .iter()
        .map(|c| c.subtree_len())
        .sum()
}

pub async fn check_disabled_post_rejects_comments(storage: &dyn Storage) {
    let post = storage.new_post("quiet post", true).await.unwrap();
    storage.add_comment(post.id, None, "before").await.unwrap();

    let updated = storage.set_comments_enabled(post.id, false).await.unwrap();
    assert!(!updated.comments_enabled);

    let err = storage.add_comment(post.id, None, "after").await.unwrap_err();
    assert!(err.is_comments_disabled());
    assert!(matches!(err, StoreError::CommentsDisabled(id) if id == post.id));
    assert_eq!(count_comments(storage, post.id).await, 1);

    // a disabled post never accepts comments
    let closed = storage.new_post("closed from the start", false).await.unwrap();
    let err = storage.add_comment(closed.id, None, "nope").await.unwrap_err();
    assert!(err.is_comments_disabled());
    assert_eq!(count_comments(storage, closed.id).await, 0);

    storage.set_comments_enabled(post.id, true).await.unwrap();
    storage.add_comment(post.id, None, "again").await.unwrap();
    assert_eq!(count_comments(storage, post.id).await, 2);
}

pub async fn check_parent_id_round_trip(storage: &dyn Storage) {
    let post = storage.new_post("threads", true).await.unwrap();

    let root = storage.add_comment(post.id, None, "root").await.unwrap();
    assert_eq!(root.parent_id, None);
    assert_eq!(root.post_id, post.id);
    assert!(root.replies.is_empty());

    let reply = storage.add_comment(post.id, Some(root.id), "reply").await.unwrap();
    assert_eq!(reply.parent_id, Some(root.id));

    let nested = storage.add_comment(post.id, Some(reply.id), "nested").await.unwrap();
    assert_eq!(nested.parent_id, Some(reply.id));
}

pub async fn check_missing_targets(storage: &dyn Storage) {
    let missing = Uuid::new_v4();

    let err = storage.get_post(missing).await.unwrap_err();
    assert!(matches!(err, StoreError::PostNotFound(id) if id == missing));
    assert!(storage.set_comments_enabled(missing, false).await.unwrap_err().is_not_found());
    assert!(storage.add_comment(missing, None, "x").await.unwrap_err().is_not_found());
    assert!(storage.get_comments_tree(missing, 10, 0).await.unwrap_err().is_not_found());
    assert!(storage.subscribe_to_comments(missing).await.unwrap_err().is_not_found());

    let post = storage.new_post("parents", true).await.unwrap();
    let err = storage.add_comment(post.id, Some(missing), "orphan").await.unwrap_err();
    assert!(matches!(err, StoreError::ParentNotFound(id) if id == missing));

    // parent from another post is not a valid parent here
    let other = storage.new_post("elsewhere", true).await.unwrap();
    let foreign = storage.add_comment(other.id, None, "foreign").await.unwrap();
    let err = storage.add_comment(post.id, Some(foreign.id), "cross").await.unwrap_err();
    assert!(matches!(err, StoreError::ParentNotFound(id) if id == foreign.id));
    assert_eq!(count_comments(storage, post.id).await, 0);
}

/// Expects an otherwise empty store.
pub async fn check_posts_newest_first_pagination(storage: &dyn Storage) {
    let mut created = Vec::new();
    for i in 0..5 {
        created.push(storage.new_post(&format!("post {}", i), true).await.unwrap());
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let first = storage.get_posts(3, 0).await.unwrap();
    let rest = storage.get_posts(3, 3).await.unwrap();

    let ids = |posts: &[comment_store::Post]| posts.iter().map(|p| p.id).collect::<Vec<_>>();
    assert_eq!(ids(&first), vec![created[4].id, created[3].id, created[2].id]);
    assert_eq!(ids(&rest), vec![created[1].id, created[0].id]);

    let all = storage.get_posts(10, 0).await.unwrap();
    assert_eq!(all.len(), 5);
    assert!(all.windows(2).all(|w| w[0].created_at >= w[1].created_at));

    assert!(storage.get_posts(3, 5).await.unwrap().is_empty());
    assert!(storage.get_posts(3, 50).await.unwrap().is_empty());
    assert!(storage.get_posts(0, 0).await.unwrap().is_empty());
}

pub async fn check_comments_tree_round_trip(storage: &dyn Storage) {
    let post = storage.new_post("tree", true).await.unwrap();
    let a = storage.add_comment(post.id, None, "A").await.unwrap();
    let b = storage.add_comment(post.id, None, "B").await.unwrap();
    let r1 = storage.add_comment(post.id, Some(a.id), "R1").await.unwrap();
    let r2 = storage.add_comment(post.id, Some(a.id), "R2").await.unwrap();

    let tree = storage.get_comments_tree(post.id, 10, 0).await.unwrap();

    assert_eq!(tree.len(), 2);
    assert_eq!(tree[0].id, a.id);
    assert_eq!(tree[1].id, b.id);
    let replies: Vec<_> = tree[0].replies.iter().map(|c| c.id).collect();
    assert_eq!(replies, vec![r1.id, r2.id]);
    assert!(tree[0].replies.iter().all(|c| c.replies.is_empty()));
    assert!(tree[1].replies.is_empty());

    // mutating a returned tree leaves the store untouched
    let mut copy = tree.clone();
    copy[0].replies.clear();
    let again = storage.get_comments_tree(post.id, 10, 0).await.unwrap();
    assert_eq!(again, tree);
}

pub async fn check_comments_tree_pagination(storage: &dyn Storage) {
    let post = storage.new_post("paged tree", true).await.unwrap();
    let mut roots = Vec::new();
    for i in 0..4 {
        let root = storage.add_comment(post.id, None, &format!("root {}", i)).await.unwrap();
        storage.add_comment(post.id, Some(root.id), "reply").await.unwrap();
        roots.push(root);
    }

    let page = storage.get_comments_tree(post.id, 2, 1).await.unwrap();
    let ids: Vec<_> = page.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![roots[1].id, roots[2].id]);
    assert!(page.iter().all(|c| c.replies.len() == 1));

    let tail = storage.get_comments_tree(post.id, 10, 3).await.unwrap();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].id, roots[3].id);

    assert!(storage.get_comments_tree(post.id, 10, 4).await.unwrap().is_empty());
    assert!(storage.get_comments_tree(post.id, 10, 99).await.unwrap().is_empty());

    let empty = storage.new_post("no comments", true).await.unwrap();
    assert!(storage.get_comments_tree(empty.id, 10, 0).await.unwrap().is_empty());
}

pub async fn check_concurrent_adds(storage: Arc<dyn Storage>, writers: usize) {
    let post = storage.new_post("busy", true).await.unwrap();

    let mut handles = Vec::with_capacity(writers);
    for i in 0..writers {
        let storage = storage.clone();
        handles.push(tokio::spawn(async move {
            storage
                .add_comment(post.id, None, &format!("comment {}", i))
                .await
        }));
    }

    let mut ids = std::collections::HashSet::new();
    for handle in handles {
        let comment = handle.await.unwrap().unwrap();
        assert!(ids.insert(comment.id));
    }

    assert_eq!(ids.len(), writers);
    assert_eq!(count_comments(storage.as_ref(), post.id).await, writers);
}

pub async fn check_subscription_delivers(storage: &dyn Storage, within: Duration) {
    let post = storage.new_post("live", true).await.unwrap();
    let other = storage.new_post("unrelated", true).await.unwrap();
    let mut feed = storage.subscribe_to_comments(post.id).await.unwrap();
    assert_eq!(feed.post_id(), post.id);

    storage.add_comment(other.id, None, "elsewhere").await.unwrap();
    let added = storage.add_comment(post.id, None, "hello").await.unwrap();

    let received = timeout(within, feed.recv())
        .await
        .expect("comment should arrive in time")
        .expect("subscription should be open");
    assert_eq!(received.id, added.id);
    assert_eq!(received.post_id, post.id);
    assert_eq!(received.text, "hello");

    feed.unsubscribe();
}

pub async fn check_unsubscribe_is_idempotent(storage: &dyn Storage, within: Duration) {
    let post = storage.new_post("leaving", true).await.unwrap();
    let mut feed = storage.subscribe_to_comments(post.id).await.unwrap();

    let first = storage.add_comment(post.id, None, "first").await.unwrap();
    let received = timeout(within, feed.recv()).await.unwrap().unwrap();
    assert_eq!(received.id, first.id);

    feed.unsubscribe();
    feed.unsubscribe();
    assert!(feed.is_unsubscribed());

    storage.add_comment(post.id, None, "second").await.unwrap();

    // closed queue: nothing more, in particular no redelivery of `first`
    let next = timeout(within, feed.recv())
        .await
        .expect("queue should close after unsubscribe");
    assert_eq!(next, None);
}

pub async fn check_reply_depth_is_capped(storage: &dyn Storage) {
    let post = storage.new_post("long thread", true).await.unwrap();
    let root = storage.add_comment(post.id, None, "root").await.unwrap();

    let mut deepest = root.clone();
    for i in 0..MAX_REPLY_DEPTH {
        deepest = storage
            .add_comment(post.id, Some(deepest.id), &format!("level {}", i + 1))
            .await
            .unwrap();
    }

    // keep pushing past the limit: every attempt is refused, nothing is stored
    for _ in 0..3 * MAX_REPLY_DEPTH {
        let err = storage
            .add_comment(post.id, Some(deepest.id), "too deep")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ReplyTooDeep(id) if id == deepest.id));
    }

    // siblings at a shallower level are still accepted
    storage.add_comment(post.id, Some(root.id), "side branch").await.unwrap();

    let tree = storage.get_comments_tree(post.id, 10, 0).await.unwrap();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].subtree_len(), MAX_REPLY_DEPTH + 2);

    let json = serde_json::to_string(&tree).unwrap();
    let parsed: Vec<comment_store::Comment> = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, tree);
}
