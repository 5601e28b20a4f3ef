//! Reply-tree assembly.
//!
//! Turns a page of top-level comments plus a parent -> children lookup into
//! nested, detached `Comment` values. The walk uses an explicit work list and
//! never descends below `MAX_REPLY_DEPTH`, so the returned values stay shallow
//! enough to drop, clone and serialize even if stored data is deeper.

use uuid::Uuid;

use crate::models::{Comment, MAX_REPLY_DEPTH};

/// Build the reply trees rooted at `roots`.
///
/// `children_of` must return a comment's direct replies in creation order.
/// Every returned node is a fresh copy; nothing borrowed from the lookup is
/// aliased by the result. Replies deeper than [`MAX_REPLY_DEPTH`] are left
/// out.
pub(crate) fn assemble<'a, I, F>(roots: I, children_of: F) -> Vec<Comment>
where
    I: IntoIterator<Item = &'a Comment>,
    F: Fn(Uuid) -> &'a [Comment],
{
    // Breadth-first flattening: a node always sits after its parent and
    // siblings occupy consecutive slots in creation order.
    let mut nodes: Vec<Option<Comment>> = roots.into_iter().map(|c| Some(c.detached())).collect();
    let root_count = nodes.len();
    let mut parents: Vec<Option<usize>> = vec![None; root_count];
    let mut depths: Vec<usize> = vec![0; root_count];

    let mut cursor = 0;
    while cursor < nodes.len() {
        let depth = depths[cursor];
        if depth < MAX_REPLY_DEPTH {
            if let Some(id) = nodes[cursor].as_ref().map(|c| c.id) {
                for child in children_of(id) {
                    nodes.push(Some(child.detached()));
                    parents.push(Some(cursor));
                    depths.push(depth + 1);
                }
            }
        }
        cursor += 1;
    }

    // Walking backwards completes every subtree before it is attached to its
    // parent. Replies are pushed in reverse and flipped once the node is done.
    for idx in (root_count..nodes.len()).rev() {
        let (Some(parent), Some(mut node)) = (parents[idx], nodes[idx].take()) else {
            continue;
        };
        node.replies.reverse();
        if let Some(parent_node) = nodes[parent].as_mut() {
            parent_node.replies.push(node);
        }
    }

    nodes
        .into_iter()
        .take(root_count)
        .flatten()
        .map(|mut root| {
            root.replies.reverse();
            root
        })
        .collect()
}
