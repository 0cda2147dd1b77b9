//! # Feed Buffer
//! Ordered, duplicate-free sequence of posts keyed by [`PostId`].
//!
//! Head = newest, tail = oldest. Elements are only ever added at either end,
//! so the relative order of anything already inside never changes. Membership
//! is tracked in a `HashSet`, which keeps the duplicate check O(1) per element.

use std::collections::{HashSet, VecDeque};

use crate::post::{Post, PostId};

#[derive(Debug, Default, Clone)]
pub struct FeedBuffer {
    items: VecDeque<Post>,
    seen: HashSet<PostId>,
}

impl FeedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: PostId) -> bool {
        self.seen.contains(&id)
    }

    /// Oldest post, i.e. the one a last-seen-id cursor continues from.
    pub fn last(&self) -> Option<&Post> {
        self.items.back()
    }

    /// Append posts not seen yet to the tail, keeping the input order.
    /// Returns how many were actually inserted.
    pub fn append_batch<I>(&mut self, posts: I) -> usize
    where
        I: IntoIterator<Item = Post>,
    {
        let before = self.items.len();
        for p in posts {
            if self.seen.insert(p.id) {
                self.items.push_back(p);
            }
        }
        self.items.len() - before
    }

    /// Insert posts not seen yet at the head as one block, keeping the input
    /// order (newest-first input leaves a newest-first head).
    pub fn prepend_batch<I>(&mut self, posts: I) -> usize
    where
        I: IntoIterator<Item = Post>,
    {
        let fresh: Vec<Post> = posts
            .into_iter()
            .filter(|p| self.seen.insert(p.id))
            .collect();
        let n = fresh.len();
        for p in fresh.into_iter().rev() {
            self.items.push_front(p);
        }
        n
    }

    /// Insert a single post at the head. `false` if its id is already present.
    pub fn prepend_one(&mut self, post: Post) -> bool {
        if !self.seen.insert(post.id) {
            return false;
        }
        self.items.push_front(post);
        true
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.seen.clear();
    }

    /// Owned copy of the current order, newest first.
    pub fn snapshot(&self) -> Vec<Post> {
        self.items.iter().cloned().collect()
    }

    pub fn ids(&self) -> Vec<PostId> {
        self.items.iter().map(|p| p.id).collect()
    }
}
