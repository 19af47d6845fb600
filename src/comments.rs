use std::collections::HashMap;

use anyhow::Result;
use tracing::{debug, warn};

use crate::models::Comment;

/// A thread fetch the owner should execute and report back through
/// [`CommentThreads::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRequest {
    pub request_id: u64,
    pub post_id: String,
}

#[derive(Debug, Default)]
struct Thread {
    expanded: bool,
    loaded: bool,
    pending: Option<u64>,
    comments: Vec<Comment>,
}

/// Per-post comment threads, fetched lazily on expand.
#[derive(Debug, Default)]
pub struct CommentThreads {
    cache: bool,
    threads: HashMap<String, Thread>,
    next_request_id: u64,
}

impl CommentThreads {
    /// With `cache` set, a thread that already loaded once is not fetched again.
    pub fn new(cache: bool) -> Self {
        Self {
            cache,
            threads: HashMap::new(),
            next_request_id: 1,
        }
    }

    pub fn is_expanded(&self, post_id: &str) -> bool {
        self.threads.get(post_id).is_some_and(|t| t.expanded)
    }

    pub fn is_loading(&self, post_id: &str) -> bool {
        self.threads.get(post_id).is_some_and(|t| t.pending.is_some())
    }

    pub fn comments(&self, post_id: &str) -> &[Comment] {
        self.threads
            .get(post_id)
            .map(|t| t.comments.as_slice())
            .unwrap_or(&[])
    }

    /// Flips the expansion state. Expanding returns the fetch to issue;
    /// collapsing never fetches.
    pub fn toggle(&mut self, post_id: &str) -> Option<ThreadRequest> {
        if self.is_expanded(post_id) {
            self.collapse(post_id);
            None
        } else {
            self.expand(post_id)
        }
    }

    pub fn expand(&mut self, post_id: &str) -> Option<ThreadRequest> {
        let request_id = self.next_request_id;
        let cache = self.cache;
        let thread = self.threads.entry(post_id.to_string()).or_default();
        thread.expanded = true;
        if cache && thread.loaded {
            debug!(post_id, "comments: reusing loaded thread");
            return None;
        }
        thread.pending = Some(request_id);
        self.next_request_id = self.next_request_id.wrapping_add(1);
        Some(ThreadRequest {
            request_id,
            post_id: post_id.to_string(),
        })
    }

    pub fn collapse(&mut self, post_id: &str) {
        if let Some(thread) = self.threads.get_mut(post_id) {
            thread.expanded = false;
        }
    }

    /// Stores a fetched thread in server order. Responses for anything but
    /// the latest fetch of that post are ignored.
    pub fn apply(&mut self, request: &ThreadRequest, result: Result<Vec<Comment>>) -> Result<bool> {
        let Some(thread) = self.threads.get_mut(&request.post_id) else {
            return Ok(false);
        };
        if thread.pending != Some(request.request_id) {
            return Ok(false);
        }
        thread.pending = None;
        match result {
            Ok(comments) => {
                debug!(post_id = %request.post_id, count = comments.len(), "comments: thread loaded");
                thread.comments = comments;
                thread.loaded = true;
                Ok(true)
            }
            Err(err) => {
                warn!(post_id = %request.post_id, error = %err, "comments: load failed");
                Err(err)
            }
        }
    }

    /// Places a newly created comment at the head of its thread.
    pub fn prepend(&mut self, comment: Comment) {
        let thread = self.threads.entry(comment.post_id.clone()).or_default();
        thread.comments.insert(0, comment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures;
    use anyhow::anyhow;

    #[test]
    fn nothing_fetched_until_first_expand() {
        let threads = CommentThreads::new(false);
        assert!(!threads.is_expanded("p1"));
        assert!(threads.comments("p1").is_empty());
    }

    #[test]
    fn every_expand_refetches_without_cache() {
        let mut threads = CommentThreads::new(false);
        let first = threads.toggle("p1").unwrap();
        threads
            .apply(&first, Ok(vec![fixtures::comment("c1", "p1", "a")]))
            .unwrap();
        assert!(threads.toggle("p1").is_none());
        assert!(!threads.is_expanded("p1"));
        let second = threads.toggle("p1").unwrap();
        assert_ne!(first.request_id, second.request_id);
        assert_eq!(threads.comments("p1").len(), 1);
    }

    #[test]
    fn cached_thread_is_reused() {
        let mut threads = CommentThreads::new(true);
        let first = threads.expand("p1").unwrap();
        threads.apply(&first, Ok(Vec::new())).unwrap();
        threads.collapse("p1");
        assert!(threads.expand("p1").is_none());
        assert!(threads.is_expanded("p1"));
    }

    #[test]
    fn failed_load_is_not_cached() {
        let mut threads = CommentThreads::new(true);
        let first = threads.expand("p1").unwrap();
        assert!(threads.apply(&first, Err(anyhow!("offline"))).is_err());
        assert!(!threads.is_loading("p1"));
        threads.collapse("p1");
        assert!(threads.expand("p1").is_some());
    }

    #[test]
    fn server_order_kept_and_new_comment_at_head() {
        let mut threads = CommentThreads::new(false);
        let req = threads.expand("p1").unwrap();
        threads
            .apply(
                &req,
                Ok(vec![
                    fixtures::comment("c1", "p1", "first"),
                    fixtures::comment("c2", "p1", "second"),
                ]),
            )
            .unwrap();
        threads.prepend(fixtures::comment("c3", "p1", "mine"));
        let ids: Vec<&str> = threads.comments("p1").iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["c3", "c1", "c2"]);
    }

    #[test]
    fn superseded_fetch_is_ignored() {
        let mut threads = CommentThreads::new(false);
        let old = threads.expand("p1").unwrap();
        threads.collapse("p1");
        let new = threads.expand("p1").unwrap();
        assert!(!threads
            .apply(&old, Ok(vec![fixtures::comment("c1", "p1", "x")]))
            .unwrap());
        assert!(threads.apply(&new, Ok(Vec::new())).unwrap());
        assert!(threads.comments("p1").is_empty());
    }
}
