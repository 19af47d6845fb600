use anyhow::Result;
use tracing::{debug, warn};

use crate::models::Post;

pub const DEFAULT_PAGE_SIZE: usize = 10;

/// An ordered, locally-mutable copy of a list of posts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostList {
    posts: Vec<Post>,
}

impl PostList {
    pub fn new(posts: Vec<Post>) -> Self {
        Self { posts }
    }

    pub fn as_slice(&self) -> &[Post] {
        &self.posts
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn get(&self, post_id: &str) -> Option<&Post> {
        self.posts.iter().find(|post| post.id == post_id)
    }

    pub fn get_mut(&mut self, post_id: &str) -> Option<&mut Post> {
        self.posts.iter_mut().find(|post| post.id == post_id)
    }

    pub fn prepend(&mut self, post: Post) {
        self.posts.insert(0, post);
    }

    /// Appends without deduplication; a post repeated across pages shows twice.
    pub fn extend(&mut self, page: Vec<Post>) {
        self.posts.extend(page);
    }

    pub fn replace_all(&mut self, posts: Vec<Post>) {
        self.posts = posts;
    }

    /// Replaces every entry sharing the updated post's id.
    pub fn replace(&mut self, updated: &Post) -> bool {
        let mut found = false;
        for post in self.posts.iter_mut().filter(|post| post.id == updated.id) {
            *post = updated.clone();
            found = true;
        }
        found
    }

    pub fn remove(&mut self, post_id: &str) -> bool {
        let before = self.posts.len();
        self.posts.retain(|post| post.id != post_id);
        self.posts.len() != before
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading,
    HasMore,
    Exhausted,
}

/// A page fetch the owner should execute and report back through
/// [`FeedLoader::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub request_id: u64,
    pub skip: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Copy)]
struct PendingPage {
    request: PageRequest,
    resume: LoadState,
}

/// Offset/limit pagination with load-more-on-visible semantics.
#[derive(Debug)]
pub struct FeedLoader {
    posts: PostList,
    state: LoadState,
    page_size: usize,
    next_skip: usize,
    pending: Option<PendingPage>,
    next_request_id: u64,
}

impl Default for FeedLoader {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl FeedLoader {
    pub fn new(page_size: usize) -> Self {
        Self {
            posts: PostList::default(),
            state: LoadState::Idle,
            page_size: page_size.max(1),
            next_skip: 0,
            pending: None,
            next_request_id: 1,
        }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn posts(&self) -> &PostList {
        &self.posts
    }

    pub fn posts_mut(&mut self) -> &mut PostList {
        &mut self.posts
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    /// First load. Only valid from `Idle`.
    pub fn start(&mut self) -> Option<PageRequest> {
        if self.state != LoadState::Idle || self.pending.is_some() {
            return None;
        }
        Some(self.issue(0))
    }

    /// The end-of-list sentinel became visible.
    pub fn on_sentinel_visible(&mut self) -> Option<PageRequest> {
        if self.state != LoadState::HasMore || self.pending.is_some() {
            return None;
        }
        Some(self.issue(self.next_skip))
    }

    /// Forgets every page and starts again from offset zero. Any response
    /// still in flight is dropped when it arrives.
    pub fn reload(&mut self) -> Option<PageRequest> {
        self.pending = None;
        self.state = LoadState::Idle;
        self.next_skip = 0;
        self.start()
    }

    fn issue(&mut self, skip: usize) -> PageRequest {
        let request = PageRequest {
            request_id: self.next_request_id,
            skip,
            limit: self.page_size,
        };
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.pending = Some(PendingPage {
            request,
            resume: self.state,
        });
        self.state = LoadState::Loading;
        debug!(skip, limit = self.page_size, request_id = request.request_id, "feed: page requested");
        request
    }

    /// Applies the outcome of a page fetch. Returns false when the response
    /// does not belong to the request in flight and was ignored.
    pub fn apply(&mut self, request_id: u64, result: Result<Vec<Post>>) -> Result<bool> {
        let Some(pending) = self.pending else {
            return Ok(false);
        };
        if pending.request.request_id != request_id {
            debug!(request_id, "feed: dropping stale page");
            return Ok(false);
        }
        self.pending = None;

        match result {
            Ok(page) => {
                let received = page.len();
                if pending.request.skip == 0 {
                    self.posts.replace_all(page);
                } else {
                    self.posts.extend(page);
                }
                self.next_skip = pending.request.skip + self.page_size;
                self.state = if received < self.page_size {
                    LoadState::Exhausted
                } else {
                    LoadState::HasMore
                };
                debug!(received, state = ?self.state, "feed: page applied");
                Ok(true)
            }
            Err(err) => {
                warn!(error = %err, skip = pending.request.skip, "feed: page failed");
                self.state = pending.resume;
                Err(err)
            }
        }
    }

    /// Runs one request to completion against a blocking fetcher.
    pub fn run<F>(&mut self, request: PageRequest, fetch: F) -> Result<bool>
    where
        F: FnOnce(usize, usize) -> Result<Vec<Post>>,
    {
        let result = fetch(request.skip, request.limit);
        self.apply(request.request_id, result)
    }
}
