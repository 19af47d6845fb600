use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::debug;

use crate::comments::CommentThreads;
use crate::dispatch::{Dispatcher, Event};
use crate::feed::{FeedLoader, LoadState};
use crate::models::{Comment, Post, ReactionKind};
use crate::mutation::{apply_reaction, Engine};
use crate::notice::Notice;

/// The single-threaded owner of the home feed: pages, comment threads and
/// reactions are issued in the background and applied here on poll.
pub struct Timeline {
    loader: FeedLoader,
    threads: CommentThreads,
    engine: Arc<Engine>,
    dispatcher: Dispatcher,
}

impl Timeline {
    pub fn new(engine: Arc<Engine>, page_size: usize, cache_threads: bool) -> Self {
        let dispatcher = Dispatcher::new(engine.services().clone());
        Self {
            loader: FeedLoader::new(page_size),
            threads: CommentThreads::new(cache_threads),
            engine,
            dispatcher,
        }
    }

    pub fn posts(&self) -> &[Post] {
        self.loader.posts().as_slice()
    }

    pub fn state(&self) -> LoadState {
        self.loader.state()
    }

    pub fn loader_mut(&mut self) -> &mut FeedLoader {
        &mut self.loader
    }

    pub fn threads(&self) -> &CommentThreads {
        &self.threads
    }

    pub fn start(&mut self) -> bool {
        match self.loader.start() {
            Some(request) => {
                self.dispatcher.request_page(request);
                true
            }
            None => false,
        }
    }

    pub fn reload(&mut self) -> bool {
        match self.loader.reload() {
            Some(request) => {
                self.dispatcher.request_page(request);
                true
            }
            None => false,
        }
    }

    pub fn on_sentinel_visible(&mut self) -> bool {
        match self.loader.on_sentinel_visible() {
            Some(request) => {
                self.dispatcher.request_page(request);
                true
            }
            None => false,
        }
    }

    pub fn toggle_thread(&mut self, post_id: &str) {
        if let Some(request) = self.threads.toggle(post_id) {
            self.dispatcher.request_thread(request);
        }
    }

    /// Applies the reaction locally and sends it in the background.
    pub fn react(&mut self, post_id: &str, kind: ReactionKind) -> bool {
        let Some(post) = self.loader.posts_mut().get_mut(post_id) else {
            return false;
        };
        let snapshot = apply_reaction(post, kind);
        debug!(post_id, kind = %kind, "timeline: reaction sent");
        self.dispatcher.send_reaction(snapshot);
        true
    }

    pub fn add_comment(&mut self, post_id: &str, text: &str) -> Result<Option<Comment>> {
        let Some(post) = self.loader.posts_mut().get_mut(post_id) else {
            return Ok(None);
        };
        self.engine
            .add_comment(post, &mut self.threads, text)
            .map(Some)
    }

    /// Applies every event that has arrived. Returns true when anything changed.
    pub fn poll(&mut self) -> bool {
        let events = self.dispatcher.poll();
        let changed = !events.is_empty();
        for event in events {
            self.handle(event);
        }
        changed
    }

    /// Blocks until nothing is in flight for the feed or `timeout` passes.
    pub fn settle(&mut self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while self.loader.is_loading() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.dispatcher.wait(remaining) {
                Some(event) => self.handle(event),
                None => break,
            }
        }
        self.poll();
    }

    /// Waits for one event and applies it.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        match self.dispatcher.wait(timeout) {
            Some(event) => {
                self.handle(event);
                true
            }
            None => false,
        }
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::FeedPage { request_id, result } => {
                if self.loader.apply(request_id, result).is_err() {
                    self.engine.notify(Notice::error("failed to load feed"));
                }
            }
            Event::Thread { request, result } => {
                if self.threads.apply(&request, result).is_err() {
                    self.engine.notify(Notice::error("failed to load comments"));
                }
            }
            Event::Reaction { snapshot, result } => {
                let post = self.loader.posts_mut().get_mut(&snapshot.post_id);
                let _ = self.engine.finish_reaction(post, &snapshot, result);
            }
        }
    }
}
