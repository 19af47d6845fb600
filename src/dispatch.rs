use std::thread;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::comments::ThreadRequest;
use crate::data::Services;
use crate::feed::PageRequest;
use crate::models::{Comment, Post};
use crate::mutation::ReactionSnapshot;

/// Results of background calls, handed back to the model owner.
pub enum Event {
    FeedPage {
        request_id: u64,
        result: Result<Vec<Post>>,
    },
    Thread {
        request: ThreadRequest,
        result: Result<Vec<Comment>>,
    },
    Reaction {
        snapshot: ReactionSnapshot,
        result: Result<()>,
    },
}

/// Runs blocking service calls on worker threads. Requests are never
/// cancelled; stale results are filtered by whoever applies them.
pub struct Dispatcher {
    services: Services,
    tx: Sender<Event>,
    rx: Receiver<Event>,
}

impl Dispatcher {
    pub fn new(services: Services) -> Self {
        let (tx, rx) = unbounded();
        Self { services, tx, rx }
    }

    pub fn request_page(&self, request: PageRequest) {
        let feed = self.services.feed.clone();
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = feed.load_feed(request.skip, request.limit);
            let _ = tx.send(Event::FeedPage {
                request_id: request.request_id,
                result,
            });
        });
    }

    pub fn request_thread(&self, request: ThreadRequest) {
        let comments = self.services.comments.clone();
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = comments.load_comments(&request.post_id);
            let _ = tx.send(Event::Thread { request, result });
        });
    }

    pub fn send_reaction(&self, snapshot: ReactionSnapshot) {
        let interactions = self.services.interactions.clone();
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = interactions.react(&snapshot.post_id, snapshot.kind);
            let _ = tx.send(Event::Reaction { snapshot, result });
        });
    }

    /// Everything that has arrived so far, without blocking.
    pub fn poll(&self) -> Vec<Event> {
        self.rx.try_iter().collect()
    }

    pub fn wait(&self, timeout: Duration) -> Option<Event> {
        self.rx.recv_timeout(timeout).ok()
    }
}
