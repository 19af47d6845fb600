use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::comments::CommentThreads;
use crate::config::ReactionFailure;
use crate::data::Services;
use crate::error::ValidationError;
use crate::feed::PostList;
use crate::models::{Comment, Post, PostDraft, ProfileUpdate, ReactionKind, Reactions, UserProfile};
use crate::notice::{self, Notice, NoticeSink};
use crate::profile::ProfileView;
use crate::session;

/// Asks the user to confirm a destructive action.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> bool;
}

impl<F> Confirm for F
where
    F: Fn(&str) -> bool,
{
    fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}

/// Local reaction state captured before an optimistic change.
#[derive(Debug, Clone, PartialEq)]
pub struct ReactionSnapshot {
    pub post_id: String,
    pub kind: ReactionKind,
    reactions: Reactions,
    user_reaction: Option<ReactionKind>,
}

impl ReactionSnapshot {
    pub fn restore(&self, post: &mut Post) {
        if post.id == self.post_id {
            post.reactions = self.reactions.clone();
            post.user_reaction = self.user_reaction;
        }
    }
}

/// Applies a reaction toggle to the local copy of a post. Reacting with the
/// kind already held clears it; any other kind replaces the previous one.
pub fn apply_reaction(post: &mut Post, kind: ReactionKind) -> ReactionSnapshot {
    let snapshot = ReactionSnapshot {
        post_id: post.id.clone(),
        kind,
        reactions: post.reactions.clone(),
        user_reaction: post.user_reaction,
    };
    match post.user_reaction {
        Some(current) if current == kind => {
            post.reactions.decrement(kind);
            post.user_reaction = None;
        }
        previous => {
            if let Some(previous) = previous {
                post.reactions.decrement(previous);
            }
            post.reactions.increment(kind);
            post.user_reaction = Some(kind);
        }
    }
    snapshot
}

/// Optimistic interaction layer: local state changes first, then exactly one
/// request per call, with the outcome reported through the notice sink.
pub struct Engine {
    services: Services,
    notices: Arc<dyn NoticeSink>,
    on_reaction_failure: ReactionFailure,
    session: Option<Arc<session::Manager>>,
}

impl Engine {
    pub fn new(services: Services, notices: Arc<dyn NoticeSink>) -> Self {
        Self {
            services,
            notices,
            on_reaction_failure: ReactionFailure::default(),
            session: None,
        }
    }

    pub fn with_reaction_failure(mut self, policy: ReactionFailure) -> Self {
        self.on_reaction_failure = policy;
        self
    }

    pub fn with_session(mut self, session: Arc<session::Manager>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn notify(&self, notice: Notice) {
        self.notices.notify(notice);
    }

    pub fn toggle_reaction(&self, post: &mut Post, kind: ReactionKind) -> Result<()> {
        let snapshot = apply_reaction(post, kind);
        debug!(post_id = %post.id, kind = %kind, held = ?post.user_reaction, "mutation: reaction applied");
        let result = self.services.interactions.react(&post.id, kind);
        self.finish_reaction(Some(post), &snapshot, result)
    }

    /// Settles a reaction whose request ran elsewhere. The post may have
    /// left the local lists in the meantime.
    pub fn finish_reaction(
        &self,
        post: Option<&mut Post>,
        snapshot: &ReactionSnapshot,
        result: Result<()>,
    ) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(post_id = %snapshot.post_id, error = %err, "mutation: react failed");
                if let (ReactionFailure::Rollback, Some(post)) = (self.on_reaction_failure, post) {
                    snapshot.restore(post);
                }
                self.notices.notify(Notice::error("failed to react"));
                Err(err)
            }
        }
    }

    pub fn toggle_save(&self, post: &mut Post) -> Result<bool> {
        match self.services.interactions.toggle_save(&post.id) {
            Ok(is_saved) => {
                post.is_saved = is_saved;
                self.notices
                    .notify(Notice::success(if is_saved { "saved" } else { "unsaved" }));
                Ok(is_saved)
            }
            Err(err) => {
                self.notices.notify(Notice::error("failed to save"));
                Err(err)
            }
        }
    }

    /// Follows or unfollows the profile's user depending on the current state.
    pub fn toggle_follow(&self, view: &mut ProfileView) -> Result<bool> {
        let was_following = view.is_following;
        let result = if was_following {
            self.services.social.unfollow(&view.user.id)
        } else {
            self.services.social.follow(&view.user.id)
        };
        let state = match result {
            Ok(state) => state,
            Err(err) => {
                self.notices.notify(Notice::error("failed to follow/unfollow"));
                return Err(err);
            }
        };

        let now_following = state.is_following.unwrap_or(!was_following);
        if now_following != was_following {
            if now_following {
                view.user.followers_count += 1;
            } else {
                view.user.followers_count = view.user.followers_count.saturating_sub(1);
            }
        }
        view.is_following = now_following;

        let message = if !now_following {
            "unfollowed"
        } else if state.status.as_deref() == Some("pending") {
            "follow request sent"
        } else {
            "following"
        };
        info!(user = %view.user.username, following = now_following, "mutation: follow toggled");
        self.notices.notify(Notice::success(message));
        Ok(now_following)
    }

    pub fn add_comment(
        &self,
        post: &mut Post,
        threads: &mut CommentThreads,
        text: &str,
    ) -> Result<Comment> {
        let text = text.trim();
        if text.is_empty() {
            return Err(self.reject(ValidationError::EmptyComment));
        }
        if !post.comments_enabled {
            return Err(self.reject(ValidationError::CommentsDisabled));
        }
        match self.services.comments.add_comment(&post.id, text) {
            Ok(comment) => {
                threads.prepend(comment.clone());
                post.comments_count += 1;
                self.notices.notify(Notice::success("comment added"));
                Ok(comment)
            }
            Err(err) => {
                self.notices.notify(Notice::error("failed to add comment"));
                Err(err)
            }
        }
    }

    /// Deletes a post after confirmation and drops it from every given list.
    /// Returns false when the user declined.
    pub fn delete_post(
        &self,
        post_id: &str,
        confirm: &dyn Confirm,
        lists: &mut [&mut PostList],
    ) -> Result<bool> {
        if !confirm.confirm("delete this post?") {
            debug!(post_id, "mutation: delete declined");
            return Ok(false);
        }
        if let Err(err) = self.services.interactions.delete_post(post_id) {
            self.notices.notify(Notice::error("failed to delete"));
            return Err(err);
        }
        for list in lists.iter_mut() {
            list.remove(post_id);
        }
        self.notices.notify(Notice::success("post deleted"));
        Ok(true)
    }

    pub fn create_post(&self, draft: &PostDraft, feed: &mut PostList) -> Result<Post> {
        if draft.text.trim().is_empty() && draft.image_url.is_none() {
            return Err(self.reject(ValidationError::EmptyPost));
        }
        match self.services.interactions.create_post(draft) {
            Ok(post) => {
                feed.prepend(post.clone());
                self.notices.notify(Notice::success("your thought is shared"));
                Ok(post)
            }
            Err(err) => {
                self.notices.notify(Notice::error("failed to create post"));
                Err(err)
            }
        }
    }

    pub fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile> {
        let user = match self.services.social.update_profile(update) {
            Ok(user) => user,
            Err(err) => {
                self.notices.notify(Notice::error("failed to update profile"));
                return Err(err);
            }
        };
        if let Some(session) = &self.session {
            if session.user().is_some_and(|current| current.id == user.id) {
                session.refresh_user(user.clone())?;
            }
        }
        self.notices.notify(Notice::success("profile updated"));
        Ok(user)
    }

    fn reject(&self, err: ValidationError) -> anyhow::Error {
        notice::reject(self.notices.as_ref(), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MockBackend;
    use crate::models::fixtures;
    use crate::notice::{ChannelSink, Level};
    use crate::storage;

    fn engine(backend: &Arc<MockBackend>) -> (Engine, Arc<ChannelSink>) {
        let sink = Arc::new(ChannelSink::new());
        let engine = Engine::new(Services::from_backend(backend.clone()), sink.clone());
        (engine, sink)
    }

    fn backend() -> Arc<MockBackend> {
        Arc::new(MockBackend::new(fixtures::profile("me")))
    }

    #[test]
    fn moon_reaction_round_trip_on_third_post() {
        let backend = backend();
        let (engine, _) = engine(&backend);
        let mut feed: Vec<Post> = (0..10).map(|i| fixtures::post(&format!("p{i}"))).collect();
        let post = &mut feed[2];

        engine.toggle_reaction(post, ReactionKind::Moon).unwrap();
        assert_eq!(post.reactions.count(ReactionKind::Moon), 1);
        assert_eq!(post.user_reaction, Some(ReactionKind::Moon));

        engine.toggle_reaction(post, ReactionKind::Moon).unwrap();
        assert_eq!(post.reactions.count(ReactionKind::Moon), 0);
        assert_eq!(post.user_reaction, None);
        assert_eq!(backend.call_count("react"), 2);
    }

    #[test]
    fn double_toggle_restores_every_starting_state() {
        for start in [None, Some(ReactionKind::Hug)] {
            for kind in ReactionKind::ALL {
                let mut post = fixtures::post("p1");
                post.reactions.set(ReactionKind::Hug, 4);
                post.user_reaction = start;
                let before = post.clone();
                apply_reaction(&mut post, kind);
                apply_reaction(&mut post, kind);
                if start == Some(kind) || start.is_none() {
                    assert_eq!(post, before, "kind {kind}");
                }
            }
        }
    }

    #[test]
    fn switching_kind_moves_the_single_reaction() {
        let mut post = fixtures::post("p1");
        post.reactions.set(ReactionKind::Hug, 2);
        post.user_reaction = Some(ReactionKind::Hug);
        apply_reaction(&mut post, ReactionKind::BlackHeart);
        assert_eq!(post.reactions.count(ReactionKind::Hug), 1);
        assert_eq!(post.reactions.count(ReactionKind::BlackHeart), 1);
        assert_eq!(post.user_reaction, Some(ReactionKind::BlackHeart));
    }

    #[test]
    fn failed_react_keeps_local_state_by_default() {
        let backend = backend();
        backend.fail("react");
        let (engine, sink) = engine(&backend);
        let mut post = fixtures::post("p1");
        assert!(engine.toggle_reaction(&mut post, ReactionKind::Hug).is_err());
        assert_eq!(post.reactions.count(ReactionKind::Hug), 1);
        let notices = sink.drain();
        assert_eq!(notices, vec![Notice::error("failed to react")]);
    }

    #[test]
    fn failed_react_rolls_back_when_configured() {
        let backend = backend();
        backend.fail("react");
        let (engine, _) = engine(&backend);
        let engine = engine.with_reaction_failure(ReactionFailure::Rollback);
        let mut post = fixtures::post("p1");
        let before = post.clone();
        assert!(engine.toggle_reaction(&mut post, ReactionKind::Moon).is_err());
        assert_eq!(post, before);
    }

    #[test]
    fn save_takes_server_state() {
        let backend = backend();
        let (engine, sink) = engine(&backend);
        let mut post = fixtures::post("p1");
        assert!(engine.toggle_save(&mut post).unwrap());
        assert!(post.is_saved);
        assert!(!engine.toggle_save(&mut post).unwrap());
        assert!(!post.is_saved);
        let messages: Vec<String> = sink.drain().into_iter().map(|n| n.message).collect();
        assert_eq!(messages, ["saved", "unsaved"]);
    }

    #[test]
    fn follow_adjusts_count_and_uses_unfollow_when_following() {
        let backend = Arc::new(
            MockBackend::new(fixtures::profile("me")).with_users(vec![fixtures::profile("u2")]),
        );
        let (engine, _) = engine(&backend);
        let mut view = ProfileView::load(engine.services(), "u2", Some("me")).unwrap();
        assert!(engine.toggle_follow(&mut view).unwrap());
        assert_eq!(view.user.followers_count, 4);
        assert!(!engine.toggle_follow(&mut view).unwrap());
        assert_eq!(view.user.followers_count, 3);
        assert_eq!(backend.call_count("follow"), 1);
        assert_eq!(backend.call_count("unfollow"), 1);
    }

    #[test]
    fn blank_comment_is_rejected_before_any_request() {
        let backend = backend();
        let (engine, sink) = engine(&backend);
        let mut post = fixtures::post("p1");
        let mut threads = CommentThreads::new(false);
        for text in ["", "   ", "\n\t"] {
            let err = engine.add_comment(&mut post, &mut threads, text).unwrap_err();
            assert!(ValidationError::is_validation(&err));
        }
        assert_eq!(post.comments_count, 0);
        assert_eq!(backend.call_count("add_comment"), 0);
        assert!(sink.drain().iter().all(|n| n.level == Level::Warning));
    }

    #[test]
    fn comment_on_closed_post_is_rejected() {
        let backend = backend();
        let (engine, _) = engine(&backend);
        let mut post = fixtures::post("p1");
        post.comments_enabled = false;
        let mut threads = CommentThreads::new(false);
        let err = engine.add_comment(&mut post, &mut threads, "hi").unwrap_err();
        assert_eq!(
            err.downcast_ref::<ValidationError>(),
            Some(&ValidationError::CommentsDisabled)
        );
        assert_eq!(backend.call_count("add_comment"), 0);
    }

    #[test]
    fn comment_goes_to_head_and_bumps_count_once() {
        let backend = backend();
        let (engine, _) = engine(&backend);
        let mut post = fixtures::post("p1");
        let mut threads = CommentThreads::new(false);
        let request = threads.expand("p1").unwrap();
        threads
            .apply(&request, Ok(vec![fixtures::comment("c1", "p1", "older")]))
            .unwrap();
        let comment = engine.add_comment(&mut post, &mut threads, " hello ").unwrap();
        assert_eq!(comment.text, "hello");
        assert_eq!(post.comments_count, 1);
        assert_eq!(threads.comments("p1")[0].id, comment.id);
    }

    #[test]
    fn delete_requires_confirmation_and_prunes_lists() {
        let backend = Arc::new(
            MockBackend::new(fixtures::profile("me"))
                .with_posts(vec![fixtures::post("p1"), fixtures::post("p2")]),
        );
        let (engine, _) = engine(&backend);
        let mut feed = PostList::new(vec![fixtures::post("p1"), fixtures::post("p2")]);
        let mut saved = PostList::new(vec![fixtures::post("p1")]);

        let declined = engine
            .delete_post("p1", &|_: &str| false, &mut [&mut feed, &mut saved])
            .unwrap();
        assert!(!declined);
        assert_eq!(backend.call_count("delete_post"), 0);

        assert!(engine
            .delete_post("p1", &|_: &str| true, &mut [&mut feed, &mut saved])
            .unwrap());
        assert!(feed.get("p1").is_none());
        assert!(saved.is_empty());
    }

    #[test]
    fn create_post_rejects_empty_draft_and_prepends() {
        let backend = backend();
        let (engine, _) = engine(&backend);
        let mut feed = PostList::new(vec![fixtures::post("p1")]);
        let empty = PostDraft {
            text: "  ".into(),
            ..Default::default()
        };
        assert!(engine.create_post(&empty, &mut feed).is_err());
        assert_eq!(backend.call_count("create_post"), 0);

        let draft = PostDraft {
            text: "can't sleep".into(),
            mood: Some("numb".into()),
            comments_enabled: true,
            ..Default::default()
        };
        let post = engine.create_post(&draft, &mut feed).unwrap();
        assert_eq!(feed.as_slice()[0].id, post.id);
    }

    #[test]
    fn profile_update_refreshes_signed_in_user() {
        let backend = backend();
        let store = Arc::new(storage::Store::open_in_memory().unwrap());
        let session = Arc::new(session::Manager::new(store.clone()).unwrap());
        session.sign_in("tok".into(), fixtures::profile("me")).unwrap();
        let (engine, _) = engine(&backend);
        let engine = engine.with_session(session.clone());

        let update = ProfileUpdate {
            bio: Some("still here".into()),
            ..Default::default()
        };
        engine.update_profile(&update).unwrap();
        assert_eq!(session.user().unwrap().bio.as_deref(), Some("still here"));
        let stored = store.load_session().unwrap().unwrap();
        assert_eq!(stored.user.unwrap().bio.as_deref(), Some("still here"));
    }
}
