use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rand::seq::SliceRandom;

use crate::api::{self, FollowState};
use crate::models::{
    Comment, Conversation, Message, MessageDraft, Notification, NotificationKind, Post, PostDraft,
    ProfileUpdate, ReactionKind, Reactions, Reel, Story, StoryContent, StoryDraft, UserProfile,
    UserSummary,
};

pub trait FeedService: Send + Sync {
    fn load_feed(&self, skip: usize, limit: usize) -> Result<Vec<Post>>;
    fn load_explore(&self) -> Result<Vec<Post>>;
    fn load_saved(&self) -> Result<Vec<Post>>;
    fn load_reels(&self) -> Result<Vec<Reel>>;
    fn load_post(&self, post_id: &str) -> Result<Post>;
}

pub trait CommentService: Send + Sync {
    fn load_comments(&self, post_id: &str) -> Result<Vec<Comment>>;
    fn add_comment(&self, post_id: &str, text: &str) -> Result<Comment>;
}

pub trait InteractionService: Send + Sync {
    fn react(&self, post_id: &str, kind: ReactionKind) -> Result<()>;
    fn toggle_save(&self, post_id: &str) -> Result<bool>;
    fn create_post(&self, draft: &PostDraft) -> Result<Post>;
    fn delete_post(&self, post_id: &str) -> Result<()>;
}

pub trait SocialService: Send + Sync {
    fn load_user(&self, user_id: &str) -> Result<UserProfile>;
    fn load_user_posts(&self, user_id: &str) -> Result<Vec<Post>>;
    fn is_following(&self, user_id: &str) -> Result<bool>;
    fn follow(&self, user_id: &str) -> Result<FollowState>;
    fn unfollow(&self, user_id: &str) -> Result<FollowState>;
    fn search_users(&self, query: &str) -> Result<Vec<UserProfile>>;
    fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile>;
}

pub trait StoryService: Send + Sync {
    fn load_stories(&self) -> Result<Vec<Story>>;
    fn create_story(&self, draft: &StoryDraft) -> Result<Story>;
}

pub trait MessageService: Send + Sync {
    fn load_conversations(&self) -> Result<Vec<Conversation>>;
    fn load_messages(&self, user_id: &str) -> Result<Vec<Message>>;
    fn send_message(&self, draft: &MessageDraft) -> Result<Message>;
}

pub trait NotificationService: Send + Sync {
    fn load_notifications(&self) -> Result<Vec<Notification>>;
    fn mark_all_read(&self) -> Result<()>;
}

pub trait UploadService: Send + Sync {
    fn upload_image(&self, data_url: &str) -> Result<String>;
}

/// One handle per concern, all backed by the same source.
#[derive(Clone)]
pub struct Services {
    pub feed: Arc<dyn FeedService>,
    pub comments: Arc<dyn CommentService>,
    pub interactions: Arc<dyn InteractionService>,
    pub social: Arc<dyn SocialService>,
    pub stories: Arc<dyn StoryService>,
    pub messages: Arc<dyn MessageService>,
    pub notifications: Arc<dyn NotificationService>,
    pub uploads: Arc<dyn UploadService>,
}

impl Services {
    pub fn from_client(client: Arc<api::Client>) -> Self {
        let backend = Arc::new(ApiBackend::new(client));
        Self::from_backend(backend)
    }

    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: FeedService
            + CommentService
            + InteractionService
            + SocialService
            + StoryService
            + MessageService
            + NotificationService
            + UploadService
            + 'static,
    {
        Self {
            feed: backend.clone(),
            comments: backend.clone(),
            interactions: backend.clone(),
            social: backend.clone(),
            stories: backend.clone(),
            messages: backend.clone(),
            notifications: backend.clone(),
            uploads: backend,
        }
    }
}

pub struct ApiBackend {
    client: Arc<api::Client>,
}

impl ApiBackend {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl FeedService for ApiBackend {
    fn load_feed(&self, skip: usize, limit: usize) -> Result<Vec<Post>> {
        self.client.feed(skip, limit).context("fetch feed page")
    }

    fn load_explore(&self) -> Result<Vec<Post>> {
        self.client.explore().context("fetch explore")
    }

    fn load_saved(&self) -> Result<Vec<Post>> {
        self.client.saved_posts().context("fetch saved posts")
    }

    fn load_reels(&self) -> Result<Vec<Reel>> {
        self.client.reels().context("fetch reels")
    }

    fn load_post(&self, post_id: &str) -> Result<Post> {
        self.client.post(post_id).context("fetch post")
    }
}

impl CommentService for ApiBackend {
    fn load_comments(&self, post_id: &str) -> Result<Vec<Comment>> {
        self.client.comments(post_id).context("fetch comments")
    }

    fn add_comment(&self, post_id: &str, text: &str) -> Result<Comment> {
        self.client.add_comment(post_id, text).context("add comment")
    }
}

impl InteractionService for ApiBackend {
    fn react(&self, post_id: &str, kind: ReactionKind) -> Result<()> {
        self.client.react(post_id, kind)
    }

    fn toggle_save(&self, post_id: &str) -> Result<bool> {
        Ok(self.client.toggle_save(post_id)?.is_saved)
    }

    fn create_post(&self, draft: &PostDraft) -> Result<Post> {
        self.client.create_post(draft).context("create post")
    }

    fn delete_post(&self, post_id: &str) -> Result<()> {
        self.client.delete_post(post_id)
    }
}

impl SocialService for ApiBackend {
    fn load_user(&self, user_id: &str) -> Result<UserProfile> {
        self.client.user(user_id).context("fetch user")
    }

    fn load_user_posts(&self, user_id: &str) -> Result<Vec<Post>> {
        self.client.user_posts(user_id).context("fetch user posts")
    }

    fn is_following(&self, user_id: &str) -> Result<bool> {
        self.client.is_following(user_id)
    }

    fn follow(&self, user_id: &str) -> Result<FollowState> {
        self.client.follow(user_id)
    }

    fn unfollow(&self, user_id: &str) -> Result<FollowState> {
        self.client.unfollow(user_id)
    }

    fn search_users(&self, query: &str) -> Result<Vec<UserProfile>> {
        self.client.search_users(query).context("search users")
    }

    fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile> {
        self.client.update_me(update).context("update profile")
    }
}

impl StoryService for ApiBackend {
    fn load_stories(&self) -> Result<Vec<Story>> {
        self.client.stories().context("fetch stories")
    }

    fn create_story(&self, draft: &StoryDraft) -> Result<Story> {
        self.client.create_story(draft).context("create story")
    }
}

impl MessageService for ApiBackend {
    fn load_conversations(&self) -> Result<Vec<Conversation>> {
        self.client.conversations().context("fetch conversations")
    }

    fn load_messages(&self, user_id: &str) -> Result<Vec<Message>> {
        self.client.messages(user_id).context("fetch messages")
    }

    fn send_message(&self, draft: &MessageDraft) -> Result<Message> {
        self.client.send_message(draft).context("send message")
    }
}

impl NotificationService for ApiBackend {
    fn load_notifications(&self) -> Result<Vec<Notification>> {
        self.client.notifications().context("fetch notifications")
    }

    fn mark_all_read(&self) -> Result<()> {
        self.client.mark_notifications_read()
    }
}

impl UploadService for ApiBackend {
    fn upload_image(&self, data_url: &str) -> Result<String> {
        self.client.upload_image(data_url).context("upload image")
    }
}

#[derive(Default)]
struct MockState {
    viewer: UserProfile,
    posts: Vec<Post>,
    comments: HashMap<String, Vec<Comment>>,
    stories: Vec<Story>,
    users: Vec<UserProfile>,
    following: HashSet<String>,
    saved: HashSet<String>,
    messages: Vec<Message>,
    notifications: Vec<Notification>,
    calls: Vec<String>,
    failing: HashSet<String>,
    next_id: u64,
}

impl MockState {
    fn record(&mut self, op: &str) -> Result<()> {
        self.calls.push(op.to_string());
        if self.failing.contains(op) {
            return Err(anyhow!("mock: {op} unavailable"));
        }
        Ok(())
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

/// In-memory backend for offline browsing and tests. Every call is recorded
/// by name and individual operations can be made to fail.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new(viewer: UserProfile) -> Self {
        let backend = Self::default();
        backend.state.lock().viewer = viewer;
        backend
    }

    /// A small shuffled sample feed for browsing without a backend.
    pub fn demo() -> Self {
        let viewer = UserProfile {
            id: "me".into(),
            username: "you".into(),
            display_name: "You".into(),
            ..Default::default()
        };
        let backend = Self::new(viewer);
        let friend = UserProfile {
            id: "moth".into(),
            username: "moth".into(),
            display_name: "Moth".into(),
            bio: Some("awake at odd hours".into()),
            followers_count: 12,
            following_count: 4,
            posts_count: 3,
            ..Default::default()
        };
        let lines = [
            ("healing", "some days are just about getting through"),
            ("grateful", "someone held the door and i almost cried"),
            ("numb", "it is 3am again"),
            ("thoughtful", "what would i say if nobody was listening"),
        ];
        let mut rng = rand::thread_rng();
        let mut posts: Vec<Post> = lines
            .iter()
            .enumerate()
            .map(|(idx, (mood, text))| Post {
                id: format!("demo-{idx}"),
                author_id: friend.id.clone(),
                author: Some(friend.summary()),
                text: text.to_string(),
                image_url: None,
                mood: Some(mood.to_string()),
                created_at: Utc::now() - ChronoDuration::minutes(17 * (idx as i64 + 1)),
                comments_enabled: true,
                comments_count: 0,
                reactions: Reactions::from([
                    (ReactionKind::BlackHeart, 2),
                    (ReactionKind::WhiteHeart, 1),
                    (ReactionKind::Hug, 0),
                    (ReactionKind::Moon, 0),
                ]),
                user_reaction: None,
                is_saved: false,
                is_anonymous: idx == 2,
            })
            .collect();
        posts.shuffle(&mut rng);

        let stories = vec![
            Story {
                id: "story-1".into(),
                user: Some(friend.summary()),
                created_at: Utc::now() - ChronoDuration::hours(2),
                content: StoryContent::Text("the sky did something nice tonight".into()),
            },
            Story {
                id: "story-2".into(),
                user: Some(friend.summary()),
                created_at: Utc::now() - ChronoDuration::hours(1),
                content: StoryContent::Text("still here".into()),
            },
        ];
        let note = Notification {
            id: "note-1".into(),
            kind: NotificationKind::Follow,
            actor: Some(friend.summary()),
            post_id: None,
            post_image: None,
            text: String::new(),
            created_at: Utc::now() - ChronoDuration::minutes(5),
            read: false,
        };

        {
            let mut state = backend.state.lock();
            state.posts = posts;
            state.stories = stories;
            state.users = vec![friend];
            state.notifications = vec![note];
        }
        backend
    }

    pub fn with_posts(self, posts: Vec<Post>) -> Self {
        self.state.lock().posts = posts;
        self
    }

    pub fn with_comments(self, post_id: &str, comments: Vec<Comment>) -> Self {
        self.state
            .lock()
            .comments
            .insert(post_id.to_string(), comments);
        self
    }

    pub fn with_stories(self, stories: Vec<Story>) -> Self {
        self.state.lock().stories = stories;
        self
    }

    pub fn with_users(self, users: Vec<UserProfile>) -> Self {
        self.state.lock().users = users;
        self
    }

    pub fn with_messages(self, messages: Vec<Message>) -> Self {
        self.state.lock().messages = messages;
        self
    }

    pub fn with_notifications(self, notifications: Vec<Notification>) -> Self {
        self.state.lock().notifications = notifications;
        self
    }

    pub fn fail(&self, op: &str) {
        self.state.lock().failing.insert(op.to_string());
    }

    pub fn recover(&self, op: &str) {
        self.state.lock().failing.remove(op);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == op).count()
    }
}

impl FeedService for MockBackend {
    fn load_feed(&self, skip: usize, limit: usize) -> Result<Vec<Post>> {
        let mut state = self.state.lock();
        state.record("feed")?;
        Ok(state.posts.iter().skip(skip).take(limit).cloned().collect())
    }

    fn load_explore(&self) -> Result<Vec<Post>> {
        let mut state = self.state.lock();
        state.record("explore")?;
        let viewer = state.viewer.id.clone();
        Ok(state
            .posts
            .iter()
            .filter(|post| post.author_id != viewer && !state.following.contains(&post.author_id))
            .cloned()
            .collect())
    }

    fn load_saved(&self) -> Result<Vec<Post>> {
        let mut state = self.state.lock();
        state.record("saved")?;
        Ok(state
            .posts
            .iter()
            .filter(|post| state.saved.contains(&post.id))
            .cloned()
            .map(|mut post| {
                post.is_saved = true;
                post
            })
            .collect())
    }

    fn load_reels(&self) -> Result<Vec<Reel>> {
        self.state.lock().record("reels")?;
        Ok(Vec::new())
    }

    fn load_post(&self, post_id: &str) -> Result<Post> {
        let mut state = self.state.lock();
        state.record("post")?;
        let mut post = state
            .posts
            .iter()
            .find(|post| post.id == post_id)
            .cloned()
            .ok_or_else(|| anyhow!("mock: post {post_id} not found"))?;
        post.is_saved = state.saved.contains(post_id);
        Ok(post)
    }
}

impl CommentService for MockBackend {
    fn load_comments(&self, post_id: &str) -> Result<Vec<Comment>> {
        let mut state = self.state.lock();
        state.record("comments")?;
        Ok(state.comments.get(post_id).cloned().unwrap_or_default())
    }

    fn add_comment(&self, post_id: &str, text: &str) -> Result<Comment> {
        let mut state = self.state.lock();
        state.record("add_comment")?;
        let comment = Comment {
            id: state.next_id("comment"),
            post_id: post_id.to_string(),
            author_id: state.viewer.id.clone(),
            author: Some(state.viewer.summary()),
            text: text.to_string(),
            created_at: Utc::now(),
        };
        state
            .comments
            .entry(post_id.to_string())
            .or_default()
            .insert(0, comment.clone());
        Ok(comment)
    }
}

impl InteractionService for MockBackend {
    fn react(&self, _post_id: &str, _kind: ReactionKind) -> Result<()> {
        self.state.lock().record("react")
    }

    fn toggle_save(&self, post_id: &str) -> Result<bool> {
        let mut state = self.state.lock();
        state.record("save")?;
        if state.saved.remove(post_id) {
            Ok(false)
        } else {
            state.saved.insert(post_id.to_string());
            Ok(true)
        }
    }

    fn create_post(&self, draft: &PostDraft) -> Result<Post> {
        let mut state = self.state.lock();
        state.record("create_post")?;
        let post = Post {
            id: state.next_id("post"),
            author_id: state.viewer.id.clone(),
            author: if draft.is_anonymous {
                None
            } else {
                Some(state.viewer.summary())
            },
            text: draft.text.clone(),
            image_url: draft.image_url.clone(),
            mood: draft.mood.clone(),
            created_at: Utc::now(),
            comments_enabled: draft.comments_enabled,
            comments_count: 0,
            reactions: Reactions::default(),
            user_reaction: None,
            is_saved: false,
            is_anonymous: draft.is_anonymous,
        };
        state.posts.insert(0, post.clone());
        Ok(post)
    }

    fn delete_post(&self, post_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.record("delete_post")?;
        state.posts.retain(|post| post.id != post_id);
        Ok(())
    }
}

impl SocialService for MockBackend {
    fn load_user(&self, user_id: &str) -> Result<UserProfile> {
        let mut state = self.state.lock();
        state.record("user")?;
        if state.viewer.id == user_id {
            return Ok(state.viewer.clone());
        }
        state
            .users
            .iter()
            .find(|user| user.id == user_id)
            .cloned()
            .ok_or_else(|| anyhow!("mock: user {user_id} not found"))
    }

    fn load_user_posts(&self, user_id: &str) -> Result<Vec<Post>> {
        let mut state = self.state.lock();
        state.record("user_posts")?;
        Ok(state
            .posts
            .iter()
            .filter(|post| post.author_id == user_id && !post.is_anonymous)
            .cloned()
            .collect())
    }

    fn is_following(&self, user_id: &str) -> Result<bool> {
        let mut state = self.state.lock();
        state.record("is_following")?;
        Ok(state.following.contains(user_id))
    }

    fn follow(&self, user_id: &str) -> Result<FollowState> {
        let mut state = self.state.lock();
        state.record("follow")?;
        state.following.insert(user_id.to_string());
        Ok(FollowState {
            is_following: Some(true),
            status: None,
        })
    }

    fn unfollow(&self, user_id: &str) -> Result<FollowState> {
        let mut state = self.state.lock();
        state.record("unfollow")?;
        state.following.remove(user_id);
        Ok(FollowState {
            is_following: Some(false),
            status: None,
        })
    }

    fn search_users(&self, query: &str) -> Result<Vec<UserProfile>> {
        let mut state = self.state.lock();
        state.record("search")?;
        let needle = query.trim().to_lowercase();
        Ok(state
            .users
            .iter()
            .filter(|user| {
                user.username.to_lowercase().contains(&needle)
                    || user.display_name.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect())
    }

    fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile> {
        let mut state = self.state.lock();
        state.record("update_profile")?;
        let viewer = &mut state.viewer;
        if let Some(name) = &update.display_name {
            viewer.display_name = name.clone();
        }
        if let Some(bio) = &update.bio {
            viewer.bio = Some(bio.clone());
        }
        if let Some(avatar) = &update.avatar {
            viewer.avatar = Some(avatar.clone());
        }
        if let Some(website) = &update.website {
            viewer.website = Some(website.clone());
        }
        if let Some(private) = update.is_private {
            viewer.is_private = private;
        }
        Ok(viewer.clone())
    }
}

impl StoryService for MockBackend {
    fn load_stories(&self) -> Result<Vec<Story>> {
        let mut state = self.state.lock();
        state.record("stories")?;
        Ok(state.stories.clone())
    }

    fn create_story(&self, draft: &StoryDraft) -> Result<Story> {
        let mut state = self.state.lock();
        state.record("create_story")?;
        let content = if let Some(url) = draft.image_url.clone() {
            StoryContent::Image(url)
        } else if let Some(url) = draft.video_url.clone() {
            StoryContent::Video(url)
        } else {
            StoryContent::Text(draft.text.clone().unwrap_or_default())
        };
        let story = Story {
            id: state.next_id("story"),
            user: Some(state.viewer.summary()),
            created_at: Utc::now(),
            content,
        };
        state.stories.insert(0, story.clone());
        Ok(story)
    }
}

impl MessageService for MockBackend {
    fn load_conversations(&self) -> Result<Vec<Conversation>> {
        let mut state = self.state.lock();
        state.record("conversations")?;
        let viewer = state.viewer.id.clone();
        let mut latest: HashMap<String, &Message> = HashMap::new();
        let mut unread: HashMap<String, u32> = HashMap::new();
        for message in &state.messages {
            let peer = if message.sender_id == viewer {
                &message.receiver_id
            } else {
                &message.sender_id
            };
            let entry = latest.entry(peer.clone()).or_insert(message);
            if message.created_at >= entry.created_at {
                *entry = message;
            }
            if message.receiver_id == viewer && !message.seen {
                *unread.entry(peer.clone()).or_default() += 1;
            }
        }
        let mut conversations: Vec<Conversation> = latest
            .into_iter()
            .map(|(peer, last)| {
                let user = state
                    .users
                    .iter()
                    .find(|user| user.id == peer)
                    .map(UserProfile::summary)
                    .unwrap_or_else(|| UserSummary {
                        id: peer.clone(),
                        username: peer.clone(),
                        ..Default::default()
                    });
                Conversation {
                    user,
                    last_message: Some(last.text.clone()),
                    last_message_time: Some(last.created_at),
                    unread_count: unread.get(&peer).copied().unwrap_or(0),
                }
            })
            .collect();
        conversations.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
        Ok(conversations)
    }

    fn load_messages(&self, user_id: &str) -> Result<Vec<Message>> {
        let mut state = self.state.lock();
        state.record("messages")?;
        let viewer = state.viewer.id.clone();
        let mut thread: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| {
                (m.sender_id == viewer && m.receiver_id == user_id)
                    || (m.sender_id == user_id && m.receiver_id == viewer)
            })
            .cloned()
            .collect();
        thread.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        for message in state.messages.iter_mut() {
            if message.sender_id == user_id && message.receiver_id == viewer {
                message.seen = true;
            }
        }
        Ok(thread)
    }

    fn send_message(&self, draft: &MessageDraft) -> Result<Message> {
        let mut state = self.state.lock();
        state.record("send_message")?;
        let message = Message {
            id: state.next_id("message"),
            sender_id: state.viewer.id.clone(),
            receiver_id: draft.receiver_id.clone(),
            text: draft.text.clone(),
            image_url: draft.image_url.clone(),
            created_at: Utc::now(),
            seen: false,
        };
        state.messages.push(message.clone());
        Ok(message)
    }
}

impl NotificationService for MockBackend {
    fn load_notifications(&self) -> Result<Vec<Notification>> {
        let mut state = self.state.lock();
        state.record("notifications")?;
        Ok(state.notifications.clone())
    }

    fn mark_all_read(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.record("mark_read")?;
        for note in state.notifications.iter_mut() {
            note.read = true;
        }
        Ok(())
    }
}

impl UploadService for MockBackend {
    fn upload_image(&self, _data_url: &str) -> Result<String> {
        let mut state = self.state.lock();
        state.record("upload")?;
        let id = state.next_id("image");
        Ok(format!("https://images.invalid/{id}.png"))
    }
}
