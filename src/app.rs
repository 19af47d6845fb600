use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use crate::api;
use crate::auth;
use crate::comments::CommentThreads;
use crate::config::{self, Config};
use crate::data::{MockBackend, Services};
use crate::feed::PostList;
use crate::messages::{ChatThread, Inbox};
use crate::models::{PostDraft, ProfileUpdate, ReactionKind, SignupRequest, StoryDraft, MOODS};
use crate::mutation::{Confirm, Engine};
use crate::notice::{ConsoleSink, NoticeSink};
use crate::notifications::{Filter, NotificationList};
use crate::profile::ProfileView;
use crate::render;
use crate::session;
use crate::storage;
use crate::story::{Advance, StoryViewer};
use crate::timeline::Timeline;
use crate::upload;

/// Command line of the `unsaid` binary.
#[derive(Debug, Clone, PartialEq, Parser)]
#[command(
    name = "unsaid",
    version,
    about = "unsaid - say the things you don't say out loud.",
    long_about = None
)]
pub struct Invocation {
    /// Run against built-in sample data instead of the backend
    #[arg(long, global = true)]
    pub demo: bool,
    /// Read configuration from this file
    #[arg(long = "config", value_name = "PATH", global = true)]
    pub config_file: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum Command {
    /// Sign in
    Login { email: String, password: String },
    /// Create an account
    Signup(SignupArgs),
    /// Forget the stored session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Home feed, one page per count
    Feed {
        #[arg(default_value_t = 1)]
        pages: usize,
    },
    /// Posts picked for discovery
    Explore,
    /// Posts you saved
    Saved,
    /// Short videos
    Reels,
    /// Show a post's comments
    Comments { post_id: String },
    /// Play stories with a progress bar
    Stories,
    /// Show a profile and its posts
    Profile { user_id: Option<String> },
    /// Find people
    Search {
        #[arg(required = true)]
        query: Vec<String>,
    },
    /// List notifications
    Notifications {
        /// Mark everything as read first
        #[arg(long)]
        mark_read: bool,
        /// all, follows or activity
        #[arg(long, default_value = "all", value_parser = notification_filter)]
        filter: Filter,
    },
    /// Conversations
    Inbox,
    /// Messages with one person
    Chat { user_id: String },
    /// Publish a post
    Post(PostArgs),
    /// React to a post: black_heart, white_heart, hug or moon
    React { post_id: String, kind: ReactionKind },
    /// Toggle saved
    Save { post_id: String },
    /// Comment on a post
    Comment { post_id: String, text: Vec<String> },
    /// Delete one of your posts
    Delete {
        post_id: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Toggle following
    Follow { user_id: String },
    /// Send a message
    Send {
        user_id: String,
        text: Vec<String>,
        /// Image file or URL to attach
        #[arg(long, value_name = "PATH|URL")]
        image: Option<String>,
    },
    /// Share a story
    AddStory {
        text: Vec<String>,
        #[arg(long, value_name = "PATH|URL")]
        image: Option<String>,
        #[arg(long, value_name = "URL")]
        video: Option<String>,
    },
    /// Change your profile
    EditProfile(EditProfileArgs),
    /// Upload an image and print its URL
    Upload { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct SignupArgs {
    pub email: String,
    pub password: String,
    pub username: String,
    /// Defaults to the username
    pub display_name: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct PostArgs {
    pub text: Vec<String>,
    #[arg(long, value_parser = known_mood)]
    pub mood: Option<String>,
    /// Image file or URL to attach
    #[arg(long, value_name = "PATH|URL")]
    pub image: Option<String>,
    /// Hide your name on this post
    #[arg(long)]
    pub anonymous: bool,
    /// Turn comments off
    #[arg(long)]
    pub no_comments: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct EditProfileArgs {
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub bio: Option<String>,
    #[arg(long)]
    pub website: Option<String>,
    #[arg(long, conflicts_with = "public")]
    pub private: bool,
    #[arg(long)]
    pub public: bool,
}

impl From<EditProfileArgs> for ProfileUpdate {
    fn from(args: EditProfileArgs) -> Self {
        let is_private = match (args.private, args.public) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        ProfileUpdate {
            display_name: args.name,
            bio: args.bio,
            avatar: None,
            website: args.website,
            is_private,
        }
    }
}

fn known_mood(raw: &str) -> Result<String, String> {
    if MOODS.iter().any(|(name, _)| *name == raw) {
        return Ok(raw.to_string());
    }
    let known: Vec<&str> = MOODS.iter().map(|(name, _)| *name).collect();
    Err(format!("unknown mood {raw:?}; try one of {}", known.join(", ")))
}

fn notification_filter(raw: &str) -> Result<Filter, String> {
    raw.parse::<Filter>().map_err(|err| err.to_string())
}

/// Words given as separate arguments, joined back into one text.
fn joined(words: &[String]) -> Option<String> {
    let text = words.join(" ");
    (!text.trim().is_empty()).then_some(text)
}

/// Parses everything after the program name.
pub fn parse(args: &[String]) -> Result<Invocation> {
    let argv = std::iter::once("unsaid").chain(args.iter().map(String::as_str));
    Ok(Invocation::try_parse_from(argv)?)
}

/// Reads a y/N answer from stdin.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        print!("{prompt} [y/N] ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

struct Runtime {
    cfg: Config,
    services: Services,
    notices: Arc<dyn NoticeSink>,
    engine: Arc<Engine>,
    session: Arc<session::Manager>,
    auth: Option<auth::Flow>,
    demo_viewer: Option<String>,
}

impl Runtime {
    fn open(cfg: Config, demo: bool) -> Result<Self> {
        let notices: Arc<dyn NoticeSink> = Arc::new(ConsoleSink);
        if demo {
            let store = Arc::new(storage::Store::open_in_memory()?);
            let session = Arc::new(session::Manager::new(store)?);
            let backend = Arc::new(MockBackend::demo());
            let services = Services::from_backend(backend.clone());
            let viewer = services.social.load_user("me")?;
            let engine = Engine::new(services.clone(), notices.clone())
                .with_reaction_failure(cfg.reactions.on_failure);
            return Ok(Self {
                cfg,
                services,
                notices,
                engine: Arc::new(engine),
                session,
                auth: None,
                demo_viewer: Some(viewer.id),
            });
        }

        let store = Arc::new(
            storage::Store::open(storage::Options {
                path: cfg.storage.path.clone(),
            })
            .context("open storage")?,
        );
        let session = Arc::new(session::Manager::new(store)?);
        let policy = Arc::new(session::SessionPolicy::new(session.clone()));
        let client = Arc::new(api::Client::new(
            policy,
            api::ClientConfig {
                base_url: cfg.api.base_url.clone(),
                user_agent: cfg.api.user_agent.clone(),
                timeout: Some(cfg.api.timeout),
                http_client: None,
            },
        )?);
        let services = Services::from_client(client.clone());
        let engine = Engine::new(services.clone(), notices.clone())
            .with_reaction_failure(cfg.reactions.on_failure)
            .with_session(session.clone());
        let auth = auth::Flow::new(client, session.clone(), notices.clone());
        Ok(Self {
            cfg,
            services,
            notices,
            engine: Arc::new(engine),
            session,
            auth: Some(auth),
            demo_viewer: None,
        })
    }

    fn auth(&self) -> Result<&auth::Flow> {
        self.auth
            .as_ref()
            .ok_or_else(|| anyhow!("account commands are not available in demo mode"))
    }

    fn viewer_id(&self) -> Result<String> {
        if let Some(id) = &self.demo_viewer {
            return Ok(id.clone());
        }
        Ok(self.session.require_user()?.id)
    }

    fn require_session(&self) -> Result<()> {
        self.viewer_id().map(|_| ())
    }

    /// Accepts either a URL or a local file that gets uploaded first.
    fn resolve_image(&self, raw: Option<String>) -> Result<Option<String>> {
        match raw {
            Some(raw) if Path::new(&raw).is_file() => Ok(Some(upload::upload_file(
                &self.services,
                self.notices.as_ref(),
                Path::new(&raw),
                self.cfg.upload.max_image_bytes,
            )?)),
            other => Ok(other),
        }
    }
}

pub fn run_invocation(invocation: Invocation) -> Result<()> {
    let cfg = config::load(config::LoadOptions {
        config_file: invocation.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;
    debug!(base_url = %cfg.api.base_url, demo = invocation.demo, "app: starting");
    let ctx = Runtime::open(cfg, invocation.demo)?;
    execute(&ctx, invocation.command)
}

fn execute(ctx: &Runtime, command: Command) -> Result<()> {
    let now = Utc::now();
    let width = render::DEFAULT_WIDTH;
    let services = &ctx.services;

    match command {
        Command::Login { email, password } => {
            let user = ctx.auth()?.login(&email, &password)?;
            println!("{}", render::profile(&user, None));
        }
        Command::Signup(args) => {
            let request = SignupRequest {
                display_name: joined(&args.display_name).unwrap_or_else(|| args.username.clone()),
                email: args.email,
                password: args.password,
                username: args.username,
            };
            let user = ctx.auth()?.signup(&request)?;
            println!("{}", render::profile(&user, None));
        }
        Command::Logout => ctx.auth()?.logout()?,
        Command::Whoami => {
            let user = match ctx.auth.as_ref() {
                Some(auth) => auth.restore()?,
                None => Some(services.social.load_user(&ctx.viewer_id()?)?),
            };
            match user {
                Some(user) => println!("{}", render::profile(&user, None)),
                None => println!("not signed in"),
            }
        }
        Command::Feed { pages } => {
            ctx.require_session()?;
            let mut timeline = Timeline::new(
                ctx.engine.clone(),
                ctx.cfg.feed.page_size,
                ctx.cfg.comments.cache_threads,
            );
            let wait = ctx.cfg.api.timeout + Duration::from_secs(1);
            timeline.start();
            timeline.settle(wait);
            for _ in 1..pages {
                if !timeline.on_sentinel_visible() {
                    break;
                }
                timeline.settle(wait);
            }
            print_posts(timeline.posts(), width);
        }
        Command::Explore => {
            ctx.require_session()?;
            print_posts(&services.feed.load_explore()?, width);
        }
        Command::Saved => {
            ctx.require_session()?;
            print_posts(&services.feed.load_saved()?, width);
        }
        Command::Reels => {
            ctx.require_session()?;
            for reel in services.feed.load_reels()? {
                let who = reel
                    .author
                    .as_ref()
                    .map(|a| a.display_label().to_string())
                    .unwrap_or_else(|| "unknown".into());
                println!(
                    "[{}] {} · {} · {} views · {} likes",
                    reel.id,
                    who,
                    reel.caption.as_deref().unwrap_or(""),
                    reel.views_count,
                    reel.likes_count
                );
                println!("  {}", reel.video_url);
            }
        }
        Command::Comments { post_id } => {
            ctx.require_session()?;
            let post = services.feed.load_post(&post_id)?;
            let mut threads = CommentThreads::new(ctx.cfg.comments.cache_threads);
            println!("{}", render::post(&post, width, now));
            if let Some(request) = threads.expand(&post.id) {
                let result = services.comments.load_comments(&request.post_id);
                threads.apply(&request, result)?;
            }
            for comment in threads.comments(&post.id) {
                println!("{}", render::comment(comment, width, now));
            }
        }
        Command::Stories => {
            ctx.require_session()?;
            play_stories(ctx)?;
        }
        Command::Profile { user_id } => {
            let viewer = ctx.viewer_id()?;
            let target = user_id.unwrap_or_else(|| viewer.clone());
            let view = ProfileView::load(services, &target, Some(viewer.as_str()))?;
            let following = (!view.is_own).then_some(view.is_following);
            println!("{}", render::profile(&view.user, following));
            println!();
            print_posts(view.posts.as_slice(), width);
        }
        Command::Search { query } => {
            ctx.require_session()?;
            for user in services.social.search_users(&query.join(" "))? {
                println!("{} (@{}) [{}]", user.display_name, user.username, user.id);
            }
        }
        Command::Notifications { mark_read, filter } => {
            ctx.require_session()?;
            let mut list = NotificationList::load(services)?;
            if mark_read {
                list.mark_all_read(services)?;
            }
            for note in list.iter(filter) {
                println!("{}", render::notification(note, now));
            }
            println!("{} unread", list.unread());
        }
        Command::Inbox => {
            ctx.require_session()?;
            let inbox = Inbox::load(services)?;
            for conversation in inbox.conversations() {
                println!("{}", render::conversation(conversation, now));
            }
        }
        Command::Chat { user_id } => {
            let viewer = ctx.viewer_id()?;
            let thread = ChatThread::open(services, &user_id)?;
            let peer = thread.peer.display_name.clone();
            for message in thread.messages() {
                println!("{}", render::message(message, &viewer, &peer, now));
            }
        }
        Command::Post(args) => {
            ctx.require_session()?;
            let draft = PostDraft {
                text: joined(&args.text).unwrap_or_default(),
                image_url: ctx.resolve_image(args.image)?,
                mood: args.mood,
                comments_enabled: !args.no_comments,
                is_anonymous: args.anonymous,
            };
            let mut feed = PostList::default();
            let post = ctx.engine.create_post(&draft, &mut feed)?;
            println!("{}", render::post(&post, width, now));
        }
        Command::React { post_id, kind } => {
            ctx.require_session()?;
            let mut post = services.feed.load_post(&post_id)?;
            ctx.engine.toggle_reaction(&mut post, kind)?;
            println!("{}", render::post(&post, width, now));
        }
        Command::Save { post_id } => {
            ctx.require_session()?;
            let mut post = services.feed.load_post(&post_id)?;
            ctx.engine.toggle_save(&mut post)?;
        }
        Command::Comment { post_id, text } => {
            ctx.require_session()?;
            let mut post = services.feed.load_post(&post_id)?;
            let mut threads = CommentThreads::new(ctx.cfg.comments.cache_threads);
            let text = text.join(" ");
            let comment = ctx.engine.add_comment(&mut post, &mut threads, &text)?;
            println!("{}", render::comment(&comment, width, now));
        }
        Command::Delete { post_id, yes } => {
            ctx.require_session()?;
            let always = |_: &str| true;
            let confirm: &dyn Confirm = if yes { &always } else { &StdinConfirm };
            if !ctx.engine.delete_post(&post_id, confirm, &mut [])? {
                println!("kept {post_id}");
            }
        }
        Command::Follow { user_id } => {
            let viewer = ctx.viewer_id()?;
            let mut view = ProfileView::load(services, &user_id, Some(viewer.as_str()))?;
            if view.is_own {
                bail!("you cannot follow yourself");
            }
            ctx.engine.toggle_follow(&mut view)?;
            println!("{}", render::profile(&view.user, Some(view.is_following)));
        }
        Command::Send {
            user_id,
            text,
            image,
        } => {
            let viewer = ctx.viewer_id()?;
            let image = ctx.resolve_image(image)?;
            let mut thread = ChatThread::open(services, &user_id)?;
            let text = text.join(" ");
            let message = thread.send(services, ctx.notices.as_ref(), &text, image)?;
            println!(
                "{}",
                render::message(&message, &viewer, &thread.peer.display_name, now)
            );
        }
        Command::AddStory { text, image, video } => {
            ctx.require_session()?;
            let draft = StoryDraft {
                text: joined(&text),
                image_url: ctx.resolve_image(image)?,
                video_url: video,
            };
            if draft.text.is_none() && draft.image_url.is_none() && draft.video_url.is_none() {
                bail!("a story needs text, an image or a video");
            }
            let story = services.stories.create_story(&draft)?;
            println!("{}", render::story(&story));
        }
        Command::EditProfile(args) => {
            ctx.require_session()?;
            let user = ctx.engine.update_profile(&ProfileUpdate::from(args))?;
            println!("{}", render::profile(&user, None));
        }
        Command::Upload { path } => {
            ctx.require_session()?;
            let url = upload::upload_file(
                services,
                ctx.notices.as_ref(),
                &path,
                ctx.cfg.upload.max_image_bytes,
            )?;
            println!("{url}");
        }
    }
    Ok(())
}

fn print_posts(posts: &[crate::models::Post], width: usize) {
    let now = Utc::now();
    if posts.is_empty() {
        println!("nothing here yet");
        return;
    }
    for post in posts {
        println!("{}\n", render::post(post, width, now));
    }
}

fn play_stories(ctx: &Runtime) -> Result<()> {
    let stories = ctx.services.stories.load_stories()?;
    if stories.is_empty() {
        println!("no stories right now");
        return Ok(());
    }
    let mut viewer = StoryViewer::open(stories, 0, ctx.cfg.stories.duration, ctx.cfg.stories.tick);
    let bar = ProgressBar::new(100);
    bar.set_style(ProgressStyle::with_template("{msg}\n[{bar:40}] {pos:>3}%")?.progress_chars("=> "));
    let total = viewer.len();
    let label = |viewer: &StoryViewer| {
        viewer
            .current()
            .map(|story| format!("({}/{}) {}", viewer.index() + 1, total, render::story(story)))
            .unwrap_or_default()
    };
    bar.set_message(label(&viewer));

    let wait = viewer.period() * 10;
    while !viewer.is_closed() {
        match viewer.pump(wait) {
            Some(Advance::Moved(_)) => bar.set_message(label(&viewer)),
            Some(_) => {}
            None => break,
        }
        bar.set_position(viewer.progress().round() as u64);
    }
    bar.finish_and_clear();
    println!("watched {total} stories");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_global_flags_and_feed_pages() {
        let inv = parse(&args(&["--demo", "feed", "3"])).unwrap();
        assert!(inv.demo);
        assert_eq!(inv.command, Command::Feed { pages: 3 });
        assert_eq!(parse(&args(&["feed"])).unwrap().command, Command::Feed { pages: 1 });
    }

    #[test]
    fn parses_post_with_flags() {
        let inv = parse(&args(&[
            "post",
            "nobody",
            "asked",
            "--mood",
            "numb",
            "--anonymous",
            "--no-comments",
        ]))
        .unwrap();
        let Command::Post(post) = inv.command else {
            panic!("expected a post command");
        };
        assert_eq!(joined(&post.text).as_deref(), Some("nobody asked"));
        assert_eq!(post.mood.as_deref(), Some("numb"));
        assert!(post.anonymous);
        assert!(post.no_comments);
    }

    #[test]
    fn mistyped_flags_are_refused() {
        assert!(parse(&args(&["post", "my", "secret", "--anonymus"])).is_err());
        assert!(parse(&args(&["comment", "p1", "--honestly", "fine"])).is_err());
    }

    #[test]
    fn words_after_double_dash_stay_in_text() {
        let inv = parse(&args(&["comment", "p1", "--", "--honestly", "-h", "fine"])).unwrap();
        assert_eq!(
            inv.command,
            Command::Comment {
                post_id: "p1".into(),
                text: args(&["--honestly", "-h", "fine"]),
            }
        );
    }

    #[test]
    fn reaction_accepts_labels() {
        let inv = parse(&args(&["react", "p1", "calm"])).unwrap();
        assert_eq!(
            inv.command,
            Command::React {
                post_id: "p1".into(),
                kind: ReactionKind::Moon
            }
        );
        assert!(parse(&args(&["react", "p1", "sparkle"])).is_err());
    }

    #[test]
    fn unknown_mood_and_command_fail() {
        assert!(parse(&args(&["post", "x", "--mood", "ecstatic"])).is_err());
        assert!(parse(&args(&["dance"])).is_err());
        assert!(parse(&[]).is_err());
    }

    #[test]
    fn config_flag_takes_value() {
        let inv = parse(&args(&["--config=/tmp/u.yaml", "notifications", "--mark-read"])).unwrap();
        assert_eq!(inv.config_file, Some(PathBuf::from("/tmp/u.yaml")));
        assert_eq!(
            inv.command,
            Command::Notifications {
                mark_read: true,
                filter: Filter::All
            }
        );
        let inv = parse(&args(&["notifications", "--filter", "follows", "--demo"])).unwrap();
        assert!(inv.demo);
        assert_eq!(
            inv.command,
            Command::Notifications {
                mark_read: false,
                filter: Filter::Follows
            }
        );
    }

    #[test]
    fn edit_profile_visibility() {
        let inv = parse(&args(&["edit-profile", "--bio", "tired", "--private"])).unwrap();
        let Command::EditProfile(edit) = inv.command else {
            panic!("expected edit-profile");
        };
        let update = ProfileUpdate::from(edit);
        assert_eq!(update.bio.as_deref(), Some("tired"));
        assert_eq!(update.is_private, Some(true));
        assert!(parse(&args(&["edit-profile", "--private", "--public"])).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Invocation::command().debug_assert();
    }
}
