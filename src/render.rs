use chrono::{DateTime, Utc};
use textwrap::{wrap, Options as WrapOptions};

use crate::models::{
    mood_label, Comment, Conversation, Message, Notification, NotificationKind, Post, ReactionKind,
    Story, StoryContent, UserProfile,
};

pub const DEFAULT_WIDTH: usize = 72;

pub fn relative_time(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds().max(0);
    match secs {
        0..=59 => "just now".to_string(),
        60..=3_599 => format!("{}m ago", secs / 60),
        3_600..=86_399 => format!("{}h ago", secs / 3_600),
        86_400..=604_799 => format!("{}d ago", secs / 86_400),
        _ => at.format("%b %-d, %Y").to_string(),
    }
}

fn wrapped(text: &str, width: usize, indent: &str) -> Vec<String> {
    let width = width.max(indent.chars().count() + 1);
    let options = WrapOptions::new(width)
        .break_words(false)
        .initial_indent(indent)
        .subsequent_indent(indent);
    wrap(text, options)
        .into_iter()
        .map(|line| line.into_owned())
        .collect()
}

pub fn reaction_bar(post: &Post) -> String {
    ReactionKind::ALL
        .iter()
        .map(|kind| {
            let marker = if post.user_reaction == Some(*kind) { "*" } else { "" };
            format!("{}{} {}", kind.emoji(), marker, post.reactions.count(*kind))
        })
        .collect::<Vec<_>>()
        .join("  ")
}

pub fn post(post: &Post, width: usize, now: DateTime<Utc>) -> String {
    let mut header = format!(
        "{} · {}",
        post.author_label(),
        relative_time(post.created_at, now)
    );
    if let Some(mood) = post.mood.as_deref() {
        header.push_str(&format!(" · feeling {}", mood_label(mood)));
    }
    if post.is_saved {
        header.push_str(" · saved");
    }

    let mut lines = vec![format!("[{}] {}", post.id, header)];
    lines.extend(wrapped(&post.text, width, "  "));
    if let Some(url) = post.image_url.as_deref() {
        lines.push(format!("  image: {url}"));
    }
    let comments = if post.comments_enabled {
        format!("{} comments", post.comments_count)
    } else {
        "comments off".to_string()
    };
    lines.push(format!("  {}  ·  {}", reaction_bar(post), comments));
    lines.join("\n")
}

pub fn comment(comment: &Comment, width: usize, now: DateTime<Utc>) -> String {
    let who = comment
        .author
        .as_ref()
        .map(|a| a.display_label().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let mut lines = vec![format!("  {} · {}", who, relative_time(comment.created_at, now))];
    lines.extend(wrapped(&comment.text, width, "    "));
    lines.join("\n")
}

pub fn profile(user: &UserProfile, is_following: Option<bool>) -> String {
    let mut lines = vec![format!("{} (@{})", user.display_name, user.username)];
    if let Some(bio) = user.bio.as_deref().filter(|b| !b.trim().is_empty()) {
        lines.push(format!("  {bio}"));
    }
    if let Some(site) = user.website.as_deref().filter(|w| !w.trim().is_empty()) {
        lines.push(format!("  {site}"));
    }
    lines.push(format!(
        "  {} posts · {} followers · {} following",
        user.posts_count, user.followers_count, user.following_count
    ));
    if user.is_private {
        lines.push("  private account".to_string());
    }
    match is_following {
        Some(true) => lines.push("  you follow them".to_string()),
        Some(false) => lines.push("  not following".to_string()),
        None => {}
    }
    lines.push(format!("  avatar: {}", user.avatar_url()));
    lines.join("\n")
}

pub fn story(story: &Story) -> String {
    let who = story
        .user
        .as_ref()
        .map(|u| u.display_label().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let body = match &story.content {
        StoryContent::Image(url) => format!("image {url}"),
        StoryContent::Video(url) => format!("video {url}"),
        StoryContent::Text(text) => text.clone(),
    };
    format!("{who}: {body}")
}

pub fn notification(note: &Notification, now: DateTime<Utc>) -> String {
    let who = note
        .actor
        .as_ref()
        .map(|a| a.display_label().to_string())
        .unwrap_or_else(|| "someone".to_string());
    let action = match note.kind {
        NotificationKind::Reaction => "reacted to your post",
        NotificationKind::Comment => "commented on your post",
        NotificationKind::Follow => "started following you",
        NotificationKind::Other => "sent you something",
    };
    let marker = if note.read { " " } else { "•" };
    let mut line = format!("{marker} {who} {action} · {}", relative_time(note.created_at, now));
    if !note.text.trim().is_empty() {
        line.push_str(&format!(": {}", note.text.trim()));
    }
    line
}

pub fn conversation(conversation: &Conversation, now: DateTime<Utc>) -> String {
    let mut line = format!(
        "{} (@{})",
        conversation.user.display_label(),
        conversation.user.username
    );
    if conversation.unread_count > 0 {
        line.push_str(&format!(" [{} new]", conversation.unread_count));
    }
    if let Some(last) = conversation.last_message.as_deref() {
        line.push_str(&format!(" · {last}"));
    }
    if let Some(at) = conversation.last_message_time {
        line.push_str(&format!(" · {}", relative_time(at, now)));
    }
    line
}

pub fn message(message: &Message, viewer_id: &str, peer: &str, now: DateTime<Utc>) -> String {
    let who = if message.sender_id == viewer_id { "you" } else { peer };
    let mut line = format!("{who} · {}: {}", relative_time(message.created_at, now), message.text);
    if let Some(url) = message.image_url.as_deref() {
        line.push_str(&format!(" [image {url}]"));
    }
    line
}
