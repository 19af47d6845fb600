use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValidationError;

pub const AVATAR_PLACEHOLDER_BASE: &str = "https://api.dicebear.com/7.x/avataaars/svg";

/// Deterministic placeholder avatar for users without an uploaded one.
pub fn placeholder_avatar(username: &str) -> String {
    format!(
        "{}?seed={}",
        AVATAR_PLACEHOLDER_BASE,
        utf8_percent_encode(username, NON_ALPHANUMERIC)
    )
}

fn avatar_or_placeholder(avatar: Option<&str>, username: &str) -> String {
    match avatar {
        Some(url) if !url.trim().is_empty() => url.to_string(),
        _ => placeholder_avatar(username),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionKind {
    BlackHeart,
    WhiteHeart,
    Hug,
    Moon,
}

impl ReactionKind {
    pub const ALL: [ReactionKind; 4] = [
        ReactionKind::BlackHeart,
        ReactionKind::WhiteHeart,
        ReactionKind::Hug,
        ReactionKind::Moon,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReactionKind::BlackHeart => "black_heart",
            ReactionKind::WhiteHeart => "white_heart",
            ReactionKind::Hug => "hug",
            ReactionKind::Moon => "moon",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReactionKind::BlackHeart => "resonate",
            ReactionKind::WhiteHeart => "felt this",
            ReactionKind::Hug => "hugs",
            ReactionKind::Moon => "calm",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            ReactionKind::BlackHeart => "🖤",
            ReactionKind::WhiteHeart => "🤍",
            ReactionKind::Hug => "🫂",
            ReactionKind::Moon => "🌙",
        }
    }
}

impl fmt::Display for ReactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReactionKind {
    type Err = ValidationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let key = raw.trim().to_ascii_lowercase();
        ReactionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == key || kind.label() == key)
            .ok_or_else(|| ValidationError::UnknownReaction(raw.to_string()))
    }
}

/// Per-kind reaction counts. Kinds the client does not know are dropped on
/// decode and missing kinds read as zero.
#[derive(Debug, Clone, Default)]
pub struct Reactions(BTreeMap<ReactionKind, u32>);

impl Reactions {
    pub fn count(&self, kind: ReactionKind) -> u32 {
        self.0.get(&kind).copied().unwrap_or(0)
    }

    pub fn set(&mut self, kind: ReactionKind, count: u32) {
        self.0.insert(kind, count);
    }

    pub fn increment(&mut self, kind: ReactionKind) {
        let entry = self.0.entry(kind).or_insert(0);
        *entry = entry.saturating_add(1);
    }

    pub fn decrement(&mut self, kind: ReactionKind) {
        let entry = self.0.entry(kind).or_insert(0);
        *entry = entry.saturating_sub(1);
    }

    pub fn total(&self) -> u64 {
        self.0.values().map(|count| u64::from(*count)).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ReactionKind, u32)> + '_ {
        ReactionKind::ALL
            .into_iter()
            .map(move |kind| (kind, self.count(kind)))
    }
}

impl PartialEq for Reactions {
    fn eq(&self, other: &Self) -> bool {
        ReactionKind::ALL
            .into_iter()
            .all(|kind| self.count(kind) == other.count(kind))
    }
}

impl Eq for Reactions {}

impl<const N: usize> From<[(ReactionKind, u32); N]> for Reactions {
    fn from(entries: [(ReactionKind, u32); N]) -> Self {
        Reactions(entries.into_iter().collect())
    }
}

impl Serialize for Reactions {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let map: BTreeMap<&str, u32> = self
            .0
            .iter()
            .map(|(kind, count)| (kind.as_str(), *count))
            .collect();
        map.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Reactions {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, i64>::deserialize(deserializer)?;
        let counts = raw
            .into_iter()
            .filter_map(|(key, count)| {
                let kind = key.parse::<ReactionKind>().ok()?;
                Some((kind, count.clamp(0, i64::from(u32::MAX)) as u32))
            })
            .collect();
        Ok(Reactions(counts))
    }
}

pub const MOODS: [(&str, &str); 8] = [
    ("lonely", "🌧️"),
    ("healing", "🌱"),
    ("angry", "🌪️"),
    ("grateful", "🙏"),
    ("anxious", "😰"),
    ("numb", "🌫️"),
    ("thoughtful", "🤔"),
    ("sad", "😢"),
];

pub fn mood_label(mood: &str) -> String {
    match MOODS.iter().find(|(name, _)| *name == mood) {
        Some((name, emoji)) => format!("{emoji} {name}"),
        None => mood.to_string(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl UserSummary {
    pub fn avatar_url(&self) -> String {
        avatar_or_placeholder(self.avatar.as_deref(), &self.username)
    }

    pub fn display_label(&self) -> &str {
        if self.display_name.trim().is_empty() {
            &self.username
        } else {
            &self.display_name
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub followers_count: u32,
    #[serde(default)]
    pub following_count: u32,
    #[serde(default)]
    pub posts_count: u32,
}

impl UserProfile {
    pub fn avatar_url(&self) -> String {
        avatar_or_placeholder(self.avatar.as_deref(), &self.username)
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id.clone(),
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    #[serde(default)]
    pub author_id: String,
    #[serde(default)]
    pub author: Option<UserSummary>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub comments_enabled: bool,
    #[serde(default)]
    pub comments_count: u32,
    #[serde(default)]
    pub reactions: Reactions,
    #[serde(default, deserialize_with = "known_reaction")]
    pub user_reaction: Option<ReactionKind>,
    #[serde(default)]
    pub is_saved: bool,
    #[serde(default)]
    pub is_anonymous: bool,
}

fn default_true() -> bool {
    true
}

/// A held reaction of a kind the client does not know reads as none.
fn known_reaction<'de, D>(deserializer: D) -> Result<Option<ReactionKind>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|key| key.parse().ok()))
}

impl Post {
    pub fn author_label(&self) -> String {
        if self.is_anonymous {
            return "anonymous".to_string();
        }
        self.author
            .as_ref()
            .map(|author| author.display_label().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    #[serde(default)]
    pub post_id: String,
    #[serde(default)]
    pub author_id: String,
    #[serde(default)]
    pub author: Option<UserSummary>,
    pub text: String,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoryContent {
    Image(String),
    Video(String),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    pub user: Option<UserSummary>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub content: StoryContent,
}

impl<'de> Deserialize<'de> for Story {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct StoryHelper {
            id: String,
            #[serde(default)]
            user: Option<UserSummary>,
            #[serde(with = "timestamp")]
            created_at: DateTime<Utc>,
            #[serde(default)]
            text: Option<String>,
            #[serde(default)]
            image_url: Option<String>,
            #[serde(default)]
            video_url: Option<String>,
        }

        let helper = StoryHelper::deserialize(deserializer)?;
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        let content = if let Some(url) = non_empty(helper.image_url) {
            StoryContent::Image(url)
        } else if let Some(url) = non_empty(helper.video_url) {
            StoryContent::Video(url)
        } else {
            StoryContent::Text(helper.text.unwrap_or_default())
        };
        Ok(Story {
            id: helper.id,
            user: helper.user,
            created_at: helper.created_at,
            content,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reel {
    pub id: String,
    #[serde(default)]
    pub author_id: String,
    #[serde(default)]
    pub author: Option<UserSummary>,
    pub video_url: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub music: Option<String>,
    #[serde(default)]
    pub likes_count: u32,
    #[serde(default)]
    pub comments_count: u32,
    #[serde(default)]
    pub views_count: u32,
    #[serde(default)]
    pub is_liked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub user: UserSummary,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default, with = "timestamp::option")]
    pub last_message_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_count: u32,
}

impl Conversation {
    pub fn peer_id(&self) -> &str {
        &self.user.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    #[serde(default, alias = "content")]
    pub text: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, rename = "isRead", alias = "seen")]
    pub seen: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationKind {
    Reaction,
    Comment,
    Follow,
    Other,
}

impl From<String> for NotificationKind {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "like" | "reaction" => NotificationKind::Reaction,
            "comment" => NotificationKind::Comment,
            "follow" => NotificationKind::Follow,
            _ => NotificationKind::Other,
        }
    }
}

impl From<NotificationKind> for String {
    fn from(kind: NotificationKind) -> Self {
        match kind {
            NotificationKind::Reaction => "reaction",
            NotificationKind::Comment => "comment",
            NotificationKind::Follow => "follow",
            NotificationKind::Other => "other",
        }
        .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(default, alias = "fromUser")]
    pub actor: Option<UserSummary>,
    #[serde(default)]
    pub post_id: Option<String>,
    #[serde(default, alias = "postImageUrl")]
    pub post_image: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, rename = "isRead", alias = "read")]
    pub read: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDraft {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    pub comments_enabled: bool,
    pub is_anonymous: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryDraft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDraft {
    pub receiver_id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_private: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub username: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub user: UserProfile,
    pub token: String,
}

pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Accepts RFC 3339 and offset-less ISO-8601, the latter read as UTC.
    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive))
    }

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp {raw:?}")))
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(value) => serializer.serialize_str(&value.to_rfc3339()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw = Option::<String>::deserialize(deserializer)?;
            match raw {
                None => Ok(None),
                Some(raw) => super::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp {raw:?}"))),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    pub fn post(id: &str) -> Post {
        Post {
            id: id.to_string(),
            author_id: "u1".into(),
            author: Some(UserSummary {
                id: "u1".into(),
                username: "quiet".into(),
                display_name: "Quiet One".into(),
                avatar: None,
            }),
            text: format!("post {id}"),
            image_url: None,
            mood: None,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            comments_enabled: true,
            comments_count: 0,
            reactions: Reactions::from([
                (ReactionKind::BlackHeart, 0),
                (ReactionKind::WhiteHeart, 0),
                (ReactionKind::Hug, 0),
                (ReactionKind::Moon, 0),
            ]),
            user_reaction: None,
            is_saved: false,
            is_anonymous: false,
        }
    }

    pub fn comment(id: &str, post_id: &str, text: &str) -> Comment {
        Comment {
            id: id.to_string(),
            post_id: post_id.to_string(),
            author_id: "u2".into(),
            author: None,
            text: text.to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap(),
        }
    }

    pub fn profile(id: &str) -> UserProfile {
        UserProfile {
            id: id.to_string(),
            username: format!("user_{id}"),
            display_name: format!("User {id}"),
            followers_count: 3,
            following_count: 1,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn post_decodes_camel_case_payload() {
        let raw = json!({
            "id": "p1",
            "authorId": "u1",
            "text": "it is late",
            "mood": "numb",
            "createdAt": "2024-05-01T12:00:00.123456",
            "commentsCount": 2,
            "reactions": {"black_heart": 1, "white_heart": 0, "hug": 0, "moon": 3, "sparkle": 9},
            "userReaction": "moon",
            "isSaved": true,
            "author": null
        });
        let post: Post = serde_json::from_value(raw).unwrap();
        assert_eq!(post.reactions.count(ReactionKind::Moon), 3);
        assert_eq!(post.reactions.total(), 4);
        assert_eq!(post.user_reaction, Some(ReactionKind::Moon));
        assert!(post.comments_enabled);
        assert!(post.is_saved);
        assert_eq!(post.author_label(), "unknown");
    }

    #[test]
    fn unknown_user_reaction_does_not_break_the_page() {
        let raw = json!([
            {"id": "p1", "createdAt": "2024-05-01T12:00:00Z", "userReaction": null},
            {"id": "p2", "createdAt": "2024-05-01T12:00:00Z", "userReaction": "like"},
            {"id": "p3", "createdAt": "2024-05-01T12:00:00Z", "userReaction": "hug"}
        ]);
        let posts: Vec<Post> = serde_json::from_value(raw).unwrap();
        assert_eq!(posts.len(), 3);
        assert_eq!(posts[0].user_reaction, None);
        assert_eq!(posts[1].user_reaction, None);
        assert_eq!(posts[2].user_reaction, Some(ReactionKind::Hug));
    }

    #[test]
    fn anonymous_posts_hide_author() {
        let mut post = fixtures::post("p1");
        post.is_anonymous = true;
        assert_eq!(post.author_label(), "anonymous");
    }

    #[test]
    fn reactions_compare_missing_as_zero() {
        let sparse = Reactions::from([(ReactionKind::Moon, 0)]);
        assert_eq!(sparse, Reactions::default());
    }

    #[test]
    fn story_content_prefers_image_then_video() {
        let story: Story = serde_json::from_value(json!({
            "id": "s1",
            "createdAt": "2024-05-01T12:00:00+00:00",
            "text": "hello",
            "videoUrl": "https://cdn/v.mp4"
        }))
        .unwrap();
        assert_eq!(story.content, StoryContent::Video("https://cdn/v.mp4".into()));

        let story: Story = serde_json::from_value(json!({
            "id": "s2",
            "createdAt": "2024-05-01T12:00:00Z",
            "text": "only words"
        }))
        .unwrap();
        assert_eq!(story.content, StoryContent::Text("only words".into()));
    }

    #[test]
    fn notification_kind_maps_wire_values() {
        let note: Notification = serde_json::from_value(json!({
            "id": "n1",
            "type": "like",
            "fromUser": {"id": "u3", "username": "moth"},
            "postId": "p1",
            "text": "moth felt this",
            "createdAt": "2024-05-01T12:00:00Z"
        }))
        .unwrap();
        assert_eq!(note.kind, NotificationKind::Reaction);
        assert_eq!(note.actor.unwrap().username, "moth");
        assert!(!note.read);
    }

    #[test]
    fn avatar_falls_back_to_placeholder() {
        let user = UserSummary {
            username: "night owl".into(),
            avatar: Some(" ".into()),
            ..Default::default()
        };
        assert_eq!(
            user.avatar_url(),
            "https://api.dicebear.com/7.x/avataaars/svg?seed=night%20owl"
        );
    }

    #[test]
    fn reaction_kind_parses_labels() {
        assert_eq!("calm".parse::<ReactionKind>().unwrap(), ReactionKind::Moon);
        assert_eq!("HUG".parse::<ReactionKind>().unwrap(), ReactionKind::Hug);
        assert!("sparkle".parse::<ReactionKind>().is_err());
    }
}
