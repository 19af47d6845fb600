use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use crate::error::ApiError;
use crate::models::{
    AuthResponse, Comment, Conversation, LoginRequest, Message, MessageDraft, Notification, Post,
    PostDraft, ProfileUpdate, ReactionKind, Reel, SignupRequest, Story, StoryDraft, UserProfile,
};

/// Cross-cutting behavior applied to every request: where the bearer token
/// comes from and what an unauthorized response does to client state.
pub trait RequestPolicy: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
    fn on_unauthorized(&self);
}

/// Policy for requests made without a session (login, signup).
#[derive(Debug, Default)]
pub struct AnonymousPolicy;

impl RequestPolicy for AnonymousPolicy {
    fn bearer_token(&self) -> Option<String> {
        None
    }

    fn on_unauthorized(&self) {}
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveState {
    pub is_saved: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowState {
    #[serde(default)]
    pub is_following: Option<bool>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    image_url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Value,
}

pub struct Client {
    policy: Arc<dyn RequestPolicy>,
    http: HttpClient,
    user_agent: String,
    base_url: Url,
}

impl Client {
    pub fn new(policy: Arc<dyn RequestPolicy>, config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("api: client user agent required");
        }
        let mut base = config.base_url.trim().to_string();
        if base.is_empty() {
            bail!("api: base url required");
        }
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).with_context(|| format!("api: parse base url {base}"))?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()?,
        };

        Ok(Client {
            policy,
            http,
            user_agent: config.user_agent,
            base_url,
        })
    }

    pub fn login(&self, email: &str, password: &str) -> Result<AuthResponse> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        self.send_json(Method::POST, "auth/login", &[], Some(&body))
    }

    pub fn signup(&self, request: &SignupRequest) -> Result<AuthResponse> {
        self.send_json(Method::POST, "auth/signup", &[], Some(request))
    }

    pub fn me(&self) -> Result<UserProfile> {
        self.get("auth/me", &[])
    }

    pub fn feed(&self, skip: usize, limit: usize) -> Result<Vec<Post>> {
        let params = [
            ("skip".to_string(), skip.to_string()),
            ("limit".to_string(), limit.to_string()),
        ];
        self.get("feed", &params)
    }

    pub fn explore(&self) -> Result<Vec<Post>> {
        self.get("explore", &[])
    }

    pub fn saved_posts(&self) -> Result<Vec<Post>> {
        self.get("saved-posts", &[])
    }

    pub fn reels(&self) -> Result<Vec<Reel>> {
        self.get("reels", &[])
    }

    pub fn stories(&self) -> Result<Vec<Story>> {
        self.get("stories", &[])
    }

    pub fn create_story(&self, draft: &StoryDraft) -> Result<Story> {
        self.send_json(Method::POST, "stories", &[], Some(draft))
    }

    pub fn create_post(&self, draft: &PostDraft) -> Result<Post> {
        self.send_json(Method::POST, "posts", &[], Some(draft))
    }

    pub fn post(&self, post_id: &str) -> Result<Post> {
        self.get(&format!("posts/{}", segment(post_id)), &[])
    }

    pub fn delete_post(&self, post_id: &str) -> Result<()> {
        self.request::<()>(Method::DELETE, &format!("posts/{}", segment(post_id)), &[], None)?;
        Ok(())
    }

    pub fn comments(&self, post_id: &str) -> Result<Vec<Comment>> {
        self.get(&format!("posts/{}/comments", segment(post_id)), &[])
    }

    pub fn add_comment(&self, post_id: &str, text: &str) -> Result<Comment> {
        if text.trim().is_empty() {
            bail!("api: comment text is required");
        }
        self.send_json(
            Method::POST,
            &format!("posts/{}/comments", segment(post_id)),
            &[],
            Some(&json!({ "text": text })),
        )
    }

    pub fn react(&self, post_id: &str, kind: ReactionKind) -> Result<()> {
        self.request(
            Method::POST,
            &format!("posts/{}/react", segment(post_id)),
            &[],
            Some(&json!({ "reactionType": kind.as_str() })),
        )?;
        Ok(())
    }

    pub fn toggle_save(&self, post_id: &str) -> Result<SaveState> {
        self.send_json::<(), _>(
            Method::POST,
            &format!("posts/{}/save", segment(post_id)),
            &[],
            None,
        )
    }

    pub fn user(&self, user_id: &str) -> Result<UserProfile> {
        self.get(&format!("users/{}", segment(user_id)), &[])
    }

    pub fn user_posts(&self, user_id: &str) -> Result<Vec<Post>> {
        self.get(&format!("users/{}/posts", segment(user_id)), &[])
    }

    pub fn update_me(&self, update: &ProfileUpdate) -> Result<UserProfile> {
        self.send_json(Method::PUT, "users/me", &[], Some(update))
    }

    pub fn follow(&self, user_id: &str) -> Result<FollowState> {
        self.send_follow(&format!("users/{}/follow", segment(user_id)))
    }

    pub fn unfollow(&self, user_id: &str) -> Result<FollowState> {
        self.send_follow(&format!("users/{}/unfollow", segment(user_id)))
    }

    pub fn is_following(&self, user_id: &str) -> Result<bool> {
        let state: FollowState = self.get(&format!("users/{}/is-following", segment(user_id)), &[])?;
        Ok(state.is_following.unwrap_or(false))
    }

    pub fn search_users(&self, query: &str) -> Result<Vec<UserProfile>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        self.get(&format!("users/search/{}", segment(query.trim())), &[])
    }

    pub fn conversations(&self) -> Result<Vec<Conversation>> {
        self.get("conversations", &[])
    }

    pub fn messages(&self, user_id: &str) -> Result<Vec<Message>> {
        self.get(&format!("messages/{}", segment(user_id)), &[])
    }

    pub fn send_message(&self, draft: &MessageDraft) -> Result<Message> {
        self.send_json(Method::POST, "messages", &[], Some(draft))
    }

    pub fn notifications(&self) -> Result<Vec<Notification>> {
        self.get("notifications", &[])
    }

    pub fn mark_notifications_read(&self) -> Result<()> {
        self.request::<()>(Method::POST, "notifications/read", &[], None)?;
        Ok(())
    }

    /// Posts a `data:` URL and returns where the backend hosted the image.
    pub fn upload_image(&self, data_url: &str) -> Result<String> {
        let resp: UploadResponse = self.send_json(
            Method::POST,
            "upload/image",
            &[],
            Some(&json!({ "imageData": data_url })),
        )?;
        Ok(resp.image_url)
    }

    fn send_follow(&self, path: &str) -> Result<FollowState> {
        let resp = self.request::<()>(Method::POST, path, &[], None)?;
        let text = resp
            .text()
            .with_context(|| format!("api: read response for {path}"))?;
        if text.trim().is_empty() {
            return Ok(FollowState::default());
        }
        serde_json::from_str(&text).with_context(|| format!("api: decode response for {path}"))
    }

    fn get<T>(&self, path: &str, params: &[(String, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.send_json::<(), T>(Method::GET, path, params, None)
    }

    fn send_json<B, T>(
        &self,
        method: Method,
        path: &str,
        params: &[(String, String)],
        body: Option<&B>,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self.request(method, path, params, body)?;
        resp.json::<T>()
            .with_context(|| format!("api: decode response for {path}"))
    }

    fn request<B>(
        &self,
        method: Method,
        path: &str,
        params: &[(String, String)],
        body: Option<&B>,
    ) -> Result<Response>
    where
        B: Serialize + ?Sized,
    {
        let mut url = self.base_url.join(path.trim_start_matches('/'))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }

        debug!(%method, %url, "api: request");
        let mut req = self.http.request(method, url);
        req = req.header(USER_AGENT, self.user_agent.clone());
        if let Some(token) = self.policy.bearer_token() {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().with_context(|| format!("api: send {path}"))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::UNAUTHORIZED {
            self.policy.on_unauthorized();
            return Err(ApiError::Unauthorized.into());
        }
        let body = resp.text().unwrap_or_default();
        let detail = error_detail(&body);
        warn!(status = status.as_u16(), %detail, path, "api: request failed");
        Err(ApiError::Status {
            status: status.as_u16(),
            detail,
        }
        .into())
    }
}

fn segment(raw: &str) -> String {
    utf8_percent_encode(raw, NON_ALPHANUMERIC).to_string()
}

fn error_detail(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            detail: Value::String(detail),
        }) => detail,
        Ok(ErrorBody { detail }) if !detail.is_null() => detail.to_string(),
        _ => body.trim().to_string(),
    }
}
