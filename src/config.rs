use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "UNSAID";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub comments: CommentsConfig,
    #[serde(default)]
    pub reactions: ReactionsConfig,
    #[serde(default)]
    pub stories: StoriesConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8001/api/".to_string()
}

fn default_user_agent() -> String {
    format!("unsaid/{}", crate::VERSION)
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

fn default_page_size() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CommentsConfig {
    #[serde(default)]
    pub cache_threads: bool,
}

/// What happens to an optimistic reaction when the request fails.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReactionFailure {
    /// Keep the local counts; they drift until the next reload.
    #[default]
    Keep,
    /// Restore the counts captured before the request.
    Rollback,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ReactionsConfig {
    #[serde(default)]
    pub on_failure: ReactionFailure,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoriesConfig {
    #[serde(default = "default_story_duration", with = "humantime_serde")]
    pub duration: Duration,
    #[serde(default = "default_story_tick", with = "humantime_serde")]
    pub tick: Duration,
}

impl Default for StoriesConfig {
    fn default() -> Self {
        Self {
            duration: default_story_duration(),
            tick: default_story_tick(),
        }
    }
}

fn default_story_duration() -> Duration {
    Duration::from_millis(5000)
}

fn default_story_tick() -> Duration {
    Duration::from_millis(100)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadConfig {
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: default_max_image_bytes(),
        }
    }
}

fn default_max_image_bytes() -> u64 {
    10 * 1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.api.base_url.is_empty() {
        base.api.base_url = other.api.base_url;
    }
    if !other.api.user_agent.is_empty() {
        base.api.user_agent = other.api.user_agent;
    }
    if !other.api.timeout.is_zero() {
        base.api.timeout = other.api.timeout;
    }

    if other.feed.page_size != 0 {
        base.feed.page_size = other.feed.page_size;
    }
    base.comments.cache_threads = other.comments.cache_threads;
    base.reactions.on_failure = other.reactions.on_failure;

    if !other.stories.duration.is_zero() {
        base.stories.duration = other.stories.duration;
    }
    if !other.stories.tick.is_zero() {
        base.stories.tick = other.stories.tick;
    }

    if other.upload.max_image_bytes != 0 {
        base.upload.max_image_bytes = other.upload.max_image_bytes;
    }
    if other.storage.path.is_some() {
        base.storage.path = other.storage.path;
    }

    base
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(cfg, &key, value);
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "api.base_url" => cfg.api.base_url = value,
        "api.user_agent" => cfg.api.user_agent = value,
        "api.timeout" => {
            if let Some(duration) = nonzero_duration(&value) {
                cfg.api.timeout = duration;
            }
        }
        "feed.page_size" => {
            if let Ok(parsed) = value.parse::<usize>() {
                if parsed > 0 {
                    cfg.feed.page_size = parsed;
                }
            }
        }
        "comments.cache_threads" => cfg.comments.cache_threads = env_truthy(&value),
        "reactions.on_failure" => {
            cfg.reactions.on_failure = match value.to_ascii_lowercase().as_str() {
                "rollback" => ReactionFailure::Rollback,
                _ => ReactionFailure::Keep,
            };
        }
        "stories.duration" => {
            if let Some(duration) = nonzero_duration(&value) {
                cfg.stories.duration = duration;
            }
        }
        "stories.tick" => {
            if let Some(duration) = nonzero_duration(&value) {
                cfg.stories.tick = duration;
            }
        }
        "upload.max_image_bytes" => {
            if let Ok(parsed) = value.parse::<u64>() {
                cfg.upload.max_image_bytes = parsed;
            }
        }
        "storage.path" => cfg.storage.path = Some(PathBuf::from(value)),
        _ => {}
    }
}

fn nonzero_duration(value: &str) -> Option<Duration> {
    humantime::parse_duration(value)
        .ok()
        .filter(|duration| !duration.is_zero())
}

fn env_truthy(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "True" | "yes")
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("unsaid").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_defaults_without_files() {
        let dir = tempdir().unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(dir.path().join("missing.yaml")),
            env_prefix: Some("UNSAID_TEST_DEFAULTS".into()),
        })
        .unwrap();
        assert_eq!(cfg.feed.page_size, 10);
        assert_eq!(cfg.stories.duration, Duration::from_millis(5000));
        assert_eq!(cfg.stories.tick, Duration::from_millis(100));
        assert_eq!(cfg.upload.max_image_bytes, 10 * 1024 * 1024);
        assert_eq!(cfg.reactions.on_failure, ReactionFailure::Keep);
        assert!(!cfg.comments.cache_threads);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "api:\n  base_url: https://unsaid.example/api/\nfeed:\n  page_size: 20\nstories:\n  duration: 3s\nreactions:\n  on_failure: rollback\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("UNSAID_TEST_FILE".into()),
        })
        .unwrap();
        assert_eq!(cfg.api.base_url, "https://unsaid.example/api/");
        assert_eq!(cfg.feed.page_size, 20);
        assert_eq!(cfg.stories.duration, Duration::from_secs(3));
        assert_eq!(cfg.stories.tick, Duration::from_millis(100));
        assert_eq!(cfg.reactions.on_failure, ReactionFailure::Rollback);
    }

    #[test]
    fn env_overrides() {
        env::set_var("UNSAID_TEST_ENV_FEED__PAGE_SIZE", "25");
        env::set_var("UNSAID_TEST_ENV_COMMENTS__CACHE_THREADS", "true");
        let dir = tempdir().unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(dir.path().join("missing.yaml")),
            env_prefix: Some("UNSAID_TEST_ENV".into()),
        })
        .unwrap();
        assert_eq!(cfg.feed.page_size, 25);
        assert!(cfg.comments.cache_threads);
        env::remove_var("UNSAID_TEST_ENV_FEED__PAGE_SIZE");
        env::remove_var("UNSAID_TEST_ENV_COMMENTS__CACHE_THREADS");
    }

    #[test]
    fn zero_durations_from_env_are_ignored() {
        env::set_var("UNSAID_TEST_ZERO_STORIES__TICK", "0ms");
        env::set_var("UNSAID_TEST_ZERO_STORIES__DURATION", "0s");
        env::set_var("UNSAID_TEST_ZERO_API__TIMEOUT", "0s");
        let dir = tempdir().unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(dir.path().join("missing.yaml")),
            env_prefix: Some("UNSAID_TEST_ZERO".into()),
        })
        .unwrap();
        assert_eq!(cfg.stories.tick, Duration::from_millis(100));
        assert_eq!(cfg.stories.duration, Duration::from_millis(5000));
        assert!(!cfg.api.timeout.is_zero());
        env::remove_var("UNSAID_TEST_ZERO_STORIES__TICK");
        env::remove_var("UNSAID_TEST_ZERO_STORIES__DURATION");
        env::remove_var("UNSAID_TEST_ZERO_API__TIMEOUT");
    }
}
