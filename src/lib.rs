#![allow(clippy::uninlined_format_args)]

pub mod api;
pub mod app;
pub mod auth;
pub mod comments;
pub mod config;
pub mod data;
pub mod dispatch;
pub mod error;
pub mod feed;
pub mod messages;
pub mod models;
pub mod mutation;
pub mod notice;
pub mod notifications;
pub mod profile;
pub mod render;
pub mod session;
pub mod storage;
pub mod story;
pub mod timeline;
pub mod upload;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "UNSAID_LOG";
