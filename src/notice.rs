use std::fmt;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{error, info, warn};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Warning,
    Error,
}

/// A short user-facing message about the outcome of an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: Level,
    pub message: String,
}

impl Notice {
    pub fn info<S: Into<String>>(message: S) -> Self {
        Self {
            level: Level::Info,
            message: message.into(),
        }
    }

    pub fn success<S: Into<String>>(message: S) -> Self {
        Self {
            level: Level::Success,
            message: message.into(),
        }
    }

    pub fn warning<S: Into<String>>(message: S) -> Self {
        Self {
            level: Level::Warning,
            message: message.into(),
        }
    }

    pub fn error<S: Into<String>>(message: S) -> Self {
        Self {
            level: Level::Error,
            message: message.into(),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.level {
            Level::Info => "·",
            Level::Success => "✓",
            Level::Warning => "!",
            Level::Error => "✗",
        };
        write!(f, "{} {}", tag, self.message)
    }
}

pub trait NoticeSink: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Raises a warning for input rejected locally and hands the error back.
pub fn reject(sink: &dyn NoticeSink, err: ValidationError) -> anyhow::Error {
    sink.notify(Notice::warning(err.to_string()));
    err.into()
}

fn trace_notice(notice: &Notice) {
    match notice.level {
        Level::Info | Level::Success => info!(text = %notice.message, "notice"),
        Level::Warning => warn!(text = %notice.message, "notice"),
        Level::Error => error!(text = %notice.message, "notice"),
    }
}

/// Prints notices to stderr so they never mix with listing output.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl NoticeSink for ConsoleSink {
    fn notify(&self, notice: Notice) {
        trace_notice(&notice);
        eprintln!("{notice}");
    }
}

/// Queues notices for an owner that drains them on its own schedule.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<Notice>,
    rx: Receiver<Notice>,
}

impl Default for ChannelSink {
    fn default() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }
}

impl ChannelSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<Notice> {
        self.rx.try_iter().collect()
    }
}

impl NoticeSink for ChannelSink {
    fn notify(&self, notice: Notice) {
        trace_notice(&notice);
        let _ = self.tx.send(notice);
    }
}
