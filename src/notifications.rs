use std::str::FromStr;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::data::Services;
use crate::models::{Notification, NotificationKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Filter {
    #[default]
    All,
    Follows,
    Activity,
}

impl Filter {
    pub fn matches(&self, notification: &Notification) -> bool {
        match self {
            Filter::All => true,
            Filter::Follows => notification.kind == NotificationKind::Follow,
            Filter::Activity => matches!(
                notification.kind,
                NotificationKind::Reaction | NotificationKind::Comment
            ),
        }
    }
}

impl FromStr for Filter {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "all" | "" => Ok(Filter::All),
            "follows" | "follow" => Ok(Filter::Follows),
            "activity" | "reactions" | "comments" => Ok(Filter::Activity),
            other => bail!("unknown notification filter {other:?}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NotificationList {
    items: Vec<Notification>,
}

impl NotificationList {
    pub fn load(services: &Services) -> Result<Self> {
        let items = services
            .notifications
            .load_notifications()
            .context("notifications: load")?;
        Ok(Self { items })
    }

    pub fn iter(&self, filter: Filter) -> impl Iterator<Item = &Notification> + '_ {
        self.items.iter().filter(move |n| filter.matches(n))
    }

    pub fn unread(&self) -> usize {
        self.items.iter().filter(|n| !n.read).count()
    }

    /// Marks everything read on the backend, then locally.
    pub fn mark_all_read(&mut self, services: &Services) -> Result<()> {
        services
            .notifications
            .mark_all_read()
            .context("notifications: mark read")?;
        let cleared = self.unread();
        for item in self.items.iter_mut() {
            item.read = true;
        }
        info!(cleared, "notifications: marked read");
        Ok(())
    }
}
