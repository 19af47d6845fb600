use std::sync::Arc;

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::api::RequestPolicy;
use crate::models::UserProfile;
use crate::storage;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not signed in")]
    NotSignedIn,
}

/// Session transitions published to whoever owns navigation.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SignedIn(UserProfile),
    SignedOut,
}

#[derive(Debug, Clone, Default)]
struct Active {
    token: Option<String>,
    user: Option<UserProfile>,
}

/// Owns the bearer token and the last-known user, mirrored into the store.
pub struct Manager {
    store: Arc<storage::Store>,
    active: RwLock<Active>,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
}

impl Manager {
    pub fn new(store: Arc<storage::Store>) -> Result<Self> {
        let (events_tx, events_rx) = unbounded();
        let manager = Self {
            store,
            active: RwLock::new(Active::default()),
            events_tx,
            events_rx,
        };
        manager.load_existing()?;
        Ok(manager)
    }

    fn load_existing(&self) -> Result<()> {
        if let Some(stored) = self.store.load_session().context("session: load stored")? {
            debug!(user = ?stored.user.as_ref().map(|u| &u.username), "session: restored");
            *self.active.write() = Active {
                token: Some(stored.token),
                user: stored.user,
            };
        }
        Ok(())
    }

    pub fn events(&self) -> Receiver<SessionEvent> {
        self.events_rx.clone()
    }

    pub fn token(&self) -> Option<String> {
        self.active.read().token.clone()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.active.read().user.clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.active.read().token.is_some()
    }

    pub fn require_user(&self) -> Result<UserProfile> {
        self.user().ok_or_else(|| SessionError::NotSignedIn.into())
    }

    pub fn sign_in(&self, token: String, user: UserProfile) -> Result<()> {
        self.store
            .save_session(&token, Some(&user))
            .context("session: persist sign-in")?;
        *self.active.write() = Active {
            token: Some(token),
            user: Some(user.clone()),
        };
        info!(username = %user.username, "session: signed in");
        let _ = self.events_tx.send(SessionEvent::SignedIn(user));
        Ok(())
    }

    pub fn refresh_user(&self, user: UserProfile) -> Result<()> {
        if !self.is_signed_in() {
            return Ok(());
        }
        self.store
            .update_session_user(&user)
            .context("session: persist user")?;
        self.active.write().user = Some(user);
        Ok(())
    }

    pub fn sign_out(&self) -> Result<()> {
        self.clear();
        self.store.clear_session().context("session: clear stored")
    }

    fn clear(&self) {
        let had_session = {
            let mut active = self.active.write();
            let had = active.token.is_some();
            *active = Active::default();
            had
        };
        if had_session {
            info!("session: signed out");
        }
        let _ = self.events_tx.send(SessionEvent::SignedOut);
    }
}

/// Request policy backed by the session: attaches the bearer token and drops
/// the whole session when the backend answers 401.
pub struct SessionPolicy {
    manager: Arc<Manager>,
}

impl SessionPolicy {
    pub fn new(manager: Arc<Manager>) -> Self {
        Self { manager }
    }
}

impl RequestPolicy for SessionPolicy {
    fn bearer_token(&self) -> Option<String> {
        self.manager.token()
    }

    fn on_unauthorized(&self) {
        warn!("session: backend rejected credentials");
        if let Err(err) = self.manager.sign_out() {
            warn!(error = %err, "session: failed to clear stored session");
        }
    }
}
