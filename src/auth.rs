use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::api;
use crate::error::{ApiError, ValidationError};
use crate::models::{SignupRequest, UserProfile};
use crate::notice::{self, Notice, NoticeSink};
use crate::session;

pub const MIN_PASSWORD_LEN: usize = 6;

/// Signs users in and out, keeping the session store in step with the backend.
pub struct Flow {
    client: Arc<api::Client>,
    session: Arc<session::Manager>,
    notices: Arc<dyn NoticeSink>,
}

impl Flow {
    pub fn new(
        client: Arc<api::Client>,
        session: Arc<session::Manager>,
        notices: Arc<dyn NoticeSink>,
    ) -> Self {
        Self {
            client,
            session,
            notices,
        }
    }

    pub fn login(&self, email: &str, password: &str) -> Result<UserProfile> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(self.reject(ValidationError::MissingCredentials));
        }
        let auth = match self.client.login(email, password) {
            Ok(auth) => auth,
            Err(err) => {
                self.notices.notify(Notice::error(failure_detail(&err, "login failed")));
                return Err(err);
            }
        };
        self.session
            .sign_in(auth.token, auth.user.clone())
            .context("auth: store session")?;
        self.notices.notify(Notice::success("welcome back"));
        Ok(auth.user)
    }

    pub fn signup(&self, request: &SignupRequest) -> Result<UserProfile> {
        if request.email.trim().is_empty() || request.password.is_empty() {
            return Err(self.reject(ValidationError::MissingCredentials));
        }
        if request.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(self.reject(ValidationError::WeakPassword {
                min: MIN_PASSWORD_LEN,
            }));
        }
        let auth = match self.client.signup(request) {
            Ok(auth) => auth,
            Err(err) => {
                self.notices.notify(Notice::error(failure_detail(&err, "signup failed")));
                return Err(err);
            }
        };
        self.session
            .sign_in(auth.token, auth.user.clone())
            .context("auth: store session")?;
        self.notices.notify(Notice::success("welcome to unsaid"));
        Ok(auth.user)
    }

    /// Confirms a stored token with the backend and refreshes the cached user.
    /// A rejected token leaves the client signed out.
    pub fn restore(&self) -> Result<Option<UserProfile>> {
        if !self.session.is_signed_in() {
            return Ok(None);
        }
        match self.client.me() {
            Ok(user) => {
                self.session.refresh_user(user.clone())?;
                debug!(username = %user.username, "auth: session confirmed");
                Ok(Some(user))
            }
            Err(err) if ApiError::is_unauthorized(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn logout(&self) -> Result<()> {
        self.session.sign_out()?;
        info!("auth: logged out");
        self.notices.notify(Notice::success("logged out successfully"));
        Ok(())
    }

    fn reject(&self, err: ValidationError) -> anyhow::Error {
        notice::reject(self.notices.as_ref(), err)
    }
}

fn failure_detail(err: &anyhow::Error, fallback: &str) -> String {
    match err.downcast_ref::<ApiError>() {
        Some(ApiError::Status { detail, .. }) if !detail.is_empty() => detail.clone(),
        _ => fallback.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures;
    use crate::notice::{ChannelSink, Level};
    use crate::storage;

    fn flow() -> (Flow, Arc<session::Manager>, Arc<ChannelSink>) {
        let store = Arc::new(storage::Store::open_in_memory().unwrap());
        let session = Arc::new(session::Manager::new(store).unwrap());
        let policy = Arc::new(session::SessionPolicy::new(session.clone()));
        let client = Arc::new(
            api::Client::new(
                policy,
                api::ClientConfig {
                    base_url: "http://127.0.0.1:9/api".into(),
                    user_agent: "unsaid-test".into(),
                    ..Default::default()
                },
            )
            .unwrap(),
        );
        let sink = Arc::new(ChannelSink::new());
        (Flow::new(client, session.clone(), sink.clone()), session, sink)
    }

    #[test]
    fn short_password_rejected_locally() {
        let (flow, session, sink) = flow();
        let request = SignupRequest {
            email: "a@b.c".into(),
            password: "12345".into(),
            username: "a".into(),
            display_name: "A".into(),
        };
        let err = flow.signup(&request).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ValidationError>(),
            Some(&ValidationError::WeakPassword { min: 6 })
        );
        assert!(!session.is_signed_in());
        assert_eq!(
            sink.drain(),
            vec![Notice::warning("password must be at least 6 characters")]
        );
    }

    #[test]
    fn missing_credentials_rejected_locally() {
        let (flow, _, sink) = flow();
        assert!(ValidationError::is_validation(&flow.login(" ", "pw").unwrap_err()));
        let notices = sink.drain();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, Level::Warning);
        assert_eq!(notices[0].message, "email and password are required");
    }

    #[test]
    fn restore_without_session_is_none() {
        let (flow, _, _) = flow();
        assert!(flow.restore().unwrap().is_none());
    }

    #[test]
    fn logout_clears_session() {
        let (flow, session, sink) = flow();
        session.sign_in("tok".into(), fixtures::profile("me")).unwrap();
        flow.logout().unwrap();
        assert!(!session.is_signed_in());
        assert_eq!(sink.drain(), vec![Notice::success("logged out successfully")]);
    }

    #[test]
    fn failure_detail_prefers_backend_text() {
        let err: anyhow::Error = ApiError::Status {
            status: 400,
            detail: "Email already registered".into(),
        }
        .into();
        assert_eq!(failure_detail(&err, "signup failed"), "Email already registered");
        assert_eq!(
            failure_detail(&anyhow::anyhow!("offline"), "signup failed"),
            "signup failed"
        );
    }
}
