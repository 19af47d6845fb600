use anyhow::{Context, Result};

use crate::data::Services;
use crate::feed::PostList;
use crate::models::UserProfile;

/// A loaded profile page: the user, the viewer's follow state and their posts.
#[derive(Debug, Clone)]
pub struct ProfileView {
    pub user: UserProfile,
    pub is_following: bool,
    pub is_own: bool,
    pub posts: PostList,
}

impl ProfileView {
    pub fn load(services: &Services, user_id: &str, viewer_id: Option<&str>) -> Result<Self> {
        let user = services
            .social
            .load_user(user_id)
            .with_context(|| format!("profile: load user {user_id}"))?;
        let is_own = viewer_id == Some(user.id.as_str());
        let is_following = if is_own {
            false
        } else {
            services.social.is_following(&user.id)?
        };
        let posts = services.social.load_user_posts(&user.id)?;
        Ok(Self {
            user,
            is_following,
            is_own,
            posts: PostList::new(posts),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MockBackend;
    use crate::models::fixtures;
    use std::sync::Arc;

    #[test]
    fn own_profile_skips_follow_lookup() {
        let backend = Arc::new(MockBackend::new(fixtures::profile("me")));
        let services = Services::from_backend(backend.clone());
        let view = ProfileView::load(&services, "me", Some("me")).unwrap();
        assert!(view.is_own);
        assert_eq!(backend.call_count("is_following"), 0);
    }

    #[test]
    fn other_profile_reads_follow_state() {
        let backend = Arc::new(
            MockBackend::new(fixtures::profile("me")).with_users(vec![fixtures::profile("u2")]),
        );
        let services = Services::from_backend(backend.clone());
        services.social.follow("u2").unwrap();
        let view = ProfileView::load(&services, "u2", Some("me")).unwrap();
        assert!(!view.is_own);
        assert!(view.is_following);
        assert_eq!(view.user.username, "user_u2");
    }
}
