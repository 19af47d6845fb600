/// Failures reported by the backend or the transport underneath it.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("api: unauthorized")]
    Unauthorized,
    #[error("api: error {status}: {detail}")]
    Status { status: u16, detail: String },
}

impl ApiError {
    pub fn is_unauthorized(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<ApiError>(), Some(ApiError::Unauthorized))
    }
}

/// Input rejected locally, before any request is issued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("post cannot be empty")]
    EmptyPost,
    #[error("comment cannot be empty")]
    EmptyComment,
    #[error("comments are turned off for this post")]
    CommentsDisabled,
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("file size must be less than {max_bytes} bytes (got {size_bytes})")]
    ImageTooLarge { size_bytes: u64, max_bytes: u64 },
    #[error("email and password are required")]
    MissingCredentials,
    #[error("password must be at least {min} characters")]
    WeakPassword { min: usize },
    #[error("unknown reaction {0:?}")]
    UnknownReaction(String),
}

impl ValidationError {
    pub fn is_validation(err: &anyhow::Error) -> bool {
        err.downcast_ref::<ValidationError>().is_some()
    }
}
