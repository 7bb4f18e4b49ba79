use thiserror::Error;

use super::BoxFuture;
use crate::request::PermissionLevel;

/// Host responses split into the two classes the orchestrator cares
/// about: retryable (rate limit, upstream failure, transport) and
/// terminal (auth, bad request, denied).
#[derive(Debug, Error)]
pub enum ScmError {
    #[error("scm rate limited: {0}")]
    RateLimited(String),
    #[error("scm upstream error: {0}")]
    Upstream(String),
    #[error("scm transport error: {0}")]
    Transport(String),
    #[error("scm unauthorized: {0}")]
    Unauthorized(String),
    #[error("scm bad request: {0}")]
    BadRequest(String),
    #[error("scm access denied: {0}")]
    Denied(String),
}

impl ScmError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Upstream(_) | Self::Transport(_)
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrantReceipt {
    /// True when the host reports the identical permission was already
    /// held; a repeat grant is a success, not an error.
    pub already_held: bool,
    pub provider_response: Option<String>,
}

pub trait ScmHost: Send + Sync {
    fn user_exists(&self, username: &str) -> BoxFuture<'_, Result<bool, ScmError>>;

    fn repository_exists(&self, repository: &str) -> BoxFuture<'_, Result<bool, ScmError>>;

    fn grant_permission(
        &self,
        username: &str,
        repository: &str,
        level: PermissionLevel,
    ) -> BoxFuture<'_, Result<GrantReceipt, ScmError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classes() {
        assert!(ScmError::RateLimited("429".into()).is_retryable());
        assert!(ScmError::Upstream("503".into()).is_retryable());
        assert!(ScmError::Transport("timeout".into()).is_retryable());
        assert!(!ScmError::Unauthorized("401".into()).is_retryable());
        assert!(!ScmError::BadRequest("400".into()).is_retryable());
        assert!(!ScmError::Denied("403".into()).is_retryable());
    }
}
