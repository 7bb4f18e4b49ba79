use std::sync::Arc;
use std::time::Duration;

use grantpipe_domain::ports::scm::{GrantReceipt, ScmError, ScmHost};
use grantpipe_domain::ports::secrets::{SecretError, SecretStore};
use grantpipe_domain::ports::BoxFuture;
use grantpipe_domain::request::PermissionLevel;
use reqwest::StatusCode;

use crate::config::AppConfig;

/// Bitbucket Server REST adapter. Classification only: retryable versus
/// terminal is decided here, the retry loop itself belongs to the
/// pipeline.
#[derive(Clone)]
pub struct BitbucketClient {
    http: reqwest::Client,
    base_url: String,
    project_key: String,
    token_secret: String,
    secrets: Arc<dyn SecretStore>,
}

/// Bitbucket permission name for an approved level. Exactly the requested
/// level, never a broader one.
pub fn repo_permission_name(level: PermissionLevel) -> &'static str {
    match level {
        PermissionLevel::Read => "REPO_READ",
        PermissionLevel::Write => "REPO_WRITE",
        PermissionLevel::Admin => "REPO_ADMIN",
    }
}

pub(crate) fn classify_status(status: StatusCode, message: String) -> ScmError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ScmError::RateLimited(message),
        StatusCode::UNAUTHORIZED => ScmError::Unauthorized(message),
        StatusCode::FORBIDDEN => ScmError::Denied(message),
        _ if status.is_server_error() => {
            ScmError::Upstream(format!("status {}: {message}", status.as_u16()))
        }
        _ => ScmError::BadRequest(format!("status {}: {message}", status.as_u16())),
    }
}

impl BitbucketClient {
    pub fn from_config(config: &AppConfig, secrets: Arc<dyn SecretStore>) -> Self {
        let timeout = Duration::from_millis(config.http_timeout_ms.max(1));
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: config.bitbucket_base_url.trim_end_matches('/').to_string(),
            project_key: config.bitbucket_project_key.clone(),
            token_secret: config.bitbucket_token_secret.clone(),
            secrets,
        }
    }

    async fn bearer_token(&self) -> Result<String, ScmError> {
        self.secrets
            .get_secret(&self.token_secret)
            .await
            .map_err(|err| match err {
                SecretError::NotFound(name) => {
                    ScmError::Unauthorized(format!("credential {name} not configured"))
                }
                SecretError::Unavailable(message) => ScmError::Transport(message),
            })
    }

    /// Existence probe: 200 is a positive fact, 404 a negative one.
    /// Anything else classifies as an error for the caller to retry or
    /// surface.
    async fn probe(&self, url: String) -> Result<bool, ScmError> {
        let token = self.bearer_token().await?;
        let response = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|err| ScmError::Transport(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if status == StatusCode::UNAUTHORIZED {
            self.secrets.invalidate(&self.token_secret).await;
        }
        let message = response.text().await.unwrap_or_default();
        Err(classify_status(status, message))
    }
}

impl ScmHost for BitbucketClient {
    fn user_exists(&self, username: &str) -> BoxFuture<'_, Result<bool, ScmError>> {
        let url = format!("{}/rest/api/1.0/users/{username}", self.base_url);
        Box::pin(async move { self.probe(url).await })
    }

    fn repository_exists(&self, repository: &str) -> BoxFuture<'_, Result<bool, ScmError>> {
        let url = format!(
            "{}/rest/api/1.0/projects/{}/repos/{repository}",
            self.base_url, self.project_key
        );
        Box::pin(async move { self.probe(url).await })
    }

    fn grant_permission(
        &self,
        username: &str,
        repository: &str,
        level: PermissionLevel,
    ) -> BoxFuture<'_, Result<GrantReceipt, ScmError>> {
        let url = format!(
            "{}/rest/api/1.0/projects/{}/repos/{repository}/permissions/users",
            self.base_url, self.project_key
        );
        let username = username.to_string();
        Box::pin(async move {
            let token = self.bearer_token().await?;
            // PUT is idempotent on the host side: repeating an identical
            // grant after a timed-out first call succeeds quietly.
            let response = self
                .http
                .put(&url)
                .bearer_auth(&token)
                .query(&[
                    ("name", username.as_str()),
                    ("permission", repo_permission_name(level)),
                ])
                .send()
                .await
                .map_err(|err| ScmError::Transport(err.to_string()))?;
            let status = response.status();
            if status.is_success() {
                return Ok(GrantReceipt {
                    already_held: false,
                    provider_response: Some(format!("status {}", status.as_u16())),
                });
            }
            if status == StatusCode::UNAUTHORIZED {
                self.secrets.invalidate(&self.token_secret).await;
            }
            let message = response.text().await.unwrap_or_default();
            Err(classify_status(status, message))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_names_map_exactly() {
        assert_eq!(repo_permission_name(PermissionLevel::Read), "REPO_READ");
        assert_eq!(repo_permission_name(PermissionLevel::Write), "REPO_WRITE");
        assert_eq!(repo_permission_name(PermissionLevel::Admin), "REPO_ADMIN");
    }

    #[test]
    fn rate_limit_and_server_errors_are_retryable() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_retryable());
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, String::new()).is_retryable());
        assert!(classify_status(StatusCode::INTERNAL_SERVER_ERROR, String::new()).is_retryable());
    }

    #[test]
    fn client_errors_are_terminal() {
        assert!(!classify_status(StatusCode::BAD_REQUEST, String::new()).is_retryable());
        assert!(!classify_status(StatusCode::UNAUTHORIZED, String::new()).is_retryable());
        assert!(!classify_status(StatusCode::FORBIDDEN, String::new()).is_retryable());
        assert!(!classify_status(StatusCode::CONFLICT, String::new()).is_retryable());
    }
}
