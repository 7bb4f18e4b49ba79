use std::sync::Arc;
use std::time::Duration;

use grantpipe_domain::extract::TicketPayload;
use grantpipe_domain::ports::secrets::{SecretError, SecretStore};
use grantpipe_domain::ports::tickets::{TicketError, TicketSystem};
use grantpipe_domain::ports::BoxFuture;
use serde_json::{json, Value};

use crate::config::AppConfig;

/// Jira REST adapter. Write operations are projections of pipeline state;
/// the pipeline never reads ticket comments back as input.
#[derive(Clone)]
pub struct JiraClient {
    http: reqwest::Client,
    base_url: String,
    token_secret: String,
    secrets: Arc<dyn SecretStore>,
}

impl JiraClient {
    pub fn from_config(config: &AppConfig, secrets: Arc<dyn SecretStore>) -> Self {
        let timeout = Duration::from_millis(config.http_timeout_ms.max(1));
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: config.jira_base_url.trim_end_matches('/').to_string(),
            token_secret: config.jira_token_secret.clone(),
            secrets,
        }
    }

    async fn bearer_token(&self) -> Result<String, TicketError> {
        self.secrets
            .get_secret(&self.token_secret)
            .await
            .map_err(|err| match err {
                SecretError::NotFound(name) => {
                    TicketError::Operation(format!("credential {name} not configured"))
                }
                SecretError::Unavailable(message) => TicketError::Unavailable(message),
            })
    }

    async fn get_json(&self, url: &str) -> Result<Value, TicketError> {
        let token = self.bearer_token().await?;
        let response = self
            .http
            .get(url)
            .bearer_auth(&token)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|err| TicketError::Unavailable(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TicketError::Operation(format!(
                "status {}: {message}",
                status.as_u16()
            )));
        }
        response
            .json::<Value>()
            .await
            .map_err(|err| TicketError::Operation(err.to_string()))
    }

    async fn post_json(&self, url: &str, body: Value) -> Result<(), TicketError> {
        let token = self.bearer_token().await?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|err| TicketError::Unavailable(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TicketError::Operation(format!(
                "status {}: {message}",
                status.as_u16()
            )));
        }
        Ok(())
    }
}

pub(crate) fn ticket_payload_from_issue(issue: &Value) -> Result<TicketPayload, TicketError> {
    let ticket_id = issue
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| TicketError::Operation("issue without id".to_string()))?;
    let ticket_key = issue
        .get("key")
        .and_then(Value::as_str)
        .ok_or_else(|| TicketError::Operation("issue without key".to_string()))?;
    let fields = issue.get("fields").cloned().unwrap_or(Value::Null);
    let reporter = fields
        .pointer("/reporter/name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let description = fields
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(TicketPayload {
        ticket_id: ticket_id.to_string(),
        ticket_key: ticket_key.to_string(),
        reporter,
        description,
    })
}

pub(crate) fn find_transition_id(transitions: &Value, status: &str) -> Option<String> {
    transitions
        .get("transitions")
        .and_then(Value::as_array)?
        .iter()
        .find(|transition| {
            transition
                .get("name")
                .and_then(Value::as_str)
                .is_some_and(|name| name.eq_ignore_ascii_case(status))
        })
        .and_then(|transition| transition.get("id").and_then(Value::as_str))
        .map(str::to_string)
}

impl TicketSystem for JiraClient {
    fn get_ticket(&self, ticket_id: &str) -> BoxFuture<'_, Result<TicketPayload, TicketError>> {
        let url = format!(
            "{}/rest/api/2/issue/{ticket_id}?fields=description,reporter",
            self.base_url
        );
        Box::pin(async move {
            let issue = self.get_json(&url).await?;
            ticket_payload_from_issue(&issue)
        })
    }

    fn add_comment(&self, ticket_id: &str, body: &str) -> BoxFuture<'_, Result<(), TicketError>> {
        let url = format!("{}/rest/api/2/issue/{ticket_id}/comment", self.base_url);
        let body = json!({ "body": body });
        Box::pin(async move { self.post_json(&url, body).await })
    }

    fn set_status(&self, ticket_id: &str, status: &str) -> BoxFuture<'_, Result<(), TicketError>> {
        let transitions_url = format!(
            "{}/rest/api/2/issue/{ticket_id}/transitions",
            self.base_url
        );
        let status = status.to_string();
        Box::pin(async move {
            let transitions = self.get_json(&transitions_url).await?;
            let Some(transition_id) = find_transition_id(&transitions, &status) else {
                return Err(TicketError::Operation(format!(
                    "no transition to status '{status}'"
                )));
            };
            self.post_json(
                &transitions_url,
                json!({ "transition": { "id": transition_id } }),
            )
            .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_issue_fields() {
        let issue = json!({
            "id": "10001",
            "key": "ACCESS-1",
            "fields": {
                "reporter": { "name": "bob" },
                "description": "User: alice\nRepository: payments-api\nPermission: write"
            }
        });
        let payload = ticket_payload_from_issue(&issue).unwrap();
        assert_eq!(payload.ticket_id, "10001");
        assert_eq!(payload.ticket_key, "ACCESS-1");
        assert_eq!(payload.reporter, "bob");
        assert!(payload.description.contains("alice"));
    }

    #[test]
    fn picks_the_matching_transition_by_name() {
        let transitions = json!({
            "transitions": [
                { "id": "11", "name": "In Progress" },
                { "id": "31", "name": "Done" }
            ]
        });
        assert_eq!(find_transition_id(&transitions, "done"), Some("31".into()));
        assert_eq!(find_transition_id(&transitions, "Blocked"), None);
    }
}
