use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::request::{AccessRequest, RequestStatus};
use crate::util::{correlation_suffix, now_ms, uuid_v7_without_dashes};

pub const FIELD_USER: &str = "user";
pub const FIELD_REPOSITORY: &str = "repository";
pub const FIELD_PERMISSION: &str = "permission";

/// Raw ticket event as delivered on the work queue.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TicketPayload {
    pub ticket_id: String,
    pub ticket_key: String,
    pub reporter: String,
    pub description: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("missing required fields: {}", missing_fields.join(", "))]
pub struct ExtractionError {
    pub missing_fields: Vec<String>,
}

/// Parses the labeled `User:` / `Repository:` / `Permission:` lines out of
/// a ticket description. Pure; present-but-malformed values pass through
/// untouched and are judged by the policy gate.
pub fn extract(payload: &TicketPayload) -> Result<AccessRequest, ExtractionError> {
    let mut user = None;
    let mut repository = None;
    let mut permission = None;

    for line in payload.description.lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match label.trim().to_ascii_lowercase().as_str() {
            FIELD_USER => user.get_or_insert_with(|| value.to_string()),
            FIELD_REPOSITORY => repository.get_or_insert_with(|| value.to_string()),
            FIELD_PERMISSION => permission.get_or_insert_with(|| value.to_string()),
            _ => continue,
        };
    }

    let mut missing_fields = Vec::new();
    if user.is_none() {
        missing_fields.push(FIELD_USER.to_string());
    }
    if repository.is_none() {
        missing_fields.push(FIELD_REPOSITORY.to_string());
    }
    if permission.is_none() {
        missing_fields.push(FIELD_PERMISSION.to_string());
    }
    if !missing_fields.is_empty() {
        return Err(ExtractionError { missing_fields });
    }

    Ok(AccessRequest {
        request_id: uuid_v7_without_dashes(),
        ticket_id: payload.ticket_id.clone(),
        ticket_key: payload.ticket_key.clone(),
        requester: payload.reporter.clone(),
        target_user: user.unwrap_or_default(),
        repository: repository.unwrap_or_default(),
        permission_level: permission.unwrap_or_default(),
        status: RequestStatus::Received,
        validation_errors: Vec::new(),
        correlation_id: format!("{}-{}", payload.ticket_id, correlation_suffix()),
        received_at_ms: now_ms(),
    })
}

/// Inverse of `extract` over the three request fields.
pub fn serialize_description(request: &AccessRequest) -> String {
    format!(
        "User: {}\nRepository: {}\nPermission: {}",
        request.target_user, request.repository, request.permission_level
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(description: &str) -> TicketPayload {
        TicketPayload {
            ticket_id: "10001".into(),
            ticket_key: "ACCESS-1".into(),
            reporter: "bob".into(),
            description: description.into(),
        }
    }

    #[test]
    fn extracts_the_three_labeled_fields() {
        let request = extract(&payload(
            "User: alice\nRepository: payments-api\nPermission: write",
        ))
        .unwrap();
        assert_eq!(request.target_user, "alice");
        assert_eq!(request.repository, "payments-api");
        assert_eq!(request.permission_level, "write");
        assert_eq!(request.status, RequestStatus::Received);
        assert!(request.correlation_id.starts_with("10001-"));
    }

    #[test]
    fn round_trips_through_serialize_description() {
        let description = "User: alice\nRepository: payments-api\nPermission: write";
        let request = extract(&payload(description)).unwrap();
        assert_eq!(serialize_description(&request), description);
    }

    #[test]
    fn tolerates_surrounding_prose_and_label_case() {
        let request = extract(&payload(
            "Please grant access.\nuser: alice\nREPOSITORY: payments-api\nPermission: read\nThanks!",
        ))
        .unwrap();
        assert_eq!(request.target_user, "alice");
        assert_eq!(request.repository, "payments-api");
        assert_eq!(request.permission_level, "read");
    }

    #[test]
    fn names_every_missing_field() {
        let err = extract(&payload("Permission: write")).unwrap_err();
        assert_eq!(err.missing_fields, vec!["user", "repository"]);
        assert_eq!(
            err.to_string(),
            "missing required fields: user, repository"
        );
    }

    #[test]
    fn empty_after_trim_counts_as_missing() {
        let err = extract(&payload("User:   \nRepository: payments-api\nPermission: write"))
            .unwrap_err();
        assert_eq!(err.missing_fields, vec!["user"]);
    }

    #[test]
    fn malformed_permission_is_not_an_extraction_error() {
        let request = extract(&payload(
            "User: alice\nRepository: payments-api\nPermission: superadmin",
        ))
        .unwrap();
        assert_eq!(request.permission_level, "superadmin");
    }

    #[test]
    fn correlation_ids_differ_across_deliveries() {
        let payload = payload("User: alice\nRepository: payments-api\nPermission: write");
        let first = extract(&payload).unwrap();
        let second = extract(&payload).unwrap();
        assert_ne!(first.correlation_id, second.correlation_id);
    }
}
