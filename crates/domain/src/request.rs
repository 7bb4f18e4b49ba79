use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::DomainError;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    Read,
    Write,
    Admin,
}

pub const ALLOWED_PERMISSION_LEVELS: &str = "read, write, admin";

impl PermissionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        value.parse().ok()
    }
}

impl FromStr for PermissionLevel {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "admin" => Ok(Self::Admin),
            _ => Err("unknown permission level"),
        }
    }
}

/// Lifecycle of one access request. Transitions only move to a higher
/// rank; `Rejected`, `Succeeded` and `Failed` are terminal.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Received,
    Validating,
    Validated,
    Rejected,
    Provisioning,
    Succeeded,
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Validating => "validating",
            Self::Validated => "validated",
            Self::Rejected => "rejected",
            Self::Provisioning => "provisioning",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Succeeded | Self::Failed)
    }

    /// Ordering: Received < Validating < {Rejected, Validated}
    /// < Provisioning < {Succeeded, Failed}.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Received => 0,
            Self::Validating => 1,
            Self::Rejected | Self::Validated => 2,
            Self::Provisioning => 3,
            Self::Succeeded | Self::Failed => 4,
        }
    }
}

impl FromStr for RequestStatus {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "received" => Ok(Self::Received),
            "validating" => Ok(Self::Validating),
            "validated" => Ok(Self::Validated),
            "rejected" => Ok(Self::Rejected),
            "provisioning" => Ok(Self::Provisioning),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            _ => Err("unknown request status"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AccessRequest {
    pub request_id: String,
    pub ticket_id: String,
    pub ticket_key: String,
    pub requester: String,
    pub target_user: String,
    pub repository: String,
    /// Raw value as written in the ticket; semantic validation against the
    /// allowed set happens in the policy gate, not during extraction.
    pub permission_level: String,
    pub status: RequestStatus,
    pub validation_errors: Vec<FieldError>,
    pub correlation_id: String,
    pub received_at_ms: i64,
}

impl AccessRequest {
    /// Rebinds the request identity, used when the identity is owned by the
    /// enclosing queue message so that redeliveries dedupe.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn advance(&mut self, next: RequestStatus) -> crate::DomainResult<()> {
        if self.status.is_terminal() {
            return Err(DomainError::Validation(format!(
                "request {} is terminal in status {}",
                self.request_id,
                self.status.as_str()
            )));
        }
        if next.rank() <= self.status.rank() {
            return Err(DomainError::Validation(format!(
                "illegal transition {} -> {}",
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_levels_round_trip() {
        for level in [
            PermissionLevel::Read,
            PermissionLevel::Write,
            PermissionLevel::Admin,
        ] {
            assert_eq!(PermissionLevel::parse(level.as_str()), Some(level));
        }
        assert_eq!(PermissionLevel::parse("superadmin"), None);
    }

    #[test]
    fn status_ranks_are_monotonic_along_the_happy_path() {
        let path = [
            RequestStatus::Received,
            RequestStatus::Validating,
            RequestStatus::Validated,
            RequestStatus::Provisioning,
            RequestStatus::Succeeded,
        ];
        for pair in path.windows(2) {
            assert!(pair[1].rank() > pair[0].rank());
        }
    }

    #[test]
    fn terminal_states_accept_no_transition() {
        let mut request = fixture();
        request.status = RequestStatus::Rejected;
        assert!(request.advance(RequestStatus::Provisioning).is_err());
        request.status = RequestStatus::Succeeded;
        assert!(request.advance(RequestStatus::Failed).is_err());
    }

    #[test]
    fn advance_refuses_backward_moves() {
        let mut request = fixture();
        request.status = RequestStatus::Provisioning;
        assert!(request.advance(RequestStatus::Validating).is_err());
        assert!(request.advance(RequestStatus::Succeeded).is_ok());
    }

    fn fixture() -> AccessRequest {
        AccessRequest {
            request_id: "req-1".into(),
            ticket_id: "10001".into(),
            ticket_key: "ACCESS-1".into(),
            requester: "bob".into(),
            target_user: "alice".into(),
            repository: "payments-api".into(),
            permission_level: "write".into(),
            status: RequestStatus::Received,
            validation_errors: Vec::new(),
            correlation_id: "10001-abcd1234".into(),
            received_at_ms: 0,
        }
    }
}
