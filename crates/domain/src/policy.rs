use serde::{Deserialize, Serialize};

use crate::request::{AccessRequest, PermissionLevel, ALLOWED_PERMISSION_LEVELS};

pub const REASON_USER_NOT_FOUND: &str = "User not available in Bitbucket";
pub const REASON_REPOSITORY_NOT_FOUND: &str = "Project not available";

/// Existence facts gathered from the source-control host. Ephemeral:
/// consumed by the gate and folded into the rejection reason, never stored.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationFacts {
    pub target_user_exists: bool,
    pub repository_exists: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Approve { level: PermissionLevel },
    Reject { reason: String },
}

/// Additional policy rule beyond the built-in checks. Rules are evaluated
/// in registration order; the first failing rule names the rejection.
pub trait PolicyPredicate: Send + Sync {
    fn id(&self) -> &str;
    fn allows(&self, request: &AccessRequest, facts: &ValidationFacts) -> bool;
}

#[derive(Default)]
pub struct PolicyGate {
    extra_rules: Vec<Box<dyn PolicyPredicate>>,
}

impl PolicyGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: Box<dyn PolicyPredicate>) -> Self {
        self.extra_rules.push(rule);
        self
    }

    /// Pure decision over a request plus validation facts. Rules evaluate
    /// in a fixed order and short-circuit, so the reason is always the
    /// single most relevant one.
    pub fn decide(&self, request: &AccessRequest, facts: &ValidationFacts) -> Decision {
        if !facts.target_user_exists {
            return Decision::Reject {
                reason: REASON_USER_NOT_FOUND.to_string(),
            };
        }
        if !facts.repository_exists {
            return Decision::Reject {
                reason: REASON_REPOSITORY_NOT_FOUND.to_string(),
            };
        }
        let Some(level) = PermissionLevel::parse(&request.permission_level) else {
            return Decision::Reject {
                reason: format!(
                    "invalid permission level: {}; allowed: {ALLOWED_PERMISSION_LEVELS}",
                    request.permission_level
                ),
            };
        };
        for rule in &self.extra_rules {
            if !rule.allows(request, facts) {
                return Decision::Reject {
                    reason: format!("policy violation: {}", rule.id()),
                };
            }
        }
        Decision::Approve { level }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestStatus;

    fn request(permission: &str) -> AccessRequest {
        AccessRequest {
            request_id: "req-1".into(),
            ticket_id: "10001".into(),
            ticket_key: "ACCESS-1".into(),
            requester: "bob".into(),
            target_user: "alice".into(),
            repository: "payments-api".into(),
            permission_level: permission.into(),
            status: RequestStatus::Validating,
            validation_errors: Vec::new(),
            correlation_id: "10001-abcd1234".into(),
            received_at_ms: 0,
        }
    }

    const ALL_TRUE: ValidationFacts = ValidationFacts {
        target_user_exists: true,
        repository_exists: true,
    };

    #[test]
    fn approves_each_allowed_level() {
        let gate = PolicyGate::new();
        for (raw, level) in [
            ("read", PermissionLevel::Read),
            ("write", PermissionLevel::Write),
            ("admin", PermissionLevel::Admin),
        ] {
            assert_eq!(
                gate.decide(&request(raw), &ALL_TRUE),
                Decision::Approve { level }
            );
        }
    }

    #[test]
    fn missing_user_wins_over_everything_else() {
        let gate = PolicyGate::new();
        let facts = ValidationFacts {
            target_user_exists: false,
            repository_exists: false,
        };
        assert_eq!(
            gate.decide(&request("superadmin"), &facts),
            Decision::Reject {
                reason: REASON_USER_NOT_FOUND.to_string()
            }
        );
    }

    #[test]
    fn missing_repository_is_reported_next() {
        let gate = PolicyGate::new();
        let facts = ValidationFacts {
            target_user_exists: true,
            repository_exists: false,
        };
        assert_eq!(
            gate.decide(&request("write"), &facts),
            Decision::Reject {
                reason: REASON_REPOSITORY_NOT_FOUND.to_string()
            }
        );
    }

    #[test]
    fn unknown_permission_names_value_and_allowed_set() {
        let gate = PolicyGate::new();
        assert_eq!(
            gate.decide(&request("superadmin"), &ALL_TRUE),
            Decision::Reject {
                reason: "invalid permission level: superadmin; allowed: read, write, admin"
                    .to_string()
            }
        );
    }

    struct NoAdminForBots;

    impl PolicyPredicate for NoAdminForBots {
        fn id(&self) -> &str {
            "no-admin-for-bots"
        }

        fn allows(&self, request: &AccessRequest, _facts: &ValidationFacts) -> bool {
            !(request.target_user.ends_with("-bot") && request.permission_level == "admin")
        }
    }

    #[test]
    fn extra_rules_run_after_builtins_and_name_themselves() {
        let gate = PolicyGate::new().with_rule(Box::new(NoAdminForBots));
        let mut req = request("admin");
        req.target_user = "deploy-bot".into();
        assert_eq!(
            gate.decide(&req, &ALL_TRUE),
            Decision::Reject {
                reason: "policy violation: no-admin-for-bots".to_string()
            }
        );
        assert_eq!(
            gate.decide(&request("admin"), &ALL_TRUE),
            Decision::Approve {
                level: PermissionLevel::Admin
            }
        );
    }
}
