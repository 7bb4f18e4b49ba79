use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use crate::ports::audit::{AuditStore, AuditStoreError};
use crate::ports::BoxFuture;
use crate::request::AccessRequest;
use crate::util::{immutable_event_hash, now_ms};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Failed,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        value.parse().ok()
    }
}

impl FromStr for AuditStatus {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err("unknown audit status"),
        }
    }
}

/// Immutable record of one terminal outcome. Written exactly once per
/// `request_id` + status, before the queue message is acknowledged.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub request_id: String,
    pub recorded_at_ms: i64,
    pub ticket_id: String,
    pub requester: String,
    pub target_user: String,
    pub repository: String,
    pub permission_level: String,
    pub status: AuditStatus,
    pub error_message: Option<String>,
    pub provider_response: Option<String>,
    pub correlation_id: String,
    pub processing_duration_ms: u64,
    pub entry_hash: String,
}

/// Body hashed into `entry_hash`; excludes the hash field itself.
#[derive(Serialize)]
struct AuditEntryBody<'a> {
    request_id: &'a str,
    recorded_at_ms: i64,
    ticket_id: &'a str,
    requester: &'a str,
    target_user: &'a str,
    repository: &'a str,
    permission_level: &'a str,
    status: &'a str,
    error_message: &'a Option<String>,
    provider_response: &'a Option<String>,
    correlation_id: &'a str,
    processing_duration_ms: u64,
}

impl AuditEntry {
    pub fn from_request(
        request: &AccessRequest,
        status: AuditStatus,
        error_message: Option<String>,
        provider_response: Option<String>,
        processing_duration_ms: u64,
    ) -> crate::DomainResult<Self> {
        let recorded_at_ms = now_ms();
        let body = AuditEntryBody {
            request_id: &request.request_id,
            recorded_at_ms,
            ticket_id: &request.ticket_id,
            requester: &request.requester,
            target_user: &request.target_user,
            repository: &request.repository,
            permission_level: &request.permission_level,
            status: status.as_str(),
            error_message: &error_message,
            provider_response: &provider_response,
            correlation_id: &request.correlation_id,
            processing_duration_ms,
        };
        let entry_hash = immutable_event_hash(&body)?;
        Ok(Self {
            request_id: request.request_id.clone(),
            recorded_at_ms,
            ticket_id: request.ticket_id.clone(),
            requester: request.requester.clone(),
            target_user: request.target_user.clone(),
            repository: request.repository.clone(),
            permission_level: request.permission_level.clone(),
            status,
            error_message,
            provider_response,
            correlation_id: request.correlation_id.clone(),
            processing_duration_ms,
            entry_hash,
        })
    }

    pub fn dedupe_key(&self) -> String {
        format!("{}:{}", self.request_id, self.status.as_str())
    }
}

/// Range query over the audit store. All predicates optional; `from_ms`
/// inclusive, `to_ms` exclusive.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AuditQuery {
    pub target_user: Option<String>,
    pub repository: Option<String>,
    pub from_ms: Option<i64>,
    pub to_ms: Option<i64>,
}

impl AuditQuery {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(user) = &self.target_user {
            if &entry.target_user != user {
                return false;
            }
        }
        if let Some(repository) = &self.repository {
            if &entry.repository != repository {
                return false;
            }
        }
        if let Some(from_ms) = self.from_ms {
            if entry.recorded_at_ms < from_ms {
                return false;
            }
        }
        if let Some(to_ms) = self.to_ms {
            if entry.recorded_at_ms >= to_ms {
                return false;
            }
        }
        true
    }
}

/// Test and development backend. Concurrent appends share one lock; each
/// entry is keyed by its own request id so there is no cross-request
/// coordination beyond the map itself.
#[derive(Clone, Default)]
pub struct InMemoryAuditStore {
    inner: Arc<Mutex<MemoryAudit>>,
}

#[derive(Default)]
struct MemoryAudit {
    entries: Vec<AuditEntry>,
    seen: HashSet<String>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.inner.lock().expect("audit store lock").entries.clone()
    }
}

impl AuditStore for InMemoryAuditStore {
    fn append(&self, entry: &AuditEntry) -> BoxFuture<'_, Result<(), AuditStoreError>> {
        let entry = entry.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut guard = inner.lock().expect("audit store lock");
            if guard.seen.insert(entry.dedupe_key()) {
                guard.entries.push(entry);
            }
            Ok(())
        })
    }

    fn get_by_request_id(
        &self,
        request_id: &str,
    ) -> BoxFuture<'_, Result<Option<AuditEntry>, AuditStoreError>> {
        let request_id = request_id.to_string();
        let inner = self.inner.clone();
        Box::pin(async move {
            let guard = inner.lock().expect("audit store lock");
            Ok(guard
                .entries
                .iter()
                .find(|entry| entry.request_id == request_id)
                .cloned())
        })
    }

    fn query(&self, query: &AuditQuery) -> BoxFuture<'_, Result<Vec<AuditEntry>, AuditStoreError>> {
        let query = query.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            let guard = inner.lock().expect("audit store lock");
            Ok(guard
                .entries
                .iter()
                .filter(|entry| query.matches(entry))
                .cloned()
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestStatus;

    fn request(target_user: &str, repository: &str) -> AccessRequest {
        AccessRequest {
            request_id: crate::util::uuid_v7_without_dashes(),
            ticket_id: "10001".into(),
            ticket_key: "ACCESS-1".into(),
            requester: "bob".into(),
            target_user: target_user.into(),
            repository: repository.into(),
            permission_level: "write".into(),
            status: RequestStatus::Succeeded,
            validation_errors: Vec::new(),
            correlation_id: "10001-abcd1234".into(),
            received_at_ms: 0,
        }
    }

    #[tokio::test]
    async fn append_dedupes_on_request_and_outcome() {
        let store = InMemoryAuditStore::new();
        let entry = AuditEntry::from_request(
            &request("alice", "payments-api"),
            AuditStatus::Success,
            None,
            None,
            12,
        )
        .unwrap();
        store.append(&entry).await.unwrap();
        store.append(&entry).await.unwrap();
        assert_eq!(store.entries().len(), 1);
    }

    #[tokio::test]
    async fn point_lookup_finds_the_entry() {
        let store = InMemoryAuditStore::new();
        let entry = AuditEntry::from_request(
            &request("alice", "payments-api"),
            AuditStatus::Failed,
            Some("boom".into()),
            None,
            5,
        )
        .unwrap();
        store.append(&entry).await.unwrap();
        let found = store.get_by_request_id(&entry.request_id).await.unwrap();
        assert_eq!(found, Some(entry));
    }

    #[tokio::test]
    async fn range_query_returns_the_exact_matching_set() {
        let store = InMemoryAuditStore::new();
        for (user, repo) in [
            ("alice", "payments-api"),
            ("alice", "billing-api"),
            ("carol", "payments-api"),
        ] {
            let entry =
                AuditEntry::from_request(&request(user, repo), AuditStatus::Success, None, None, 1)
                    .unwrap();
            store.append(&entry).await.unwrap();
        }

        let by_user = store
            .query(&AuditQuery {
                target_user: Some("alice".into()),
                ..AuditQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(by_user.len(), 2);

        let by_repo = store
            .query(&AuditQuery {
                repository: Some("payments-api".into()),
                ..AuditQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(by_repo.len(), 2);

        let outside_window = store
            .query(&AuditQuery {
                to_ms: Some(0),
                ..AuditQuery::default()
            })
            .await
            .unwrap();
        assert!(outside_window.is_empty());
    }

    #[test]
    fn entry_hash_covers_the_body() {
        let req = request("alice", "payments-api");
        let a = AuditEntry::from_request(&req, AuditStatus::Success, None, None, 1).unwrap();
        let b = AuditEntry::from_request(&req, AuditStatus::Failed, Some("x".into()), None, 1)
            .unwrap();
        assert_ne!(a.entry_hash, b.entry_hash);
    }
}
