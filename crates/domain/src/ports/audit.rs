use thiserror::Error;

use super::BoxFuture;
use crate::audit::{AuditEntry, AuditQuery};

#[derive(Debug, Error)]
pub enum AuditStoreError {
    #[error("audit store unavailable: {0}")]
    Unavailable(String),
    #[error("audit serialization error: {0}")]
    Serialization(String),
    #[error("audit store operation failed: {0}")]
    Operation(String),
}

/// Append-only terminal-outcome record store. Implementations dedupe on
/// `request_id` + outcome status so a crash-then-redeliver cycle still
/// yields exactly one entry per outcome.
pub trait AuditStore: Send + Sync {
    fn append(&self, entry: &AuditEntry) -> BoxFuture<'_, Result<(), AuditStoreError>>;

    fn get_by_request_id(
        &self,
        request_id: &str,
    ) -> BoxFuture<'_, Result<Option<AuditEntry>, AuditStoreError>>;

    fn query(&self, query: &AuditQuery) -> BoxFuture<'_, Result<Vec<AuditEntry>, AuditStoreError>>;
}
