use thiserror::Error;

use super::BoxFuture;
use crate::extract::TicketPayload;

#[derive(Debug, Error)]
pub enum TicketError {
    #[error("ticket system unavailable: {0}")]
    Unavailable(String),
    #[error("ticket operation failed: {0}")]
    Operation(String),
}

/// Issue-tracker capability. Comments and status changes are write-only
/// projections of pipeline state; nothing is ever read back as
/// authoritative input.
pub trait TicketSystem: Send + Sync {
    fn get_ticket(&self, ticket_id: &str) -> BoxFuture<'_, Result<TicketPayload, TicketError>>;

    fn add_comment(&self, ticket_id: &str, body: &str) -> BoxFuture<'_, Result<(), TicketError>>;

    fn set_status(&self, ticket_id: &str, status: &str) -> BoxFuture<'_, Result<(), TicketError>>;
}
