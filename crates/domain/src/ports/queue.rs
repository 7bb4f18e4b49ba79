use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::BoxFuture;
use crate::extract::TicketPayload;
use crate::util::{now_ms, uuid_v7_without_dashes};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("work queue unavailable: {0}")]
    Unavailable(String),
    #[error("work queue serialization error: {0}")]
    Serialization(String),
    #[error("work queue operation failed: {0}")]
    Operation(String),
}

/// One ticket event on the queue. `message_id` is minted at ingestion and
/// survives redelivery, which makes it the dedupe key for downstream
/// idempotency.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkItem {
    pub message_id: String,
    pub ticket: TicketPayload,
    pub delivery_count: u32,
    pub max_deliveries: u32,
    pub enqueued_at_ms: i64,
}

impl WorkItem {
    pub fn new(ticket: TicketPayload, max_deliveries: u32) -> Self {
        Self {
            message_id: uuid_v7_without_dashes(),
            ticket,
            delivery_count: 1,
            max_deliveries: max_deliveries.max(1),
            enqueued_at_ms: now_ms(),
        }
    }
}

/// At-least-once queue with a per-message visibility lease. A dequeued
/// message stays invisible until acked, dead-lettered, or its lease
/// expires and `requeue_expired` returns it to the ready set.
pub trait WorkQueue: Send + Sync {
    fn enqueue(&self, item: &WorkItem) -> BoxFuture<'_, Result<(), QueueError>>;

    fn dequeue(&self, timeout: Duration) -> BoxFuture<'_, Result<Option<WorkItem>, QueueError>>;

    fn ack(&self, message_id: &str) -> BoxFuture<'_, Result<(), QueueError>>;

    fn dead_letter(&self, item: &WorkItem) -> BoxFuture<'_, Result<(), QueueError>>;

    fn requeue_expired(&self, limit: usize) -> BoxFuture<'_, Result<usize, QueueError>>;
}
