use std::time::Duration;

use grantpipe_domain::ports::queue::{QueueError, WorkItem, WorkQueue};
use grantpipe_domain::ports::BoxFuture;
use grantpipe_domain::util::now_ms;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

const DEFAULT_PREFIX: &str = "grantpipe:requests";

/// Redis-backed work queue with competing-consumer semantics. A dequeue
/// atomically moves the message id from the ready list to the processing
/// list and stamps a visibility lease; `requeue_expired` sweeps messages
/// whose lease lapsed back to ready (or to the dead list once the
/// delivery ceiling is hit).
#[derive(Clone)]
pub struct RedisWorkQueue {
    manager: ConnectionManager,
    ready_key: String,
    processing_key: String,
    leases_key: String,
    payload_key: String,
    dead_key: String,
    lease: Duration,
}

#[derive(Debug, Clone)]
pub struct QueueDepthSnapshot {
    pub ready: u64,
    pub processing: u64,
    pub dead: u64,
}

impl RedisWorkQueue {
    pub async fn connect(redis_url: &str, lease: Duration) -> Result<Self, QueueError> {
        Self::connect_with_prefix(redis_url, DEFAULT_PREFIX, lease).await
    }

    pub async fn connect_with_prefix(
        redis_url: &str,
        prefix: impl Into<String>,
        lease: Duration,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| QueueError::Unavailable(err.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|err| QueueError::Unavailable(err.to_string()))?;
        let prefix = prefix.into();
        Ok(Self {
            manager,
            ready_key: format!("{prefix}:ready"),
            processing_key: format!("{prefix}:processing"),
            leases_key: format!("{prefix}:leases"),
            payload_key: format!("{prefix}:payloads"),
            dead_key: format!("{prefix}:dead"),
            lease,
        })
    }

    fn serialize(item: &WorkItem) -> Result<String, QueueError> {
        serde_json::to_string(item).map_err(|err| QueueError::Serialization(err.to_string()))
    }

    fn deserialize(payload: &str) -> Result<WorkItem, QueueError> {
        serde_json::from_str(payload).map_err(|err| QueueError::Serialization(err.to_string()))
    }

    /// Enqueue guarded by a dedupe marker so producers retrying a webhook
    /// delivery do not double-enqueue the same ticket event.
    pub async fn enqueue_if_absent(
        &self,
        item: &WorkItem,
        dedupe_ttl_ms: u64,
    ) -> Result<bool, QueueError> {
        let payload = Self::serialize(item)?;
        let dedupe_key = format!("{}:dedupe:{}", self.payload_key, item.message_id);
        let dedupe_ttl_ms = dedupe_ttl_ms.max(1);
        let mut conn = self.manager.clone();
        let script = redis::Script::new(
            r#"
                local payload_key = KEYS[1]
                local ready_key = KEYS[2]
                local marker_key = KEYS[3]
                local message_id = ARGV[1]
                local payload = ARGV[2]
                local dedupe_ttl_ms = tonumber(ARGV[3])

                if redis.call('SET', marker_key, 1, 'PX', dedupe_ttl_ms, 'NX') == false then
                    return 0
                end

                redis.call('HSET', payload_key, message_id, payload)
                redis.call('RPUSH', ready_key, message_id)
                return 1
            "#,
        );
        let inserted: i32 = script
            .key(&self.payload_key)
            .key(&self.ready_key)
            .key(&dedupe_key)
            .arg(&item.message_id)
            .arg(payload)
            .arg(dedupe_ttl_ms as i64)
            .invoke_async(&mut conn)
            .await
            .map_err(|err| QueueError::Operation(err.to_string()))?;
        Ok(inserted == 1)
    }

    pub async fn depth_snapshot(&self) -> Result<QueueDepthSnapshot, QueueError> {
        let mut conn = self.manager.clone();
        let ready: u64 = conn
            .llen(&self.ready_key)
            .await
            .map_err(|err| QueueError::Operation(err.to_string()))?;
        let processing: u64 = conn
            .llen(&self.processing_key)
            .await
            .map_err(|err| QueueError::Operation(err.to_string()))?;
        let dead: u64 = conn
            .llen(&self.dead_key)
            .await
            .map_err(|err| QueueError::Operation(err.to_string()))?;
        Ok(QueueDepthSnapshot {
            ready,
            processing,
            dead,
        })
    }

    async fn remove_message(
        conn: &mut ConnectionManager,
        processing_key: &str,
        payload_key: &str,
        leases_key: &str,
        message_id: &str,
    ) -> Result<(), QueueError> {
        let mut pipeline = redis::pipe();
        pipeline.atomic();
        pipeline
            .cmd("LREM")
            .arg(processing_key)
            .arg(1)
            .arg(message_id);
        pipeline.cmd("HDEL").arg(payload_key).arg(message_id);
        pipeline.cmd("HDEL").arg(leases_key).arg(message_id);
        let _: Vec<redis::Value> = pipeline
            .query_async(conn)
            .await
            .map_err(|err| QueueError::Operation(err.to_string()))?;
        Ok(())
    }
}

impl WorkQueue for RedisWorkQueue {
    fn enqueue(&self, item: &WorkItem) -> BoxFuture<'_, Result<(), QueueError>> {
        let payload = match Self::serialize(item) {
            Ok(payload) => payload,
            Err(err) => return Box::pin(async move { Err(err) }),
        };
        let ready_key = self.ready_key.clone();
        let payload_key = self.payload_key.clone();
        let message_id = item.message_id.clone();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let _: i64 = redis::cmd("HSET")
                .arg(&payload_key)
                .arg(&message_id)
                .arg(payload)
                .query_async(&mut conn)
                .await
                .map_err(|err| QueueError::Operation(err.to_string()))?;
            let _: i64 = conn
                .rpush(ready_key, message_id)
                .await
                .map_err(|err| QueueError::Operation(err.to_string()))?;
            Ok(())
        })
    }

    fn dequeue(&self, timeout: Duration) -> BoxFuture<'_, Result<Option<WorkItem>, QueueError>> {
        let ready_key = self.ready_key.clone();
        let processing_key = self.processing_key.clone();
        let payload_key = self.payload_key.clone();
        let leases_key = self.leases_key.clone();
        let timeout_secs = (timeout.as_secs() as usize).max(1);
        let lease_ms = self.lease.as_millis() as i64;
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let result: Option<String> = redis::cmd("BRPOPLPUSH")
                .arg(&ready_key)
                .arg(&processing_key)
                .arg(timeout_secs)
                .query_async(&mut conn)
                .await
                .map_err(|err| QueueError::Operation(err.to_string()))?;
            let Some(message_id) = result else {
                return Ok(None);
            };
            let deadline = now_ms() + lease_ms;
            let _: i64 = redis::cmd("HSET")
                .arg(&leases_key)
                .arg(&message_id)
                .arg(deadline)
                .query_async(&mut conn)
                .await
                .map_err(|err| QueueError::Operation(err.to_string()))?;
            let payload: Option<String> = redis::cmd("HGET")
                .arg(&payload_key)
                .arg(&message_id)
                .query_async(&mut conn)
                .await
                .map_err(|err| QueueError::Operation(err.to_string()))?;
            let Some(payload) = payload else {
                Self::remove_message(
                    &mut conn,
                    &processing_key,
                    &payload_key,
                    &leases_key,
                    &message_id,
                )
                .await?;
                return Err(QueueError::Operation(format!(
                    "missing payload for message {message_id}"
                )));
            };
            Ok(Some(Self::deserialize(&payload)?))
        })
    }

    fn ack(&self, message_id: &str) -> BoxFuture<'_, Result<(), QueueError>> {
        let processing_key = self.processing_key.clone();
        let payload_key = self.payload_key.clone();
        let leases_key = self.leases_key.clone();
        let message_id = message_id.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            Self::remove_message(
                &mut conn,
                &processing_key,
                &payload_key,
                &leases_key,
                &message_id,
            )
            .await
        })
    }

    fn dead_letter(&self, item: &WorkItem) -> BoxFuture<'_, Result<(), QueueError>> {
        let payload = match Self::serialize(item) {
            Ok(payload) => payload,
            Err(err) => return Box::pin(async move { Err(err) }),
        };
        let processing_key = self.processing_key.clone();
        let payload_key = self.payload_key.clone();
        let leases_key = self.leases_key.clone();
        let dead_key = self.dead_key.clone();
        let message_id = item.message_id.clone();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let mut pipeline = redis::pipe();
            pipeline.atomic();
            pipeline.cmd("RPUSH").arg(&dead_key).arg(&payload);
            pipeline
                .cmd("LREM")
                .arg(&processing_key)
                .arg(1)
                .arg(&message_id);
            pipeline.cmd("HDEL").arg(&payload_key).arg(&message_id);
            pipeline.cmd("HDEL").arg(&leases_key).arg(&message_id);
            let _: Vec<redis::Value> = pipeline
                .query_async(&mut conn)
                .await
                .map_err(|err| QueueError::Operation(err.to_string()))?;
            Ok(())
        })
    }

    fn requeue_expired(&self, limit: usize) -> BoxFuture<'_, Result<usize, QueueError>> {
        let ready_key = self.ready_key.clone();
        let processing_key = self.processing_key.clone();
        let payload_key = self.payload_key.clone();
        let leases_key = self.leases_key.clone();
        let dead_key = self.dead_key.clone();
        Box::pin(async move {
            if limit == 0 {
                return Ok(0);
            }
            let mut conn = self.manager.clone();
            let message_ids: Vec<String> = redis::cmd("LRANGE")
                .arg(&processing_key)
                .arg(0)
                .arg((limit.saturating_sub(1)) as i64)
                .query_async(&mut conn)
                .await
                .map_err(|err| QueueError::Operation(err.to_string()))?;
            let now = now_ms();
            let mut moved = 0usize;
            for message_id in message_ids {
                let deadline: Option<i64> = redis::cmd("HGET")
                    .arg(&leases_key)
                    .arg(&message_id)
                    .query_async(&mut conn)
                    .await
                    .map_err(|err| QueueError::Operation(err.to_string()))?;
                if matches!(deadline, Some(deadline) if deadline > now) {
                    continue;
                }
                let payload: Option<String> = redis::cmd("HGET")
                    .arg(&payload_key)
                    .arg(&message_id)
                    .query_async(&mut conn)
                    .await
                    .map_err(|err| QueueError::Operation(err.to_string()))?;
                let Some(payload) = payload else {
                    Self::remove_message(
                        &mut conn,
                        &processing_key,
                        &payload_key,
                        &leases_key,
                        &message_id,
                    )
                    .await?;
                    continue;
                };
                let mut item = Self::deserialize(&payload)?;
                item.delivery_count = item.delivery_count.saturating_add(1);
                if item.delivery_count > item.max_deliveries {
                    // Delivery ceiling reached without an ack; route to the
                    // dead list instead of redelivering.
                    let dead_payload = Self::serialize(&item)?;
                    let mut pipeline = redis::pipe();
                    pipeline.atomic();
                    pipeline.cmd("RPUSH").arg(&dead_key).arg(dead_payload);
                    pipeline
                        .cmd("LREM")
                        .arg(&processing_key)
                        .arg(1)
                        .arg(&message_id);
                    pipeline.cmd("HDEL").arg(&payload_key).arg(&message_id);
                    pipeline.cmd("HDEL").arg(&leases_key).arg(&message_id);
                    let _: Vec<redis::Value> = pipeline
                        .query_async(&mut conn)
                        .await
                        .map_err(|err| QueueError::Operation(err.to_string()))?;
                    continue;
                }
                let updated = Self::serialize(&item)?;
                let mut pipeline = redis::pipe();
                pipeline.atomic();
                pipeline
                    .cmd("HSET")
                    .arg(&payload_key)
                    .arg(&message_id)
                    .arg(updated);
                pipeline.cmd("HDEL").arg(&leases_key).arg(&message_id);
                pipeline
                    .cmd("LREM")
                    .arg(&processing_key)
                    .arg(1)
                    .arg(&message_id);
                pipeline.cmd("RPUSH").arg(&ready_key).arg(&message_id);
                let _: Vec<redis::Value> = pipeline
                    .query_async(&mut conn)
                    .await
                    .map_err(|err| QueueError::Operation(err.to_string()))?;
                moved += 1;
            }
            Ok(moved)
        })
    }
}
