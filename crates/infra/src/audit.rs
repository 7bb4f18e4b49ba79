use std::sync::Arc;

use grantpipe_domain::audit::{AuditEntry, AuditQuery, AuditStatus};
use grantpipe_domain::ports::audit::{AuditStore, AuditStoreError};
use grantpipe_domain::ports::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use surrealdb::{
    engine::remote::ws::{Client, Ws},
    opt::auth::Root,
    Surreal,
};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::config::AppConfig;

const TABLE: &str = "audit_entry";

/// SurrealDB-backed audit store. Append-only; dedupe on
/// `request_id` + outcome keeps redelivered work from producing a second
/// entry for the same terminal state.
#[derive(Clone)]
pub struct SurrealAuditStore {
    client: Arc<Surreal<Client>>,
}

#[derive(Debug, Deserialize)]
struct SurrealAuditRow {
    request_id: String,
    recorded_at: String,
    ticket_id: String,
    requester: String,
    target_user: String,
    repository: String,
    permission_level: String,
    status: String,
    error_message: Option<String>,
    provider_response: Option<String>,
    correlation_id: String,
    processing_duration_ms: u64,
    entry_hash: String,
}

const SELECT_FIELDS: &str = "request_id, <string>recorded_at AS recorded_at, ticket_id, \
     requester, target_user, repository, permission_level, status, error_message, \
     provider_response, correlation_id, processing_duration_ms, entry_hash";

impl SurrealAuditStore {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }

    pub async fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let db = Surreal::<Client>::init();
        db.connect::<Ws>(&config.surreal_endpoint).await?;
        db.signin(Root {
            username: &config.surreal_user,
            password: &config.surreal_pass,
        })
        .await?;
        db.use_ns(&config.surreal_ns)
            .use_db(&config.surreal_db)
            .await?;
        Ok(Self {
            client: Arc::new(db),
        })
    }

    fn parse_rfc3339(value: &str) -> Result<i64, AuditStoreError> {
        let dt = OffsetDateTime::parse(value, &Rfc3339)
            .map_err(|err| AuditStoreError::Serialization(format!("invalid timestamp: {err}")))?;
        Ok((dt.unix_timestamp_nanos() / 1_000_000) as i64)
    }

    fn to_rfc3339(epoch_ms: i64) -> Result<String, AuditStoreError> {
        let dt = OffsetDateTime::from_unix_timestamp_nanos(epoch_ms as i128 * 1_000_000)
            .map_err(|err| AuditStoreError::Serialization(format!("invalid ms timestamp: {err}")))?;
        Ok(dt
            .format(&Rfc3339)
            .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string()))
    }

    fn map_surreal_error(err: surrealdb::Error) -> AuditStoreError {
        AuditStoreError::Operation(format!("surreal query failed: {err}"))
    }

    fn decode_rows(rows: Vec<Value>) -> Result<Vec<AuditEntry>, AuditStoreError> {
        rows.into_iter()
            .map(|row| {
                serde_json::from_value::<SurrealAuditRow>(row)
                    .map_err(|err| {
                        AuditStoreError::Serialization(format!("invalid audit row: {err}"))
                    })
                    .and_then(|row| {
                        let status = AuditStatus::parse(&row.status).ok_or_else(|| {
                            AuditStoreError::Serialization(format!(
                                "invalid audit status '{}'",
                                row.status
                            ))
                        })?;
                        Ok(AuditEntry {
                            request_id: row.request_id,
                            recorded_at_ms: Self::parse_rfc3339(&row.recorded_at)?,
                            ticket_id: row.ticket_id,
                            requester: row.requester,
                            target_user: row.target_user,
                            repository: row.repository,
                            permission_level: row.permission_level,
                            status,
                            error_message: row.error_message,
                            provider_response: row.provider_response,
                            correlation_id: row.correlation_id,
                            processing_duration_ms: row.processing_duration_ms,
                            entry_hash: row.entry_hash,
                        })
                    })
            })
            .collect()
    }
}

impl AuditStore for SurrealAuditStore {
    fn append(&self, entry: &AuditEntry) -> BoxFuture<'_, Result<(), AuditStoreError>> {
        let entry = entry.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let existing: Vec<Value> = client
                .query(format!(
                    "SELECT request_id FROM {TABLE} \
                     WHERE request_id = $request_id AND status = $status LIMIT 1"
                ))
                .bind(("request_id", entry.request_id.clone()))
                .bind(("status", entry.status.as_str()))
                .await
                .map_err(Self::map_surreal_error)?
                .take(0)
                .map_err(|err| AuditStoreError::Operation(format!("invalid query result: {err}")))?;
            if !existing.is_empty() {
                return Ok(());
            }

            let recorded_at = Self::to_rfc3339(entry.recorded_at_ms)?;
            client
                .query(format!(
                    "CREATE {TABLE} SET \
                        request_id = $request_id, \
                        recorded_at = <datetime>$recorded_at, \
                        ticket_id = $ticket_id, \
                        requester = $requester, \
                        target_user = $target_user, \
                        repository = $repository, \
                        permission_level = $permission_level, \
                        status = $status, \
                        error_message = $error_message, \
                        provider_response = $provider_response, \
                        correlation_id = $correlation_id, \
                        processing_duration_ms = $processing_duration_ms, \
                        entry_hash = $entry_hash"
                ))
                .bind(("request_id", entry.request_id))
                .bind(("recorded_at", recorded_at))
                .bind(("ticket_id", entry.ticket_id))
                .bind(("requester", entry.requester))
                .bind(("target_user", entry.target_user))
                .bind(("repository", entry.repository))
                .bind(("permission_level", entry.permission_level))
                .bind(("status", entry.status.as_str()))
                .bind(("error_message", entry.error_message))
                .bind(("provider_response", entry.provider_response))
                .bind(("correlation_id", entry.correlation_id))
                .bind(("processing_duration_ms", entry.processing_duration_ms as i64))
                .bind(("entry_hash", entry.entry_hash))
                .await
                .map_err(Self::map_surreal_error)?;
            Ok(())
        })
    }

    fn get_by_request_id(
        &self,
        request_id: &str,
    ) -> BoxFuture<'_, Result<Option<AuditEntry>, AuditStoreError>> {
        let request_id = request_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let rows: Vec<Value> = client
                .query(format!(
                    "SELECT {SELECT_FIELDS} FROM {TABLE} \
                     WHERE request_id = $request_id LIMIT 1"
                ))
                .bind(("request_id", request_id))
                .await
                .map_err(Self::map_surreal_error)?
                .take(0)
                .map_err(|err| AuditStoreError::Operation(format!("invalid query result: {err}")))?;
            let mut entries = Self::decode_rows(rows)?;
            Ok(entries.pop())
        })
    }

    fn query(&self, query: &AuditQuery) -> BoxFuture<'_, Result<Vec<AuditEntry>, AuditStoreError>> {
        let query = query.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let mut predicates = Vec::new();
            if query.target_user.is_some() {
                predicates.push("target_user = $target_user");
            }
            if query.repository.is_some() {
                predicates.push("repository = $repository");
            }
            if query.from_ms.is_some() {
                predicates.push("recorded_at >= <datetime>$from_ts");
            }
            if query.to_ms.is_some() {
                predicates.push("recorded_at < <datetime>$to_ts");
            }
            let mut statement = format!("SELECT {SELECT_FIELDS} FROM {TABLE}");
            if !predicates.is_empty() {
                statement.push_str(" WHERE ");
                statement.push_str(&predicates.join(" AND "));
            }
            statement.push_str(" ORDER BY recorded_at ASC");

            let mut pending = client.query(statement);
            if let Some(target_user) = query.target_user {
                pending = pending.bind(("target_user", target_user));
            }
            if let Some(repository) = query.repository {
                pending = pending.bind(("repository", repository));
            }
            if let Some(from_ms) = query.from_ms {
                pending = pending.bind(("from_ts", Self::to_rfc3339(from_ms)?));
            }
            if let Some(to_ms) = query.to_ms {
                pending = pending.bind(("to_ts", Self::to_rfc3339(to_ms)?));
            }
            let rows: Vec<Value> = pending
                .await
                .map_err(Self::map_surreal_error)?
                .take(0)
                .map_err(|err| AuditStoreError::Operation(format!("invalid query result: {err}")))?;
            Self::decode_rows(rows)
        })
    }
}
