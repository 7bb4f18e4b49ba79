use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, info_span, warn, Instrument};

use crate::audit::{AuditEntry, AuditStatus};
use crate::error::DomainError;
use crate::extract::{extract, ExtractionError};
use crate::policy::{Decision, PolicyGate, ValidationFacts};
use crate::ports::audit::{AuditStore, AuditStoreError};
use crate::ports::queue::{QueueError, WorkItem, WorkQueue};
use crate::ports::scm::{GrantReceipt, ScmError, ScmHost};
use crate::ports::tickets::TicketSystem;
use crate::request::{AccessRequest, FieldError, RequestStatus};
use crate::retry::RetryPolicy;
use crate::sanitize::sanitize;
use crate::util::{correlation_suffix, now_ms};

pub const TICKET_STATUS_IN_PROGRESS: &str = "In Progress";
pub const TICKET_STATUS_DONE: &str = "Done";

/// Infrastructure failures that abort the attempt without acknowledging
/// the queue message, leaving it safely redeliverable.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("audit write failed: {0}")]
    Audit(#[from] AuditStoreError),
    #[error("queue operation failed: {0}")]
    Queue(#[from] QueueError),
    #[error("pipeline state error: {0}")]
    State(#[from] DomainError),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProcessReport {
    pub request: AccessRequest,
    pub provision_attempts: u32,
    pub dead_lettered: bool,
}

enum AttemptError {
    Exhausted(ScmError),
    Terminal(ScmError),
}

/// Drives one work item through the request state machine. Owns the
/// in-flight request exclusively; the only shared resources it touches
/// are the audit store and the queue, and it acknowledges a message only
/// after the terminal audit write has succeeded.
pub struct Pipeline {
    scm: Arc<dyn ScmHost>,
    tickets: Arc<dyn TicketSystem>,
    queue: Arc<dyn WorkQueue>,
    audit: Arc<dyn AuditStore>,
    policy: PolicyGate,
    retry: RetryPolicy,
}

impl Pipeline {
    pub fn new(
        scm: Arc<dyn ScmHost>,
        tickets: Arc<dyn TicketSystem>,
        queue: Arc<dyn WorkQueue>,
        audit: Arc<dyn AuditStore>,
        policy: PolicyGate,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            scm,
            tickets,
            queue,
            audit,
            policy,
            retry,
        }
    }

    pub async fn process(&self, item: WorkItem) -> Result<ProcessReport, PipelineError> {
        let started = Instant::now();
        self.signal_processing_started(&item).await;

        let mut request = match extract(&item.ticket) {
            // Request identity follows the queue message so redelivered
            // copies dedupe in the audit store and at the host.
            Ok(request) => request.with_request_id(&item.message_id),
            Err(err) => return self.reject_malformed(&item, err, started).await,
        };
        info!(
            request_id = %request.request_id,
            correlation_id = %request.correlation_id,
            target_user = %request.target_user,
            repository = %request.repository,
            op = "extract",
            "extracted access request"
        );
        request.advance(RequestStatus::Validating)?;

        let facts = match self
            .gather_facts(&request)
            .instrument(info_span!("validate", correlation_id = %request.correlation_id))
            .await
        {
            Ok(facts) => facts,
            Err(AttemptError::Exhausted(err)) => {
                return self.finish_failed(&item, request, err, 0, true, started).await;
            }
            Err(AttemptError::Terminal(err)) => {
                return self.finish_failed(&item, request, err, 0, false, started).await;
            }
        };

        match self.policy.decide(&request, &facts) {
            Decision::Reject { reason } => {
                info!(
                    request_id = %request.request_id,
                    correlation_id = %request.correlation_id,
                    op = "decide",
                    outcome = "reject",
                    reason = %reason,
                    "policy gate rejected request"
                );
                self.finish_rejected(&item, request, reason, started).await
            }
            Decision::Approve { level } => {
                request.advance(RequestStatus::Validated)?;
                request.advance(RequestStatus::Provisioning)?;
                let mut attempts = 0u32;
                let grant = self
                    .with_retry(&request, "grant_permission", &mut attempts, || {
                        self.scm
                            .grant_permission(&request.target_user, &request.repository, level)
                    })
                    .instrument(info_span!("provision", correlation_id = %request.correlation_id))
                    .await;
                match grant {
                    Ok(receipt) => {
                        self.finish_succeeded(&item, request, receipt, attempts, started)
                            .await
                    }
                    Err(AttemptError::Exhausted(err)) => {
                        self.finish_failed(&item, request, err, attempts, true, started)
                            .await
                    }
                    Err(AttemptError::Terminal(err)) => {
                        self.finish_failed(&item, request, err, attempts, false, started)
                            .await
                    }
                }
            }
        }
    }

    /// Existence reads in fixed order: target user first, repository
    /// second. Definitive not-found is a negative fact, not an error;
    /// transient failures re-use the backoff loop before any grant.
    async fn gather_facts(&self, request: &AccessRequest) -> Result<ValidationFacts, AttemptError> {
        let mut attempts = 0u32;
        let target_user_exists = self
            .with_retry(request, "user_exists", &mut attempts, || {
                self.scm.user_exists(&request.target_user)
            })
            .await?;
        let repository_exists = self
            .with_retry(request, "repository_exists", &mut attempts, || {
                self.scm.repository_exists(&request.repository)
            })
            .await?;
        Ok(ValidationFacts {
            target_user_exists,
            repository_exists,
        })
    }

    /// Backoff loop shared by the validation reads and the grant call.
    /// The attempt ceiling applies per operation, not per request: each
    /// probe and the grant gets its own budget.
    async fn with_retry<T, F, Fut>(
        &self,
        request: &AccessRequest,
        op: &'static str,
        attempts_used: &mut u32,
        mut call: F,
    ) -> Result<T, AttemptError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ScmError>>,
    {
        let mut attempt = 1u32;
        loop {
            *attempts_used = attempt;
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => {
                    if attempt >= self.retry.max_attempts {
                        return Err(AttemptError::Exhausted(err));
                    }
                    let delay = self.retry.jittered_delay(attempt);
                    warn!(
                        request_id = %request.request_id,
                        correlation_id = %request.correlation_id,
                        op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %sanitize(&err.to_string()),
                        "retryable provider error, backing off"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(AttemptError::Terminal(err)),
            }
        }
    }

    async fn reject_malformed(
        &self,
        item: &WorkItem,
        err: ExtractionError,
        started: Instant,
    ) -> Result<ProcessReport, PipelineError> {
        let request = AccessRequest {
            request_id: item.message_id.clone(),
            ticket_id: item.ticket.ticket_id.clone(),
            ticket_key: item.ticket.ticket_key.clone(),
            requester: item.ticket.reporter.clone(),
            target_user: String::new(),
            repository: String::new(),
            permission_level: String::new(),
            status: RequestStatus::Validating,
            validation_errors: err
                .missing_fields
                .iter()
                .map(|field| FieldError::new(field, "missing or empty"))
                .collect(),
            correlation_id: format!("{}-{}", item.ticket.ticket_id, correlation_suffix()),
            received_at_ms: now_ms(),
        };
        // Malformed input will not become well-formed on retry.
        self.finish_rejected(item, request, err.to_string(), started)
            .await
    }

    async fn finish_rejected(
        &self,
        item: &WorkItem,
        mut request: AccessRequest,
        reason: String,
        started: Instant,
    ) -> Result<ProcessReport, PipelineError> {
        request.advance(RequestStatus::Rejected)?;
        let entry = AuditEntry::from_request(
            &request,
            AuditStatus::Failed,
            Some(sanitize(&reason)),
            None,
            started.elapsed().as_millis() as u64,
        )?;
        self.record_outcome(&request, &entry).await?;
        self.project_to_ticket(&request, &format!("Access request rejected: {reason}"))
            .await;
        self.queue.ack(&item.message_id).await?;
        info!(
            request_id = %request.request_id,
            correlation_id = %request.correlation_id,
            op = "finish",
            outcome = "rejected",
            "request rejected"
        );
        Ok(ProcessReport {
            request,
            provision_attempts: 0,
            dead_lettered: false,
        })
    }

    async fn finish_failed(
        &self,
        item: &WorkItem,
        mut request: AccessRequest,
        err: ScmError,
        provision_attempts: u32,
        dead_letter: bool,
        started: Instant,
    ) -> Result<ProcessReport, PipelineError> {
        request.advance(RequestStatus::Failed)?;
        let message = sanitize(&err.to_string());
        let entry = AuditEntry::from_request(
            &request,
            AuditStatus::Failed,
            Some(message.clone()),
            None,
            started.elapsed().as_millis() as u64,
        )?;
        self.record_outcome(&request, &entry).await?;
        self.project_to_ticket(&request, &format!("Access request failed: {message}"))
            .await;
        if dead_letter {
            self.queue.dead_letter(item).await?;
        }
        self.queue.ack(&item.message_id).await?;
        warn!(
            request_id = %request.request_id,
            correlation_id = %request.correlation_id,
            op = "finish",
            outcome = "failed",
            dead_lettered = dead_letter,
            error = %message,
            "request failed"
        );
        Ok(ProcessReport {
            request,
            provision_attempts,
            dead_lettered: dead_letter,
        })
    }

    async fn finish_succeeded(
        &self,
        item: &WorkItem,
        mut request: AccessRequest,
        receipt: GrantReceipt,
        provision_attempts: u32,
        started: Instant,
    ) -> Result<ProcessReport, PipelineError> {
        request.advance(RequestStatus::Succeeded)?;
        let entry = AuditEntry::from_request(
            &request,
            AuditStatus::Success,
            None,
            receipt.provider_response.as_deref().map(sanitize),
            started.elapsed().as_millis() as u64,
        )?;
        self.record_outcome(&request, &entry).await?;
        self.project_to_ticket(
            &request,
            &format!(
                "Access granted: {} permission on {} for {}",
                request.permission_level, request.repository, request.target_user
            ),
        )
        .await;
        self.queue.ack(&item.message_id).await?;
        info!(
            request_id = %request.request_id,
            correlation_id = %request.correlation_id,
            op = "finish",
            outcome = "succeeded",
            provision_attempts,
            already_held = receipt.already_held,
            "request succeeded"
        );
        Ok(ProcessReport {
            request,
            provision_attempts,
            dead_lettered: false,
        })
    }

    /// Processing-started signal. At-least-once: duplicate signals on
    /// redelivery are tolerated by the ticket system.
    async fn signal_processing_started(&self, item: &WorkItem) {
        if let Err(err) = self
            .tickets
            .set_status(&item.ticket.ticket_id, TICKET_STATUS_IN_PROGRESS)
            .await
        {
            warn!(
                ticket_id = %item.ticket.ticket_id,
                error = %sanitize(&err.to_string()),
                "failed to signal processing started"
            );
        }
    }

    /// Terminal audit write. Failure here aborts the attempt before any
    /// acknowledgment, so the message redelivers.
    async fn record_outcome(
        &self,
        request: &AccessRequest,
        entry: &AuditEntry,
    ) -> Result<(), PipelineError> {
        self.audit
            .append(entry)
            .instrument(info_span!("audit_append", correlation_id = %request.correlation_id))
            .await?;
        Ok(())
    }

    /// Terminal-state projection: one comment and one status change.
    /// Projection failures are logged, never fatal; the audit store holds
    /// the canonical record.
    async fn project_to_ticket(&self, request: &AccessRequest, comment: &str) {
        let span = info_span!("ticket_projection", correlation_id = %request.correlation_id);
        async {
            if let Err(err) = self.tickets.add_comment(&request.ticket_id, comment).await {
                warn!(
                    request_id = %request.request_id,
                    correlation_id = %request.correlation_id,
                    error = %sanitize(&err.to_string()),
                    "failed to add resolution comment"
                );
            }
            if let Err(err) = self
                .tickets
                .set_status(&request.ticket_id, TICKET_STATUS_DONE)
                .await
            {
                warn!(
                    request_id = %request.request_id,
                    correlation_id = %request.correlation_id,
                    error = %sanitize(&err.to_string()),
                    "failed to set ticket status"
                );
            }
        }
        .instrument(span)
        .await;
    }
}
