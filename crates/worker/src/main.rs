use std::sync::Arc;
use std::time::{Duration, Instant};

use grantpipe_domain::audit::InMemoryAuditStore;
use grantpipe_domain::pipeline::Pipeline;
use grantpipe_domain::policy::PolicyGate;
use grantpipe_domain::ports::audit::AuditStore;
use grantpipe_domain::ports::queue::{WorkQueue, WorkItem};
use grantpipe_domain::ports::secrets::SecretStore;
use grantpipe_domain::retry::RetryPolicy;
use grantpipe_infra::audit::SurrealAuditStore;
use grantpipe_infra::bitbucket::BitbucketClient;
use grantpipe_infra::config::AppConfig;
use grantpipe_infra::jira::JiraClient;
use grantpipe_infra::logging::init_tracing;
use grantpipe_infra::queue::RedisWorkQueue;
use grantpipe_infra::secrets::{CachedSecretStore, EnvSecretStore};
use tracing::{error, info, warn};

mod observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config)?;
    let metrics_addr: std::net::SocketAddr = config
        .metrics_listen_addr
        .parse()
        .map_err(|err| anyhow::anyhow!("invalid metrics_listen_addr: {err}"))?;
    observability::init_metrics(metrics_addr)?;

    let queue = RedisWorkQueue::connect_with_prefix(
        &config.redis_url,
        config.queue_prefix.clone(),
        Duration::from_millis(config.queue_lease_ms),
    )
    .await
    .map_err(|err| anyhow::anyhow!("queue connect failed: {err}"))?;

    let secrets: Arc<dyn SecretStore> = Arc::new(CachedSecretStore::new(
        Arc::new(EnvSecretStore::new()),
        Duration::from_millis(config.secret_cache_ttl_ms),
    ));

    let audit: Arc<dyn AuditStore> = if config.audit_backend.eq_ignore_ascii_case("surreal") {
        Arc::new(SurrealAuditStore::new(&config).await?)
    } else {
        Arc::new(InMemoryAuditStore::new())
    };

    let pipeline = Pipeline::new(
        Arc::new(BitbucketClient::from_config(&config, secrets.clone())),
        Arc::new(JiraClient::from_config(&config, secrets)),
        Arc::new(queue.clone()),
        audit,
        PolicyGate::new(),
        RetryPolicy::new(
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_max_ms),
            config.provision_max_attempts,
        ),
    );

    spawn_lease_sweeper(queue.clone(), &config);

    info!(queue_prefix = %config.queue_prefix, "worker starting");
    run_worker(&pipeline, &queue, &config).await;
    info!("worker shutdown");

    Ok(())
}

async fn run_worker(pipeline: &Pipeline, queue: &RedisWorkQueue, config: &AppConfig) {
    let poll = Duration::from_millis(config.queue_poll_interval_ms.max(1));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            dequeued = queue.dequeue(poll) => match dequeued {
                Ok(Some(item)) => process_item(pipeline, item).await,
                Ok(None) => {}
                Err(err) => {
                    error!(error = %err, "dequeue failed");
                    tokio::time::sleep(poll).await;
                }
            },
        }
    }
}

async fn process_item(pipeline: &Pipeline, item: WorkItem) {
    let message_id = item.message_id.clone();
    let started = Instant::now();
    match pipeline.process(item).await {
        Ok(report) => {
            if report.dead_lettered {
                observability::register_dead_letter();
            }
            observability::register_request_processed(
                report.request.status.as_str(),
                started.elapsed().as_millis() as f64,
                report.provision_attempts,
            );
        }
        Err(err) => {
            // The message was not acknowledged; it redelivers once its
            // lease expires.
            error!(message_id = %message_id, error = %err, "attempt aborted");
            observability::register_request_processed(
                "aborted",
                started.elapsed().as_millis() as f64,
                0,
            );
        }
    }
}

fn spawn_lease_sweeper(queue: RedisWorkQueue, config: &AppConfig) {
    let interval = Duration::from_millis(config.queue_sweep_interval_ms.max(1));
    let batch = config.queue_sweep_batch.max(1);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match queue.requeue_expired(batch).await {
                Ok(0) => {}
                Ok(moved) => info!(moved, "requeued expired leases"),
                Err(err) => warn!(error = %err, "lease sweep failed"),
            }
            match queue.depth_snapshot().await {
                Ok(snapshot) => observability::set_queue_depth_gauges(
                    snapshot.ready,
                    snapshot.processing,
                    snapshot.dead,
                ),
                Err(err) => warn!(error = %err, "queue depth snapshot failed"),
            }
        }
    });
}
