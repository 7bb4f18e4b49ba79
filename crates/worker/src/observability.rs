use std::net::SocketAddr;

use anyhow::Result;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

const REQUESTS_PROCESSED_TOTAL: &str = "grantpipe_worker_requests_processed_total";
const REQUEST_DURATION_MS: &str = "grantpipe_worker_request_duration_ms";
const PROVISION_RETRIES_TOTAL: &str = "grantpipe_worker_provision_retries_total";
const DEAD_LETTER_TOTAL: &str = "grantpipe_worker_dead_letter_total";
const QUEUE_READY_GAUGE: &str = "grantpipe_worker_queue_ready_total";
const QUEUE_PROCESSING_GAUGE: &str = "grantpipe_worker_queue_processing_total";
const QUEUE_DEAD_GAUGE: &str = "grantpipe_worker_queue_dead_total";

/// Installs the Prometheus recorder and its scrape listener. Must run
/// inside the tokio runtime.
pub fn init_metrics(listen_addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(listen_addr)
        .install()?;
    Ok(())
}

pub fn register_request_processed(outcome: &str, duration_ms: f64, provision_attempts: u32) {
    counter!(
        REQUESTS_PROCESSED_TOTAL,
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        REQUEST_DURATION_MS,
        "outcome" => outcome.to_string()
    )
    .record(duration_ms);

    if provision_attempts > 1 {
        counter!(PROVISION_RETRIES_TOTAL).increment(u64::from(provision_attempts - 1));
    }
}

pub fn register_dead_letter() {
    counter!(DEAD_LETTER_TOTAL).increment(1);
}

pub fn set_queue_depth_gauges(ready: u64, processing: u64, dead: u64) {
    gauge!(QUEUE_READY_GAUGE).set(ready as f64);
    gauge!(QUEUE_PROCESSING_GAUGE).set(processing as f64);
    gauge!(QUEUE_DEAD_GAUGE).set(dead as f64);
}
