use crate::config::AppConfig;
use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

// Transport crates log every reconnect and request at info; keep them at
// warn unless the configured filter says otherwise.
const QUIET_TRANSPORT: &str = "hyper=warn,reqwest=warn,redis=warn,surrealdb=warn";

pub fn init_tracing(config: &AppConfig) -> Result<()> {
    let directives = format!("{},{QUIET_TRANSPORT}", config.log_level);
    let filter = EnvFilter::try_new(directives)
        .unwrap_or_else(|_| EnvFilter::new(format!("info,{QUIET_TRANSPORT}")));

    if config.is_production() {
        fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .with_target(false)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }

    Ok(())
}
