use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub log_level: String,
    pub redis_url: String,
    pub queue_prefix: String,
    pub queue_poll_interval_ms: u64,
    pub queue_lease_ms: u64,
    pub queue_sweep_interval_ms: u64,
    pub queue_sweep_batch: usize,
    pub audit_backend: String,
    pub surreal_endpoint: String,
    pub surreal_ns: String,
    pub surreal_db: String,
    pub surreal_user: String,
    pub surreal_pass: String,
    pub bitbucket_base_url: String,
    pub bitbucket_project_key: String,
    pub bitbucket_token_secret: String,
    pub jira_base_url: String,
    pub jira_token_secret: String,
    pub http_timeout_ms: u64,
    pub provision_max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub secret_cache_ttl_ms: u64,
    pub metrics_listen_addr: String,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("log_level", "info")?
            .set_default("redis_url", "redis://127.0.0.1:6379")?
            .set_default("queue_prefix", "grantpipe:requests")?
            .set_default("queue_poll_interval_ms", 1000)?
            .set_default("queue_lease_ms", 30000)?
            .set_default("queue_sweep_interval_ms", 5000)?
            .set_default("queue_sweep_batch", 50)?
            .set_default("audit_backend", "memory")?
            .set_default("surreal_endpoint", "ws://127.0.0.1:8000")?
            .set_default("surreal_ns", "grantpipe")?
            .set_default("surreal_db", "audit")?
            .set_default("surreal_user", "root")?
            .set_default("surreal_pass", "root")?
            .set_default("bitbucket_base_url", "http://127.0.0.1:7990")?
            .set_default("bitbucket_project_key", "PROJ")?
            .set_default("bitbucket_token_secret", "BITBUCKET_TOKEN")?
            .set_default("jira_base_url", "http://127.0.0.1:8080")?
            .set_default("jira_token_secret", "JIRA_TOKEN")?
            .set_default("http_timeout_ms", 10000)?
            .set_default("provision_max_attempts", 3)?
            .set_default("backoff_base_ms", 1000)?
            .set_default("backoff_max_ms", 60000)?
            .set_default("secret_cache_ttl_ms", 300000)?
            .set_default("metrics_listen_addr", "127.0.0.1:9464")?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        cfg.try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }
}
