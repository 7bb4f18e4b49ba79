pub mod audit;
pub mod bitbucket;
pub mod config;
pub mod jira;
pub mod logging;
pub mod queue;
pub mod secrets;
