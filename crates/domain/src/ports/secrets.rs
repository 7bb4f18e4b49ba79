use thiserror::Error;

use super::BoxFuture;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret not found: {0}")]
    NotFound(String),
    #[error("secret store unavailable: {0}")]
    Unavailable(String),
}

/// Credential source. Callers never embed credentials or write them to
/// logs; `invalidate` is the rotation hook.
pub trait SecretStore: Send + Sync {
    fn get_secret(&self, name: &str) -> BoxFuture<'_, Result<String, SecretError>>;

    fn invalidate(&self, name: &str) -> BoxFuture<'_, ()>;
}
