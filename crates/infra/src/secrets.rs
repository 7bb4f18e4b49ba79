use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use grantpipe_domain::ports::secrets::{SecretError, SecretStore};
use grantpipe_domain::ports::BoxFuture;
use tokio::sync::RwLock;

/// Process-environment credential source; the deployment injects secrets
/// as environment variables.
#[derive(Clone, Default)]
pub struct EnvSecretStore;

impl EnvSecretStore {
    pub fn new() -> Self {
        Self
    }
}

impl SecretStore for EnvSecretStore {
    fn get_secret(&self, name: &str) -> BoxFuture<'_, Result<String, SecretError>> {
        let name = name.to_string();
        Box::pin(async move {
            match std::env::var(&name) {
                Ok(value) if !value.trim().is_empty() => Ok(value),
                _ => Err(SecretError::NotFound(name)),
            }
        })
    }

    fn invalidate(&self, _name: &str) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

#[derive(Clone)]
struct CachedSecret {
    value: String,
    fetched_at: Instant,
}

/// Bounded-lifetime cache in front of a secret source. `invalidate` is
/// the rotation hook: it drops the cached value so the next read fetches
/// the rotated credential.
#[derive(Clone)]
pub struct CachedSecretStore {
    source: Arc<dyn SecretStore>,
    ttl: Duration,
    cache: Arc<RwLock<HashMap<String, CachedSecret>>>,
}

impl CachedSecretStore {
    pub fn new(source: Arc<dyn SecretStore>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl SecretStore for CachedSecretStore {
    fn get_secret(&self, name: &str) -> BoxFuture<'_, Result<String, SecretError>> {
        let name = name.to_string();
        Box::pin(async move {
            {
                let cache = self.cache.read().await;
                if let Some(entry) = cache.get(&name) {
                    if entry.fetched_at.elapsed() < self.ttl {
                        return Ok(entry.value.clone());
                    }
                }
            }
            let value = self.source.get_secret(&name).await?;
            let mut cache = self.cache.write().await;
            cache.insert(
                name,
                CachedSecret {
                    value: value.clone(),
                    fetched_at: Instant::now(),
                },
            );
            Ok(value)
        })
    }

    fn invalidate(&self, name: &str) -> BoxFuture<'_, ()> {
        let name = name.to_string();
        Box::pin(async move {
            self.cache.write().await.remove(&name);
            self.source.invalidate(&name).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSource {
        fetches: AtomicUsize,
    }

    impl SecretStore for CountingSource {
        fn get_secret(&self, _name: &str) -> BoxFuture<'_, Result<String, SecretError>> {
            let count = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move { Ok(format!("credential-{count}")) })
        }

        fn invalidate(&self, _name: &str) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
    }

    #[tokio::test]
    async fn caches_within_ttl() {
        let source = Arc::new(CountingSource::default());
        let store = CachedSecretStore::new(source.clone(), Duration::from_secs(60));
        assert_eq!(store.get_secret("token").await.unwrap(), "credential-1");
        assert_eq!(store.get_secret("token").await.unwrap(), "credential-1");
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_a_refetch() {
        let source = Arc::new(CountingSource::default());
        let store = CachedSecretStore::new(source.clone(), Duration::from_secs(60));
        assert_eq!(store.get_secret("token").await.unwrap(), "credential-1");
        store.invalidate("token").await;
        assert_eq!(store.get_secret("token").await.unwrap(), "credential-2");
    }

    #[tokio::test]
    async fn expired_entries_refetch() {
        let source = Arc::new(CountingSource::default());
        let store = CachedSecretStore::new(source.clone(), Duration::from_millis(1));
        assert_eq!(store.get_secret("token").await.unwrap(), "credential-1");
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(store.get_secret("token").await.unwrap(), "credential-2");
    }
}
