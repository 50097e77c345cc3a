use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;

use crate::tunnel::Tunnel;

struct Entry {
    forward: String,
    tunnel: Arc<Tunnel>,
    expires_at: Instant,
}

/// Short-lived memoization from hostname to `(forward, tunnel)` with
/// absolute expiry. No background sweeper — expiry is lazy, checked and
/// evicted on read. Mirrors `pkg/core/route.go`'s `Route`.
#[derive(Default)]
pub struct RouteCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl RouteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, hostname: &str) -> Option<(String, Arc<Tunnel>)> {
        {
            let entries = self.entries.read().await;
            match entries.get(hostname) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some((entry.forward.clone(), entry.tunnel.clone()));
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: upgrade to an exclusive lock and evict.
        let mut entries = self.entries.write().await;
        entries.remove(hostname);
        None
    }

    pub async fn set(&self, hostname: impl Into<String>, forward: String, tunnel: Arc<Tunnel>, expires_at: Instant) {
        self.entries.write().await.insert(
            hostname.into(),
            Entry {
                forward,
                tunnel,
                expires_at,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialer::Direct;
    use std::time::Duration;

    fn tunnel() -> Arc<Tunnel> {
        Tunnel::new("t", Box::new(Direct::new(Duration::from_secs(1))), None, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn returns_cached_entry_before_expiry() {
        let cache = RouteCache::new();
        let tun = tunnel();
        cache
            .set("example.com", "10.0.0.1".to_string(), tun.clone(), Instant::now() + Duration::from_secs(60))
            .await;
        let (forward, got) = cache.get("example.com").await.unwrap();
        assert_eq!(forward, "10.0.0.1");
        assert!(Arc::ptr_eq(&got, &tun));
        tun.close().await;
    }

    #[tokio::test]
    async fn expired_entry_is_absent_and_evicted() {
        let cache = RouteCache::new();
        let tun = tunnel();
        cache
            .set("example.com", "10.0.0.1".to_string(), tun.clone(), Instant::now() - Duration::from_secs(1))
            .await;
        assert!(cache.get("example.com").await.is_none());
        assert!(cache.entries.read().await.is_empty());
        tun.close().await;
    }

    #[tokio::test]
    async fn missing_entry_is_none() {
        let cache = RouteCache::new();
        assert!(cache.get("missing.test").await.is_none());
    }
}
