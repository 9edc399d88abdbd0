//! Per-domain result cache: bounded LRU with a TTL checked on read.
//! Grounded on the `lru` crate usage pattern already in the donor's
//! dependency table indirectly (pulled in here for the first time; no
//! donor module caches anything keyed by string with eviction, so this is
//! new code following `lru::LruCache`'s own documented idiom).

use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use lru::LruCache;

use crate::domain::ProviderConfig;

struct Entry {
    config: ProviderConfig,
    inserted_at: Instant,
}

pub struct DiscoveryCache {
    inner: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
}

impl DiscoveryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = std::num::NonZeroUsize::new(capacity.max(1)).unwrap();
        Self { inner: Mutex::new(LruCache::new(capacity)), ttl }
    }

    pub async fn get(&self, domain: &str) -> Option<ProviderConfig> {
        let mut cache = self.inner.lock().await;
        match cache.get(domain) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.config.clone()),
            Some(_) => {
                cache.pop(domain);
                None
            }
            None => None,
        }
    }

    /// Insert/refresh an entry. `LruCache::put` evicts the least-recently-used
    /// entry itself once `capacity` is exceeded.
    pub async fn put(&self, domain: String, config: ProviderConfig) {
        let mut cache = self.inner.lock().await;
        cache.put(domain, Entry { config, inserted_at: Instant::now() });
    }

    /// Evict one domain, or every entry when `domain` is `None`.
    pub async fn clear(&self, domain: Option<&str>) {
        let mut cache = self.inner.lock().await;
        match domain {
            Some(d) => {
                cache.pop(d);
            }
            None => cache.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArchiveBehavior, ConnectionSecurity};
    use crate::domain::provider::ProviderAuthMethod;

    fn dummy(tag: &str) -> ProviderConfig {
        ProviderConfig {
            tag: tag.to_string(),
            imap_host: "imap.example.com".into(),
            imap_port: 993,
            imap_security: ConnectionSecurity::Tls,
            smtp_host: "smtp.example.com".into(),
            smtp_port: 587,
            smtp_security: ConnectionSecurity::Starttls,
            auth_method: ProviderAuthMethod::Plain,
            archive_behavior: ArchiveBehavior::CopyToArchive,
            requires_sent_append: true,
            idle_refresh_secs: 1500,
            max_connections: 5,
        }
    }

    #[tokio::test]
    async fn hit_then_expiry() {
        let cache = DiscoveryCache::new(10, Duration::from_millis(20));
        cache.put("example.com".into(), dummy("example")).await;
        assert!(cache.get("example.com").await.is_some());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("example.com").await.is_none());
    }

    #[tokio::test]
    async fn eviction_on_capacity_overflow() {
        let cache = DiscoveryCache::new(2, Duration::from_secs(60));
        cache.put("a.com".into(), dummy("a")).await;
        cache.put("b.com".into(), dummy("b")).await;
        cache.put("c.com".into(), dummy("c")).await;
        // "a.com" was least-recently-used and should have been evicted.
        assert!(cache.get("a.com").await.is_none());
        assert!(cache.get("b.com").await.is_some());
        assert!(cache.get("c.com").await.is_some());
    }

    #[tokio::test]
    async fn clear_single_domain() {
        let cache = DiscoveryCache::new(10, Duration::from_secs(60));
        cache.put("a.com".into(), dummy("a")).await;
        cache.put("b.com".into(), dummy("b")).await;
        cache.clear(Some("a.com")).await;
        assert!(cache.get("a.com").await.is_none());
        assert!(cache.get("b.com").await.is_some());
    }
}
