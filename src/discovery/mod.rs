//! C7: `ProviderDiscovery`. Tiered provider configuration lookup: static
//! registry, Thunderbird/Mozilla ISPDB XML, DNS MX heuristic, a best-effort
//! hostname-probe heuristic (each tier bounded by a per-tier timeout within
//! an overall discovery budget), then manual setup. Results positively
//! identified by a network tier are cached (`cache.rs`); the static-registry
//! tier is cheap enough it is never cached.
//!
//! The donor has no discovery subsystem at all -- every crate this module
//! leans on (`quick-xml`, `hickory-resolver`, `lru`) is borrowed from
//! `TexasFortress-AI-RustyMail`'s `dashboard/services/autodiscovery.rs`,
//! which is also the direct model for the ISPDB and DNS tiers. The probe
//! tier is grounded on `other_examples/db672e8f_eddiechat-client__.../autodiscovery/probe.rs`.

mod cache;
#[cfg(feature = "dns-discovery")]
mod dns;
mod ispdb;
mod probe;
mod registry;

pub use cache::DiscoveryCache;
pub use registry::StaticProviderRegistry;

use std::time::{Duration, Instant};

use crate::domain::ProviderConfig;
use crate::error::DiscoveryError;

pub struct ProviderDiscovery {
    registry: StaticProviderRegistry,
    cache: DiscoveryCache,
    http: reqwest::Client,
    tier_timeout: Duration,
    probe_timeout: Duration,
    overall_budget: Duration,
}

impl ProviderDiscovery {
    pub fn new(
        tier_timeout: Duration,
        overall_budget: Duration,
        probe_timeout: Duration,
        cache_ttl: Duration,
        cache_capacity: usize,
    ) -> Self {
        Self {
            registry: StaticProviderRegistry::with_builtins(),
            cache: DiscoveryCache::new(cache_capacity, cache_ttl),
            http: reqwest::Client::new(),
            tier_timeout,
            probe_timeout,
            overall_budget,
        }
    }

    /// Runs the tiered lookup for `email`'s domain within `overall_budget`.
    /// Returns `Ok(None)` when no tier -- including the §4.7.1 probe
    /// heuristic -- positively identifies a configuration, meaning tier 4
    /// (manual setup) is the caller's only remaining option. Returns `Err`
    /// only for a malformed email address.
    pub async fn discover(&self, email: &str) -> Result<Option<ProviderConfig>, DiscoveryError> {
        let domain = email.split('@').nth(1).ok_or_else(|| DiscoveryError::InvalidDomain(email.to_string()))?.to_lowercase();

        if let Some(cached) = self.cache.get(&domain).await {
            return Ok(Some(cached));
        }

        let deadline = Instant::now() + self.overall_budget;
        let result = self.discover_uncached(&domain, deadline).await;
        if let Some(config) = &result {
            self.cache.put(domain, config.clone()).await;
        }
        Ok(result)
    }

    async fn discover_uncached(&self, domain: &str, deadline: Instant) -> Option<ProviderConfig> {
        if let Some(config) = self.registry.lookup_by_domain_sync(domain) {
            return Some(config);
        }

        if Instant::now() < deadline {
            if let Ok(Ok(config)) = tokio::time::timeout(self.remaining(deadline), ispdb::lookup(&self.http, domain)).await {
                return Some(config);
            }
        }

        #[cfg(feature = "dns-discovery")]
        let mut dns_fallback = None;
        #[cfg(feature = "dns-discovery")]
        if Instant::now() < deadline {
            if let Ok(Ok(config)) = tokio::time::timeout(self.remaining(deadline), dns::lookup(domain)).await {
                if config.tag != "mx-heuristic" {
                    return Some(config);
                }
                dns_fallback = Some(config);
            }
        }

        if Instant::now() < deadline {
            let probe_budget = self.remaining(deadline).min(self.probe_timeout);
            if let Ok(Ok(config)) = tokio::time::timeout(probe_budget, probe::probe(domain)).await {
                return Some(config);
            }
        }

        #[cfg(feature = "dns-discovery")]
        if let Some(config) = dns_fallback {
            return Some(config);
        }

        None
    }

    fn remaining(&self, deadline: Instant) -> Duration {
        deadline.saturating_duration_since(Instant::now()).min(self.tier_timeout)
    }

    pub async fn clear_cache(&self, domain: Option<&str>) {
        self.cache.clear(domain).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn known_domain_resolves_from_static_registry_without_network() {
        let discovery = ProviderDiscovery::new(
            Duration::from_millis(10),
            Duration::from_millis(10),
            Duration::from_millis(10),
            Duration::from_secs(60),
            10,
        );
        let config = discovery.discover("someone@gmail.com").await.unwrap().unwrap();
        assert_eq!(config.tag, "gmail");
    }

    #[tokio::test]
    async fn second_lookup_for_same_domain_hits_cache() {
        let discovery = ProviderDiscovery::new(
            Duration::from_millis(10),
            Duration::from_millis(10),
            Duration::from_millis(10),
            Duration::from_secs(60),
            10,
        );
        let first = discovery.discover("a@gmail.com").await.unwrap().unwrap();
        let second = discovery.discover("b@gmail.com").await.unwrap().unwrap();
        assert_eq!(first.tag, second.tag);
    }

    #[tokio::test]
    async fn malformed_email_is_a_discovery_error() {
        let discovery = ProviderDiscovery::new(
            Duration::from_millis(10),
            Duration::from_millis(10),
            Duration::from_millis(10),
            Duration::from_secs(60),
            10,
        );
        let result = discovery.discover("not-an-email").await;
        assert!(matches!(result, Err(DiscoveryError::InvalidDomain(_))));
    }
}
