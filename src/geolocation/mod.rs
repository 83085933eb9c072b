//! IP geolocation with an ordered provider fallback chain.

mod providers;

pub use providers::{
    default_providers, IpApiProvider, IpInfoProvider, IpWhoIsProvider, LocationProvider,
    RawLocation,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;

use crate::{
    models::{location::UNKNOWN, Location},
    storage::{read_json, write_json, KeyValueStore, LOCATION_CACHE_KEY},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedLocation {
    location: Location,
    cached_at: DateTime<Utc>,
}

impl CachedLocation {
    fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now.signed_duration_since(self.cached_at) < ttl,
            Err(_) => true,
        }
    }
}

/// Resolves the visitor's location once per TTL window.
///
/// One resolver is meant to be shared by every controller of a process; the
/// in-process memo and the persisted cache entry are both process-wide.
pub struct LocationResolver {
    providers: Vec<Arc<dyn LocationProvider>>,
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
    memo: Mutex<Option<CachedLocation>>,
}

impl LocationResolver {
    pub fn new(
        providers: Vec<Arc<dyn LocationProvider>>,
        store: Arc<dyn KeyValueStore>,
        ttl: Duration,
    ) -> Self {
        Self {
            providers,
            store,
            ttl,
            memo: Mutex::new(None),
        }
    }

    /// Never fails: when every provider fails the result is
    /// [`Location::unknown`].
    pub async fn resolve(&self, browser_timezone: Option<&str>) -> Location {
        // Held across provider calls so concurrent starts share one lookup.
        let mut memo = self.memo.lock().await;
        let now = Utc::now();

        if let Some(cached) = memo.as_ref().filter(|c| c.is_fresh(self.ttl, now)) {
            return cached.location.clone();
        }

        match read_json::<CachedLocation>(self.store.as_ref(), LOCATION_CACHE_KEY) {
            Ok(Some(cached)) if cached.is_fresh(self.ttl, now) => {
                log_debug!("using cached location from {}", cached.location.source);
                let location = cached.location.clone();
                *memo = Some(cached);
                return location;
            }
            Ok(_) => {}
            Err(err) => log_warn!("ignoring unreadable location cache: {err}"),
        }

        for provider in &self.providers {
            match provider.resolve_location().await {
                Ok(raw) => {
                    let location = normalize(raw, provider.name(), browser_timezone);
                    log_info!(
                        "resolved location via {}: {}, {}",
                        provider.name(),
                        location.city,
                        location.country
                    );
                    let entry = CachedLocation {
                        location: location.clone(),
                        cached_at: Utc::now(),
                    };
                    if let Err(err) = write_json(self.store.as_ref(), LOCATION_CACHE_KEY, &entry) {
                        log_warn!("failed to persist location cache: {err}");
                    }
                    *memo = Some(entry);
                    return location;
                }
                Err(err) => log_warn!("location provider {} failed: {err}", provider.name()),
            }
        }

        log_warn!("all location providers failed, using unknown location");
        Location::unknown(browser_timezone)
    }
}

fn normalize(raw: RawLocation, source: &str, browser_timezone: Option<&str>) -> Location {
    let or_unknown = |value: Option<String>| value.unwrap_or_else(|| UNKNOWN.to_string());

    Location {
        ip: raw.ip.unwrap_or_else(|| "unknown".into()),
        country: or_unknown(raw.country),
        country_code: raw.country_code.unwrap_or_else(|| "XX".into()),
        region: or_unknown(raw.region),
        city: or_unknown(raw.city),
        timezone: raw
            .timezone
            .or_else(|| browser_timezone.map(str::to_string))
            .unwrap_or_else(|| "UTC".into()),
        latitude: raw.latitude.unwrap_or(0.0),
        longitude: raw.longitude.unwrap_or(0.0),
        source: source.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::LocationError, storage::MemoryStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeProvider {
        name: &'static str,
        reply: Option<RawLocation>,
        calls: AtomicUsize,
    }

    impl FakeProvider {
        fn new(name: &'static str, reply: Option<RawLocation>) -> Arc<Self> {
            Arc::new(Self {
                name,
                reply,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn chain(providers: &[&Arc<FakeProvider>]) -> Vec<Arc<dyn LocationProvider>> {
        providers
            .iter()
            .map(|p| Arc::clone(p) as Arc<dyn LocationProvider>)
            .collect()
    }

    #[async_trait]
    impl LocationProvider for FakeProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn resolve_location(&self) -> Result<RawLocation, LocationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone().ok_or(LocationError::Unusable {
                provider: self.name,
                reason: "offline".into(),
            })
        }
    }

    fn berlin() -> RawLocation {
        RawLocation {
            ip: Some("192.0.2.7".into()),
            country: Some("Germany".into()),
            country_code: Some("DE".into()),
            city: Some("Berlin".into()),
            ..RawLocation::default()
        }
    }

    fn resolver(providers: Vec<Arc<dyn LocationProvider>>, store: Arc<MemoryStore>) -> LocationResolver {
        LocationResolver::new(providers, store, Duration::from_secs(24 * 60 * 60))
    }

    #[tokio::test]
    async fn falls_through_to_first_working_provider() {
        let broken = FakeProvider::new("broken", None);
        let working = FakeProvider::new("working", Some(berlin()));
        let unused = FakeProvider::new("unused", Some(berlin()));
        let resolver = resolver(
            chain(&[&broken, &working, &unused]),
            Arc::new(MemoryStore::new()),
        );

        let location = resolver.resolve(Some("Europe/Berlin")).await;

        assert_eq!(location.city, "Berlin");
        assert_eq!(location.source, "working");
        assert_eq!(location.region, UNKNOWN);
        // provider omitted timezone
        assert_eq!(location.timezone, "Europe/Berlin");
        assert_eq!((broken.calls(), working.calls(), unused.calls()), (1, 1, 0));
    }

    #[tokio::test]
    async fn memoizes_and_persists_result() {
        let provider = FakeProvider::new("working", Some(berlin()));
        let store = Arc::new(MemoryStore::new());
        let first = resolver(chain(&[&provider]), store.clone());

        first.resolve(None).await;
        first.resolve(None).await;
        assert_eq!(provider.calls(), 1);

        // A second resolver over the same storage reads the cache entry.
        let second = resolver(chain(&[&provider]), store.clone());
        let location = second.resolve(None).await;
        assert_eq!(provider.calls(), 1);
        assert_eq!(location.city, "Berlin");
    }

    #[tokio::test]
    async fn stale_cache_entry_is_refreshed() {
        let provider = FakeProvider::new("working", Some(berlin()));
        let store = Arc::new(MemoryStore::new());
        let stale = CachedLocation {
            location: Location::unknown(None),
            cached_at: Utc::now() - chrono::Duration::hours(25),
        };
        write_json(store.as_ref(), LOCATION_CACHE_KEY, &stale).unwrap();

        let location = resolver(chain(&[&provider]), store).resolve(None).await;

        assert_eq!(provider.calls(), 1);
        assert_eq!(location.city, "Berlin");
    }

    #[tokio::test]
    async fn all_failures_yield_unknown_record() {
        let resolver = resolver(
            chain(&[&FakeProvider::new("a", None), &FakeProvider::new("b", None)]),
            Arc::new(MemoryStore::new()),
        );

        let location = resolver.resolve(Some("Asia/Tokyo")).await;

        assert!(location.is_unknown());
        assert_eq!(location.country, UNKNOWN);
        assert_eq!(location.timezone, "Asia/Tokyo");
    }
}
