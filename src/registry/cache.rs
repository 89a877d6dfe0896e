//! # Registry Cache
//!
//! Expiry-and-revalidate cache in front of a [`Registry`].
//!
//! - cached and fresh: returned without any registry I/O
//! - not cached: content and metadata fetched, mapped by content type, cached
//!   with `expiry = now + cachable duration` (no expiry when non-positive)
//! - expired: metadata only; an unchanged version extends the lease, a new
//!   version is refetched and replaces the value. A replaced sequence is
//!   destroyed so references holding it re-resolve.
//!
//! Each key has its own lock, held across the registry round trip, so
//! concurrent lookups of one key never fetch twice.

use super::entry::{Entry, RegistryEntry};
use super::errors::{RegistryError, RegistryResult};
use super::mapper::MapperRegistry;
use super::objects::RegistryObject;
use super::traits::Registry;
use crate::config::{CircuitBreakerSettings, RegistryConfig};
use crate::logging::log_registry_operation;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    fetches: AtomicU64,
    revalidations: AtomicU64,
    refreshes: AtomicU64,
    failures: AtomicU64,
}

/// Statistics about the registry cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryCacheStats {
    pub cached_entries: usize,
    pub hits: u64,
    pub fetches: u64,
    pub revalidations: u64,
    pub refreshes: u64,
    pub failures: u64,
}

#[derive(Debug)]
pub struct RegistryCache {
    registry: Arc<dyn Registry>,
    mappers: MapperRegistry,
    entries: DashMap<String, Arc<Mutex<Entry>>>,
    breaker: Option<CircuitBreaker>,
    default_cachable_duration_ms: i64,
    counters: CacheCounters,
}

impl RegistryCache {
    pub fn new(registry: Arc<dyn Registry>, mappers: MapperRegistry) -> Self {
        Self::from_config(
            registry,
            mappers,
            &RegistryConfig::default(),
            &CircuitBreakerSettings::default(),
        )
    }

    pub fn from_config(
        registry: Arc<dyn Registry>,
        mappers: MapperRegistry,
        config: &RegistryConfig,
        breaker: &CircuitBreakerSettings,
    ) -> Self {
        let breaker = breaker.enabled.then(|| {
            CircuitBreaker::new("registry".to_string(), CircuitBreakerConfig::from(breaker))
        });
        Self {
            registry,
            mappers,
            entries: DashMap::new(),
            breaker,
            default_cachable_duration_ms: config.default_cachable_duration_ms,
            counters: CacheCounters::default(),
        }
    }

    pub fn with_default_cachable_duration_ms(mut self, duration_ms: i64) -> Self {
        self.default_cachable_duration_ms = duration_ms;
        self
    }

    pub fn circuit_breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_ref()
    }

    /// Resolve `key`, fetching or revalidating as needed
    ///
    /// Registry failures are logged and reported as `None`.
    pub fn get_resource(&self, key: &str) -> Option<RegistryObject> {
        match self.try_get_resource(key) {
            Ok(object) => Some(object),
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "⚠️ Registry resource unavailable");
                None
            }
        }
    }

    /// Like [`get_resource`](Self::get_resource) but surfacing the failure
    pub fn try_get_resource(&self, key: &str) -> RegistryResult<RegistryObject> {
        let slot = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Entry::dynamic(key))))
            .clone();

        let result = {
            let mut entry = slot.lock();
            self.resolve(&mut entry)
        };

        if result.is_err() {
            // Drop placeholders that never held a value
            self.entries.remove_if(key, |_, current| {
                Arc::ptr_eq(current, &slot) && !current.lock().is_cached()
            });
        }
        result
    }

    fn resolve(&self, entry: &mut Entry) -> RegistryResult<RegistryObject> {
        let now = Instant::now();

        if !entry.is_cached() {
            return self.fetch(entry, now);
        }
        if !entry.is_expired_at(now) {
            if let Some(value) = entry.value() {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(value.clone());
            }
        }

        self.revalidate(entry, now)
    }

    fn fetch(&self, entry: &mut Entry, now: Instant) -> RegistryResult<RegistryObject> {
        let key = entry.key().to_string();
        let metadata = self.guarded(|| self.registry.lookup_entry(&key))?;
        let object = self.load(&key)?;
        self.counters.fetches.fetch_add(1, Ordering::Relaxed);

        entry.store(object.clone(), metadata.version, self.lease(&metadata), now);
        log_registry_operation("fetch", &key, Some(metadata.version), "cached", Some(object.kind()));
        Ok(object)
    }

    fn revalidate(&self, entry: &mut Entry, now: Instant) -> RegistryResult<RegistryObject> {
        let key = entry.key().to_string();
        let metadata = self.guarded(|| self.registry.lookup_entry(&key))?;
        self.counters.revalidations.fetch_add(1, Ordering::Relaxed);

        if entry.version() == Some(metadata.version) {
            entry.extend_lease(self.lease(&metadata), now);
            debug!(key = %key, version = metadata.version, "Registry version unchanged, lease extended");
            return entry
                .value()
                .cloned()
                .ok_or_else(|| RegistryError::NotFound { key: key.clone() });
        }

        let object = self.load(&key)?;
        self.counters.refreshes.fetch_add(1, Ordering::Relaxed);
        let previous = entry.store(object.clone(), metadata.version, self.lease(&metadata), now);
        if let Some(previous) = previous {
            retire(&key, &previous, &object);
        }

        info!(
            key = %key,
            version = metadata.version,
            "🔄 Registry resource refreshed"
        );
        Ok(object)
    }

    fn load(&self, key: &str) -> RegistryResult<RegistryObject> {
        let raw = self.guarded(|| self.registry.lookup_content(key))?;
        self.mappers.map(&raw)
    }

    fn lease(&self, metadata: &RegistryEntry) -> Option<std::time::Duration> {
        metadata.cachable_duration(self.default_cachable_duration_ms)
    }

    /// Run a registry call through the breaker; only unavailability trips it
    fn guarded<T>(&self, op: impl FnOnce() -> RegistryResult<T>) -> RegistryResult<T> {
        let Some(breaker) = &self.breaker else {
            return op();
        };

        let outcome = breaker.call(|| match op() {
            Err(e) if e.is_transient() => Err(e),
            other => Ok(other),
        });
        match outcome {
            Ok(result) => result,
            Err(CircuitBreakerError::CircuitOpen { component }) => {
                Err(RegistryError::CircuitOpen { component })
            }
            Err(CircuitBreakerError::OperationFailed(e)) => Err(e),
        }
    }

    /// Define a static entry that is never revalidated
    pub fn put_local_entry(&self, key: impl Into<String>, value: RegistryObject) {
        let key = key.into();
        let previous = self
            .entries
            .insert(key.clone(), Arc::new(Mutex::new(Entry::local(key.clone(), value.clone()))));

        if let Some(previous) = previous {
            if let Some(old) = previous.lock().value() {
                retire(&key, old, &value);
            }
        }
        log_registry_operation("put_local_entry", &key, None, "stored", Some(value.kind()));
    }

    /// Snapshot of the cache state for `key`
    pub fn entry(&self, key: &str) -> Option<Entry> {
        let slot = self.entries.get(key)?.clone();
        let entry = slot.lock().clone();
        Some(entry)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|slot| slot.lock().is_cached())
    }

    /// Force revalidation of `key` on its next lookup
    pub fn expire(&self, key: &str) -> bool {
        let Some(slot) = self.entries.get(key).map(|slot| slot.clone()) else {
            return false;
        };
        let mut entry = slot.lock();
        let dynamic = entry.is_dynamic();
        entry.expire_now(Instant::now());
        dynamic
    }

    /// Drop `key` from the cache, destroying a cached sequence
    pub fn invalidate(&self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some((_, slot)) => {
                if let Some(RegistryObject::Sequence(sequence)) = slot.lock().value() {
                    sequence.destroy();
                }
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        let count = self.entries.len();
        self.entries.clear();
        info!(entries = count, "Registry cache cleared");
    }

    pub fn stats(&self) -> RegistryCacheStats {
        RegistryCacheStats {
            cached_entries: self
                .entries
                .iter()
                .filter(|slot| slot.value().lock().is_cached())
                .count(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            revalidations: self.counters.revalidations.load(Ordering::Relaxed),
            refreshes: self.counters.refreshes.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }
}

/// Mark a replaced sequence de-initialized
fn retire(key: &str, previous: &RegistryObject, replacement: &RegistryObject) {
    if previous.ptr_eq(replacement) {
        return;
    }
    if let RegistryObject::Sequence(sequence) = previous {
        sequence.destroy();
        debug!(key = %key, "Replaced sequence de-initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::in_memory::InMemoryRegistry;
    use crate::registry::mapper::{JSON_CONTENT_TYPE, SEQUENCE_CONTENT_TYPE, TEXT_CONTENT_TYPE};
    use crate::mediators::MediatorFactory;
    use serde_json::json;
    use std::time::Duration;

    fn cache_over(registry: Arc<InMemoryRegistry>) -> RegistryCache {
        RegistryCache::new(
            registry,
            MapperRegistry::with_defaults(Arc::new(MediatorFactory::new())),
        )
    }

    #[test]
    fn test_fresh_entry_served_without_io() {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.put_with_duration("conf:/a", JSON_CONTENT_TYPE, r#"{"v": 1}"#, 60_000);
        let cache = cache_over(Arc::clone(&registry));

        let first = cache.get_resource("conf:/a").unwrap();
        let second = cache.get_resource("conf:/a").unwrap();

        assert!(first.ptr_eq(&second));
        assert_eq!(registry.entry_lookups(), 1);
        assert_eq!(registry.content_lookups(), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_unchanged_version_extends_lease_without_reparse() {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.put_with_duration("conf:/a", TEXT_CONTENT_TYPE, "hello", 60_000);
        let cache = cache_over(Arc::clone(&registry));

        let first = cache.get_resource("conf:/a").unwrap();
        assert!(cache.expire("conf:/a"));
        let second = cache.get_resource("conf:/a").unwrap();

        assert!(first.ptr_eq(&second));
        assert_eq!(registry.content_lookups(), 1);
        assert_eq!(registry.entry_lookups(), 2);
        assert!(!cache.entry("conf:/a").unwrap().is_expired());
    }

    #[test]
    fn test_new_version_replaces_and_destroys_sequence() {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.put_with_duration(
            "conf:/seq",
            SEQUENCE_CONTENT_TYPE,
            r#"{"mediators": [{"type": "drop"}]}"#,
            60_000,
        );
        let cache = cache_over(Arc::clone(&registry));

        let old = cache.get_resource("conf:/seq").unwrap();
        registry
            .update("conf:/seq", r#"{"mediators": [{"type": "log"}, {"type": "drop"}]}"#)
            .unwrap();
        cache.expire("conf:/seq");
        let new = cache.get_resource("conf:/seq").unwrap();

        assert!(!old.ptr_eq(&new));
        assert!(!old.as_sequence().unwrap().is_initialized());
        assert_eq!(new.as_sequence().unwrap().children().len(), 2);
        assert_eq!(cache.entry("conf:/seq").unwrap().version(), Some(2));
    }

    #[test]
    fn test_non_positive_duration_never_expires() {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.put_with_duration("conf:/a", TEXT_CONTENT_TYPE, "x", 0);
        let cache = cache_over(Arc::clone(&registry));

        cache.get_resource("conf:/a").unwrap();
        assert_eq!(cache.entry("conf:/a").unwrap().expiry(), None);
        cache.get_resource("conf:/a").unwrap();
        assert_eq!(registry.entry_lookups(), 1);
    }

    #[test]
    fn test_transient_failure_is_unavailable_and_placeholder_dropped() {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.put("conf:/a", TEXT_CONTENT_TYPE, "x");
        registry.set_offline(true);
        let cache = cache_over(Arc::clone(&registry));

        assert!(cache.get_resource("conf:/a").is_none());
        assert!(cache.entry("conf:/a").is_none());
        assert_eq!(cache.stats().failures, 1);

        registry.set_offline(false);
        assert!(cache.get_resource("conf:/a").is_some());
    }

    #[test]
    fn test_breaker_opens_after_repeated_unavailability() {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.put("conf:/a", TEXT_CONTENT_TYPE, "x");
        registry.set_offline(true);
        let settings = CircuitBreakerSettings {
            enabled: true,
            failure_threshold: 2,
            timeout_seconds: 60,
            success_threshold: 1,
        };
        let cache = RegistryCache::from_config(
            registry.clone(),
            MapperRegistry::with_builtin(),
            &RegistryConfig::default(),
            &settings,
        );

        for _ in 0..2 {
            assert!(cache.get_resource("conf:/a").is_none());
        }
        let lookups = registry.entry_lookups();
        assert!(matches!(
            cache.try_get_resource("conf:/a"),
            Err(RegistryError::CircuitOpen { .. })
        ));
        assert_eq!(registry.entry_lookups(), lookups);
    }

    #[test]
    fn test_missing_key_does_not_trip_breaker() {
        let registry = Arc::new(InMemoryRegistry::new());
        let cache = cache_over(registry);
        for _ in 0..10 {
            assert!(matches!(
                cache.try_get_resource("conf:/missing"),
                Err(RegistryError::NotFound { .. })
            ));
        }
        assert_eq!(cache.circuit_breaker().unwrap().metrics().failure_count, 0);
    }

    #[test]
    fn test_local_entries_are_static() {
        let registry = Arc::new(InMemoryRegistry::new());
        let cache = cache_over(Arc::clone(&registry));
        cache.put_local_entry("endpoint.url", RegistryObject::json(json!({"url": "http://x"})));

        assert!(!cache.expire("endpoint.url"));
        assert!(cache.get_resource("endpoint.url").is_some());
        assert_eq!(registry.entry_lookups(), 0);
    }

    #[test]
    fn test_lease_expires_by_time() {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.put_with_duration("conf:/a", TEXT_CONTENT_TYPE, "x", 10);
        let cache = cache_over(Arc::clone(&registry));

        cache.get_resource("conf:/a");
        std::thread::sleep(Duration::from_millis(20));
        cache.get_resource("conf:/a");
        assert_eq!(registry.entry_lookups(), 2);
        assert_eq!(cache.stats().revalidations, 1);
    }
}
