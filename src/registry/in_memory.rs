use super::entry::RegistryEntry;
use super::errors::{RegistryError, RegistryResult};
use super::traits::{RawResource, Registry};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredResource {
    version: u64,
    content_type: String,
    body: String,
    cachable_duration_ms: Option<i64>,
}

/// Registry held in memory, with lookup counters for observing cache behaviour
///
/// Every `put` or `update` of an existing key bumps its version.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    resources: DashMap<String, StoredResource>,
    offline: AtomicBool,
    entry_lookups: AtomicU64,
    content_lookups: AtomicU64,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `body` under `key`, returning the new version
    pub fn put(
        &self,
        key: impl Into<String>,
        content_type: impl Into<String>,
        body: impl Into<String>,
    ) -> u64 {
        self.store(key.into(), content_type.into(), body.into(), None)
    }

    /// Store with an explicit lease hint in milliseconds
    pub fn put_with_duration(
        &self,
        key: impl Into<String>,
        content_type: impl Into<String>,
        body: impl Into<String>,
        cachable_duration_ms: i64,
    ) -> u64 {
        self.store(
            key.into(),
            content_type.into(),
            body.into(),
            Some(cachable_duration_ms),
        )
    }

    fn store(
        &self,
        key: String,
        content_type: String,
        body: String,
        cachable_duration_ms: Option<i64>,
    ) -> u64 {
        let mut slot = self.resources.entry(key.clone()).or_insert(StoredResource {
            version: 0,
            content_type: content_type.clone(),
            body: String::new(),
            cachable_duration_ms,
        });
        slot.version += 1;
        slot.content_type = content_type;
        slot.body = body;
        slot.cachable_duration_ms = cachable_duration_ms;
        debug!(key = %key, version = slot.version, "Registry resource stored");
        slot.version
    }

    /// Replace the content of an existing key, keeping its content type
    pub fn update(&self, key: &str, body: impl Into<String>) -> RegistryResult<u64> {
        let mut slot = self
            .resources
            .get_mut(key)
            .ok_or_else(|| RegistryError::NotFound {
                key: key.to_string(),
            })?;
        slot.version += 1;
        slot.body = body.into();
        Ok(slot.version)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.resources.remove(key).is_some()
    }

    pub fn version(&self, key: &str) -> Option<u64> {
        self.resources.get(key).map(|slot| slot.version)
    }

    /// Simulate an unreachable backend
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    pub fn entry_lookups(&self) -> u64 {
        self.entry_lookups.load(Ordering::Acquire)
    }

    pub fn content_lookups(&self) -> u64 {
        self.content_lookups.load(Ordering::Acquire)
    }

    pub fn reset_counters(&self) {
        self.entry_lookups.store(0, Ordering::Release);
        self.content_lookups.store(0, Ordering::Release);
    }

    fn ensure_online(&self) -> RegistryResult<()> {
        if self.offline.load(Ordering::Acquire) {
            Err(RegistryError::Unavailable {
                reason: "registry offline".to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn stored(&self, key: &str) -> RegistryResult<StoredResource> {
        self.resources
            .get(key)
            .map(|slot| slot.clone())
            .ok_or_else(|| RegistryError::NotFound {
                key: key.to_string(),
            })
    }
}

impl Registry for InMemoryRegistry {
    fn lookup_entry(&self, key: &str) -> RegistryResult<RegistryEntry> {
        self.entry_lookups.fetch_add(1, Ordering::AcqRel);
        self.ensure_online()?;
        let stored = self.stored(key)?;
        Ok(RegistryEntry {
            key: key.to_string(),
            version: stored.version,
            content_type: stored.content_type,
            cachable_duration_ms: stored.cachable_duration_ms,
        })
    }

    fn lookup_content(&self, key: &str) -> RegistryResult<RawResource> {
        self.content_lookups.fetch_add(1, Ordering::AcqRel);
        self.ensure_online()?;
        let stored = self.stored(key)?;
        Ok(RawResource::new(key, stored.content_type, stored.body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_increase_on_every_write() {
        let registry = InMemoryRegistry::new();
        assert_eq!(registry.put("conf:/a", "text/plain", "one"), 1);
        assert_eq!(registry.update("conf:/a", "two").unwrap(), 2);
        assert_eq!(registry.put("conf:/a", "text/plain", "three"), 3);

        let entry = registry.lookup_entry("conf:/a").unwrap();
        assert_eq!(entry.version, 3);
        assert_eq!(registry.lookup_content("conf:/a").unwrap().body, "three");
        assert_eq!(registry.entry_lookups(), 1);
        assert_eq!(registry.content_lookups(), 1);
    }

    #[test]
    fn test_update_of_missing_key_fails() {
        let registry = InMemoryRegistry::new();
        assert!(matches!(
            registry.update("conf:/missing", "x"),
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_offline_registry_is_unavailable() {
        let registry = InMemoryRegistry::new();
        registry.put("conf:/a", "text/plain", "one");
        registry.set_offline(true);
        let err = registry.lookup_entry("conf:/a").unwrap_err();
        assert!(err.is_transient());
    }
}
