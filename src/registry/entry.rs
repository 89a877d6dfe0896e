use super::objects::RegistryObject;
use std::time::{Duration, Instant};

/// Metadata the registry reports for a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub key: String,
    pub version: u64,
    pub content_type: String,
    /// Lease hint in milliseconds; non-positive means never expire
    pub cachable_duration_ms: Option<i64>,
}

impl RegistryEntry {
    pub fn new(key: impl Into<String>, version: u64, content_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version,
            content_type: content_type.into(),
            cachable_duration_ms: None,
        }
    }

    pub fn with_cachable_duration_ms(mut self, duration_ms: i64) -> Self {
        self.cachable_duration_ms = Some(duration_ms);
        self
    }

    /// Lease to apply, falling back to `default_ms`; `None` means no expiry
    pub fn cachable_duration(&self, default_ms: i64) -> Option<Duration> {
        let millis = self.cachable_duration_ms.unwrap_or(default_ms);
        (millis > 0).then(|| Duration::from_millis(millis as u64))
    }
}

/// Cache state for one key
#[derive(Debug, Clone)]
pub struct Entry {
    key: String,
    value: Option<RegistryObject>,
    version: Option<u64>,
    expiry: Option<Instant>,
    dynamic: bool,
}

impl Entry {
    /// Placeholder for a key resolved through the registry
    pub fn dynamic(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            version: None,
            expiry: None,
            dynamic: true,
        }
    }

    /// Locally defined value that never expires
    pub fn local(key: impl Into<String>, value: RegistryObject) -> Self {
        Self {
            key: key.into(),
            value: Some(value),
            version: None,
            expiry: None,
            dynamic: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> Option<&RegistryObject> {
        self.value.as_ref()
    }

    pub fn version(&self) -> Option<u64> {
        self.version
    }

    pub fn expiry(&self) -> Option<Instant> {
        self.expiry
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn is_cached(&self) -> bool {
        self.value.is_some()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.dynamic && self.expiry.is_some_and(|expiry| now >= expiry)
    }

    /// Store a freshly mapped value, returning the one it replaces
    pub(crate) fn store(
        &mut self,
        value: RegistryObject,
        version: u64,
        lease: Option<Duration>,
        now: Instant,
    ) -> Option<RegistryObject> {
        self.version = Some(version);
        self.expiry = lease.map(|lease| now + lease);
        self.value.replace(value)
    }

    pub(crate) fn extend_lease(&mut self, lease: Option<Duration>, now: Instant) {
        self.expiry = lease.map(|lease| now + lease);
    }

    pub(crate) fn expire_now(&mut self, now: Instant) {
        if self.dynamic {
            self.expiry = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cachable_duration_falls_back_to_default() {
        let entry = RegistryEntry::new("conf:/a", 1, "text/plain");
        assert_eq!(entry.cachable_duration(500), Some(Duration::from_millis(500)));
        assert_eq!(entry.cachable_duration(0), None);

        let pinned = entry.with_cachable_duration_ms(-1);
        assert_eq!(pinned.cachable_duration(500), None);
    }

    #[test]
    fn test_local_entries_never_expire() {
        let now = Instant::now();
        let mut entry = Entry::local("local", RegistryObject::text("v"));
        entry.expire_now(now);
        assert!(!entry.is_expired_at(now + Duration::from_secs(3600)));
        assert!(!entry.is_dynamic());
    }

    #[test]
    fn test_dynamic_entry_expiry() {
        let now = Instant::now();
        let mut entry = Entry::dynamic("conf:/a");
        assert!(!entry.is_cached());

        entry.store(RegistryObject::text("v1"), 3, Some(Duration::from_secs(1)), now);
        assert_eq!(entry.version(), Some(3));
        assert!(!entry.is_expired_at(now));
        assert!(entry.is_expired_at(now + Duration::from_secs(1)));
    }
}
