use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

/// Configuration-level property store shared by every message context
///
/// Message contexts hold a handle to this store and fall back to it when a
/// property is not set locally. The handle is injected, never global.
#[derive(Debug, Clone, Default)]
pub struct GlobalProperties {
    inner: Arc<DashMap<String, Arc<Value>>>,
}

impl GlobalProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Arc<Value>> {
        self.inner.get(key).map(|entry| entry.value().clone())
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.insert(key.into(), Arc::new(value.into()));
    }

    pub fn remove(&self, key: &str) -> Option<Arc<Value>> {
        self.inner.remove(key).map(|(_, value)| value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handles_share_state() {
        let properties = GlobalProperties::new();
        let handle = properties.clone();

        handle.set("endpoint", json!("http://localhost"));
        assert_eq!(*properties.get("endpoint").unwrap(), json!("http://localhost"));
        assert_eq!(properties.len(), 1);

        properties.remove("endpoint");
        assert!(handle.is_empty());
    }
}
