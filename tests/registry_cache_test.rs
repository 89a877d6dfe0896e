//! Dynamic sequences resolved through the registry cache

mod common;

use common::EngineBuilder;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use synapse_core::mediators::MediatorFactory;
use synapse_core::registry::{
    InMemoryRegistry, MapperRegistry, RegistryCache, RegistryObject, JSON_CONTENT_TYPE,
    SEQUENCE_CONTENT_TYPE,
};
use synapse_core::Outcome;

const AUDIT_KEY: &str = "conf:/sequences/audit";

fn audit_sequence(version: &str) -> String {
    json!({
        "mediators": [
            { "type": "header", "name": "X-Audit-Version", "value": version },
            { "type": "send", "endpoint": "http://backend/services/Audit" }
        ]
    })
    .to_string()
}

fn dynamic_document() -> serde_json::Value {
    json!({
        "dynamicSequences": { "audit": AUDIT_KEY },
        "sequences": [
            { "name": "main", "mediators": [ { "type": "sequence", "key": "audit" } ] }
        ]
    })
}

fn cache_over(registry: &Arc<InMemoryRegistry>) -> Arc<RegistryCache> {
    Arc::new(RegistryCache::new(
        registry.clone(),
        MapperRegistry::with_defaults(Arc::new(MediatorFactory::new())),
    ))
}

fn audit_version(engine: &common::TestEngine) -> String {
    let (outcome, _) = engine.mediate(json!({ "event": "login" }));
    assert!(outcome.is_continue(), "unexpected outcome {outcome:?}");
    let sent = engine.environment.drain_sent();
    assert_eq!(sent.len(), 1);
    sent[0].headers["X-Audit-Version"].as_str().unwrap().to_string()
}

#[test]
fn test_dynamic_sequence_is_fetched_once_and_cached() {
    let registry = Arc::new(InMemoryRegistry::new());
    registry.put(AUDIT_KEY, SEQUENCE_CONTENT_TYPE, audit_sequence("v1"));
    let cache = cache_over(&registry);
    let engine = EngineBuilder::new(dynamic_document())
        .with_registry_cache(cache.clone())
        .build();

    for _ in 0..3 {
        assert_eq!(audit_version(&engine), "v1");
    }

    assert_eq!(registry.content_lookups(), 1);
    let stats = cache.stats();
    assert_eq!(stats.fetches, 1);
    assert_eq!(stats.hits, 2);
    assert!(cache.contains(AUDIT_KEY));
}

#[test]
fn test_new_registry_version_replaces_the_cached_sequence() {
    let registry = Arc::new(InMemoryRegistry::new());
    registry.put(AUDIT_KEY, SEQUENCE_CONTENT_TYPE, audit_sequence("v1"));
    let cache = cache_over(&registry);
    let engine = EngineBuilder::new(dynamic_document())
        .with_registry_cache(cache.clone())
        .build();

    assert_eq!(audit_version(&engine), "v1");
    let first = match cache.get_resource(AUDIT_KEY) {
        Some(RegistryObject::Sequence(sequence)) => sequence,
        other => panic!("expected a sequence, got {other:?}"),
    };

    registry.update(AUDIT_KEY, audit_sequence("v2")).unwrap();
    // still leased, so the old definition keeps serving
    assert_eq!(audit_version(&engine), "v1");

    assert!(cache.expire(AUDIT_KEY));
    assert_eq!(audit_version(&engine), "v2");
    assert!(!first.is_initialized());
    assert_eq!(cache.stats().refreshes, 1);
}

#[test]
fn test_unchanged_version_only_extends_the_lease() {
    let registry = Arc::new(InMemoryRegistry::new());
    registry.put_with_duration(AUDIT_KEY, SEQUENCE_CONTENT_TYPE, audit_sequence("v1"), 20);
    let cache = cache_over(&registry);
    let engine = EngineBuilder::new(dynamic_document())
        .with_registry_cache(cache.clone())
        .build();

    assert_eq!(audit_version(&engine), "v1");
    registry.reset_counters();

    std::thread::sleep(Duration::from_millis(40));
    assert_eq!(audit_version(&engine), "v1");

    assert_eq!(registry.entry_lookups(), 1);
    assert_eq!(registry.content_lookups(), 0);
    assert_eq!(cache.stats().revalidations, 1);
}

#[test]
fn test_unavailable_registry_faults_the_message() {
    let registry = Arc::new(InMemoryRegistry::new());
    registry.put(AUDIT_KEY, SEQUENCE_CONTENT_TYPE, audit_sequence("v1"));
    registry.set_offline(true);
    let cache = cache_over(&registry);
    let engine = EngineBuilder::new(dynamic_document())
        .with_registry_cache(cache.clone())
        .build();

    let (outcome, _) = engine.mediate(json!({}));
    assert!(matches!(outcome, Outcome::Fault(_)));
    assert!(!cache.contains(AUDIT_KEY));
    assert_eq!(cache.stats().failures, 1);

    registry.set_offline(false);
    assert_eq!(audit_version(&engine), "v1");
}

#[test]
fn test_local_entries_are_never_revalidated() {
    let registry = Arc::new(InMemoryRegistry::new());
    registry.put(AUDIT_KEY, JSON_CONTENT_TYPE, r#"{"limit": 10}"#);
    let cache = cache_over(&registry);
    cache.put_local_entry("limits", RegistryObject::json(json!({ "limit": 99 })));

    registry.reset_counters();
    cache.expire("limits");
    let limits = cache.get_resource("limits").unwrap();
    assert_eq!(limits.as_json().unwrap()["limit"], 99);
    assert_eq!(registry.entry_lookups(), 0);

    let remote = cache.get_resource(AUDIT_KEY).unwrap();
    assert_eq!(remote.as_json().unwrap()["limit"], 10);
}
