//! End-to-end mediation through configurations built from JSON documents

mod common;

use common::EngineBuilder;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use synapse_core::constants::properties::{ERROR_CODE, ERROR_MEDIATOR};
use synapse_core::mediation::{ConfigurationBuilder, Dispatcher};
use synapse_core::mediators::{BuildError, MediatorFactory};
use synapse_core::{Outcome, SynapseEnvironment};

fn routing_document() -> serde_json::Value {
    json!({
        "sequences": [
            {
                "name": "main",
                "mediators": [
                    { "type": "in", "mediators": [
                        { "type": "property", "name": "symbol", "value": "/symbol" },
                        { "type": "switch", "source": "$ctx:symbol",
                          "cases": [
                              { "regex": "IBM|MSFT", "mediators": [ { "type": "sequence", "key": "quotes" } ] }
                          ],
                          "default": { "mediators": [
                              { "type": "log", "level": "simple" },
                              { "type": "drop" }
                          ] } }
                    ] },
                    { "type": "out", "mediators": [
                        { "type": "header", "name": "X-Mediated", "value": "yes" },
                        { "type": "send" }
                    ] }
                ]
            },
            {
                "name": "quotes",
                "mediators": [
                    { "type": "header", "name": "X-Symbol", "value": "$ctx:symbol" },
                    { "type": "send", "endpoint": "http://backend/services/StockQuote" }
                ]
            }
        ]
    })
}

#[test]
fn test_matching_requests_are_routed_to_the_backend() {
    let engine = EngineBuilder::new(routing_document()).build();

    let (outcome, _) = engine.mediate(json!({ "symbol": "IBM" }));
    assert!(outcome.is_continue());

    let sent = engine.environment.drain_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].to.as_ref().unwrap().address(),
        "http://backend/services/StockQuote"
    );
    assert_eq!(sent[0].headers["X-Symbol"], "IBM");
}

#[test]
fn test_unmatched_requests_fall_through_to_default() {
    let engine = EngineBuilder::new(routing_document()).build();

    let (outcome, _) = engine.mediate(json!({ "symbol": "ACME" }));
    assert_eq!(outcome, Outcome::Stop);
    assert_eq!(engine.environment.sent_count(), 0);
}

#[test]
fn test_responses_take_the_out_path() {
    let engine = EngineBuilder::new(routing_document()).build();

    let mut response = engine.engine.create_message_context();
    response.payload = json!({ "price": 101.5 });
    response.reply_to = Some("http://client/callback".into());
    response.to = Some("http://client/callback".into());
    response.set_response(true);

    assert!(engine.engine.mediate(&mut response).is_continue());
    let sent = engine.environment.drain_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].headers["X-Mediated"], "yes");
    assert!(sent[0].headers.get("X-Symbol").is_none());
}

#[test]
fn test_faults_run_the_configured_fault_sequence() {
    let engine = EngineBuilder::new(json!({
        "faultSequence": "errors",
        "sequences": [
            { "name": "main", "mediators": [
                { "type": "iterate", "expression": "/items", "target": { "sequence": "noop" } }
            ] },
            { "name": "noop", "mediators": [] },
            { "name": "errors", "mediators": [
                { "type": "property", "name": "handled", "value": "true" },
                { "type": "makefault", "code": "Client", "reason": "$ctx:ERROR_MESSAGE" },
                { "type": "send" }
            ] }
        ]
    }))
    .build();

    let mut request = engine.engine.create_message_context();
    request.payload = json!({ "items": "not an array" });
    request.reply_to = Some("http://client/replies".into());

    let outcome = engine.engine.mediate(&mut request);
    assert_eq!(outcome, Outcome::Stop);
    assert_eq!(
        request.get_property_string(ERROR_MEDIATOR).as_deref(),
        Some("iterate")
    );
    assert!(request.get_property(ERROR_CODE).is_some());
    assert_eq!(request.get_property_string("handled").as_deref(), Some("true"));

    let sent = engine.environment.drain_sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].is_fault());
    assert_eq!(sent[0].to.as_ref().unwrap().address(), "http://client/replies");
    assert_eq!(sent[0].payload["Fault"]["faultcode"], "Client");
}

#[test]
fn test_sequence_error_handler_takes_precedence() {
    let engine = EngineBuilder::new(json!({
        "sequences": [
            { "name": "main", "mediators": [ { "type": "sequence", "key": "risky" } ] },
            { "name": "risky",
              "onError": { "mediators": [ { "type": "property", "name": "recovered", "value": "inline" } ] },
              "mediators": [
                  { "type": "iterate", "expression": "/missing", "target": { "sequence": "risky" } }
              ] },
            { "name": "fault", "mediators": [ { "type": "property", "name": "recovered", "value": "global" } ] }
        ]
    }))
    .build();

    let (outcome, ctx) = engine.mediate(json!({}));
    assert_eq!(outcome, Outcome::Stop);
    assert_eq!(ctx.get_property_string("recovered").as_deref(), Some("inline"));
}

#[test]
fn test_filter_branches_on_payload() {
    let engine = EngineBuilder::new(json!({
        "sequences": [
            { "name": "main", "mediators": [
                { "type": "filter", "source": "/priority", "regex": "^high$",
                  "then": [ { "type": "property", "name": "lane", "value": "express" } ],
                  "else": [ { "type": "property", "name": "lane", "value": "standard" } ] }
            ] }
        ]
    }))
    .build();

    let (_, urgent) = engine.mediate(json!({ "priority": "high" }));
    assert_eq!(urgent.get_property_string("lane").as_deref(), Some("express"));

    let (_, routine) = engine.mediate(json!({ "priority": "low" }));
    assert_eq!(routine.get_property_string("lane").as_deref(), Some("standard"));
}

#[test]
fn test_global_properties_are_shared_across_messages() {
    let engine = EngineBuilder::new(json!({
        "properties": { "region": "eu-west" },
        "sequences": [
            { "name": "main", "mediators": [
                { "type": "property", "name": "seen", "value": "$ctx:region", "scope": "global" }
            ] }
        ]
    }))
    .build();

    let (_, first) = engine.mediate(json!({}));
    assert_eq!(first.get_property_string("region").as_deref(), Some("eu-west"));

    let (_, second) = engine.mediate(json!({}));
    assert_eq!(second.get_property_string("seen").as_deref(), Some("eu-west"));
}

#[test]
fn test_builder_rejects_dangling_references() {
    let document = json!({
        "sequences": [
            { "name": "main", "mediators": [ { "type": "sequence", "key": "nowhere" } ] }
        ]
    });
    let err = ConfigurationBuilder::from_json(&document, &MediatorFactory::new()).unwrap_err();
    assert!(matches!(err, BuildError::DanglingReference { ref name, .. } if name == "nowhere"));
}

#[test]
fn test_builder_rejects_duplicate_and_unknown_definitions() {
    let factory = MediatorFactory::new();
    let duplicate = json!({
        "sequences": [
            { "name": "main", "mediators": [] },
            { "name": "main", "mediators": [] }
        ]
    });
    assert!(matches!(
        ConfigurationBuilder::from_json(&duplicate, &factory),
        Err(BuildError::DuplicateDefinition { .. })
    ));

    let unknown = json!({
        "sequences": [ { "name": "main", "mediators": [ { "type": "teleport" } ] } ]
    });
    assert!(matches!(
        ConfigurationBuilder::from_json(&unknown, &factory),
        Err(BuildError::UnknownMediator { ref tag }) if tag == "teleport"
    ));
}

#[tokio::test]
async fn test_dispatcher_mediates_concurrently() {
    let harness = EngineBuilder::new(json!({
        "sequences": [
            { "name": "main", "mediators": [
                { "type": "send", "endpoint": "http://backend/services/Orders" }
            ] }
        ]
    }))
    .build();
    let environment = Arc::clone(&harness.environment);
    let dispatcher = Dispatcher::new(Arc::new(harness.engine), 4);

    let handles: Vec<_> = (0..20)
        .map(|n| {
            let mut ctx = environment.create_message_context();
            ctx.payload = json!({ "n": n });
            dispatcher.spawn(ctx)
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().unwrap().is_continue());
    }

    let stats = dispatcher.stats();
    assert_eq!(stats.processed, 20);
    assert_eq!(stats.faulted, 0);
    assert_eq!(stats.available_capacity, 4);
    assert_eq!(environment.sent_count(), 20);
}

#[tokio::test]
async fn test_dispatcher_drains_injected_messages() {
    let harness = EngineBuilder::new(json!({
        "sequences": [
            { "name": "main", "mediators": [ { "type": "log", "level": "simple" }, { "type": "send", "endpoint": "http://backend/echo" } ] }
        ]
    }))
    .build();
    let environment = Arc::clone(&harness.environment);
    let engine = Arc::new(harness.engine);
    let dispatcher = Dispatcher::new(Arc::clone(&engine), 2);

    for n in 0..5 {
        let mut ctx = engine.create_message_context();
        ctx.payload = json!({ "n": n });
        environment.inject_message(ctx).unwrap();
    }

    let runner = {
        let dispatcher = dispatcher.clone();
        let injected = environment.injected();
        tokio::spawn(async move { dispatcher.run(injected).await })
    };

    for delivered in 0..5 {
        let environment = Arc::clone(&environment);
        let next = tokio::task::spawn_blocking(move || {
            environment.recv_sent_timeout(Duration::from_secs(2))
        })
        .await
        .unwrap();
        assert!(next.is_some(), "dispatcher stalled after {delivered} messages");
    }

    dispatcher.shutdown();
    let dispatched = runner.await.unwrap();
    assert_eq!(dispatched, 5);
}
