//! Shared fixtures for the integration tests: mediation engines built from
//! JSON documents and a reliable messaging loopback pairing a sender with a
//! destination over in-memory channels.

#![allow(dead_code)]

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use synapse_core::environment::InMemoryEnvironment;
use synapse_core::mediation::{ConfigurationBuilder, MediationEngine, MediationEnv};
use synapse_core::mediators::MediatorFactory;
use synapse_core::message::MessageContext;
use synapse_core::registry::RegistryCache;
use synapse_core::rm::{
    ChannelTransport, ReliableSender, RmMessageReceiver, RmPolicy, StorageManager,
};
use tokio::sync::mpsc::UnboundedReceiver;

/// Engine plus the environment recording its traffic
pub struct TestEngine {
    pub engine: MediationEngine,
    pub environment: Arc<InMemoryEnvironment>,
}

impl TestEngine {
    pub fn mediate(&self, payload: Value) -> (synapse_core::Outcome, MessageContext) {
        let mut ctx = self.engine.create_message_context();
        ctx.payload = payload;
        let outcome = self.engine.mediate(&mut ctx);
        (outcome, ctx)
    }

    pub fn env(&self) -> &MediationEnv {
        self.engine.env()
    }
}

/// Builder for engines over a JSON configuration document
pub struct EngineBuilder {
    document: Value,
    registry_cache: Option<Arc<RegistryCache>>,
    factory: MediatorFactory,
}

impl EngineBuilder {
    pub fn new(document: Value) -> Self {
        Self {
            document,
            registry_cache: None,
            factory: MediatorFactory::new(),
        }
    }

    pub fn with_registry_cache(mut self, cache: Arc<RegistryCache>) -> Self {
        self.registry_cache = Some(cache);
        self
    }

    pub fn build(self) -> TestEngine {
        synapse_core::logging::init_structured_logging();
        let mut builder = ConfigurationBuilder::new(&self.factory);
        if let Some(cache) = self.registry_cache {
            builder = builder.with_registry_cache(cache);
        }
        let config = builder
            .build(&self.document)
            .expect("configuration should build");
        let environment = Arc::new(InMemoryEnvironment::new(config.global_properties().clone()));
        let engine = MediationEngine::new(MediationEnv::new(Arc::new(config), environment.clone()));
        TestEngine {
            engine,
            environment,
        }
    }
}

/// Policy with short timers so retransmission is observable in tests
pub fn fast_policy() -> RmPolicy {
    RmPolicy {
        retransmission_interval: Duration::from_millis(50),
        backoff: synapse_core::rm::BackoffStrategy::Fixed,
        max_retransmission_interval: Duration::from_millis(50),
        max_retries: 3,
        send_timeout: Duration::from_secs(1),
        ..RmPolicy::default()
    }
}

/// A reliable source and destination wired back to back
///
/// `outbound` carries what the sender emits; `inbound` carries what the
/// destination answers. [`Loopback::pump`] shuttles both directions until
/// the wires go quiet.
pub struct Loopback {
    pub sender: ReliableSender,
    pub sender_transport: Arc<ChannelTransport>,
    pub source: RmMessageReceiver,
    pub destination: RmMessageReceiver,
    pub delivered: Arc<InMemoryEnvironment>,
    outbound: UnboundedReceiver<MessageContext>,
    inbound: UnboundedReceiver<MessageContext>,
}

impl Loopback {
    pub fn new(policy: RmPolicy) -> Self {
        let (sender_transport, outbound) = ChannelTransport::new();
        let sender_transport = Arc::new(sender_transport);
        let sender = ReliableSender::new(
            Arc::new(StorageManager::new()),
            sender_transport.clone(),
            policy.clone(),
        )
        .with_acks_to("http://client/acks");

        // the source side never answers on its own transport
        let (source_transport, _) = ChannelTransport::new();
        let source = RmMessageReceiver::new(
            Arc::new(StorageManager::new()),
            Arc::new(source_transport),
            Arc::new(InMemoryEnvironment::default()),
            policy.clone(),
        )
        .with_sender(sender.clone());

        let (destination_transport, inbound) = ChannelTransport::new();
        let delivered = Arc::new(InMemoryEnvironment::default());
        let destination = RmMessageReceiver::new(
            Arc::new(StorageManager::new()),
            Arc::new(destination_transport),
            delivered.clone(),
            policy,
        );

        Self {
            sender,
            sender_transport,
            source,
            destination,
            delivered,
            outbound,
            inbound,
        }
    }

    /// Shuttle messages both ways until nothing moves for `quiet`
    ///
    /// Returns the number of messages carried.
    pub async fn pump(&mut self, quiet: Duration) -> usize {
        let mut carried = 0;
        loop {
            tokio::select! {
                Some(mut ctx) = self.outbound.recv() => {
                    let _ = self.destination.receive(&mut ctx).await;
                    carried += 1;
                }
                Some(mut ctx) = self.inbound.recv() => {
                    let _ = self.source.receive(&mut ctx).await;
                    carried += 1;
                }
                _ = tokio::time::sleep(quiet) => return carried,
            }
        }
    }

    /// Payload field `n` of every message delivered to the destination, in order
    pub fn delivered_numbers(&self) -> Vec<u64> {
        self.delivered
            .drain_injected()
            .into_iter()
            .filter_map(|ctx| ctx.payload["n"].as_u64())
            .collect()
    }
}

pub fn order(n: u64) -> MessageContext {
    MessageContext::new(serde_json::json!({ "n": n })).with_to("http://esb/services/Orders")
}
