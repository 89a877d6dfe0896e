//! # Mediation Environment
//!
//! The thin glue between the mediation engine and the outside world: it
//! creates message contexts, injects messages back into mediation, and
//! delivers outbound messages. Transports are external collaborators, so the
//! built-in [`InMemoryEnvironment`] records traffic on crossbeam channels for
//! embedding and tests.

use crate::message::{EndpointReference, GlobalProperties, MessageContext};
use crossbeam::channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("Environment is closed")]
    Closed,

    #[error("No destination for message {message_id}")]
    NoRoute { message_id: String },

    #[error("Send timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Reliable delivery rejected: {0}")]
    Reliable(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

pub type EnvironmentResult<T> = Result<T, EnvironmentError>;

/// Outbound destination for the send mediator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<EndpointReference>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Deliver through the reliable messaging core
    #[serde(default)]
    pub reliable: bool,
}

impl Endpoint {
    pub fn address(address: impl Into<EndpointReference>) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::default()
        }
    }

    pub fn named(name: impl Into<String>, address: impl Into<EndpointReference>) -> Self {
        Self {
            name: Some(name.into()),
            address: Some(address.into()),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn reliable(mut self) -> Self {
        self.reliable = true;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Services the mediation engine consumes from its host
pub trait SynapseEnvironment: Send + Sync + fmt::Debug {
    /// Create an empty context wired to the shared property store
    fn create_message_context(&self) -> MessageContext;

    /// Feed a message (back) into mediation
    fn inject_message(&self, ctx: MessageContext) -> EnvironmentResult<()>;

    /// Deliver a message to `endpoint`, or to its `to` address when absent
    fn send(&self, endpoint: Option<&Endpoint>, ctx: MessageContext) -> EnvironmentResult<()>;
}

/// Environment recording sent and injected messages on unbounded channels
#[derive(Debug)]
pub struct InMemoryEnvironment {
    global_properties: GlobalProperties,
    sent_tx: Sender<MessageContext>,
    sent_rx: Receiver<MessageContext>,
    injected_tx: Sender<MessageContext>,
    injected_rx: Receiver<MessageContext>,
    closed: AtomicBool,
}

impl Default for InMemoryEnvironment {
    fn default() -> Self {
        Self::new(GlobalProperties::new())
    }
}

impl InMemoryEnvironment {
    pub fn new(global_properties: GlobalProperties) -> Self {
        let (sent_tx, sent_rx) = unbounded();
        let (injected_tx, injected_rx) = unbounded();
        Self {
            global_properties,
            sent_tx,
            sent_rx,
            injected_tx,
            injected_rx,
            closed: AtomicBool::new(false),
        }
    }

    /// Receiver side of injected messages, for a dispatcher loop
    pub fn injected(&self) -> Receiver<MessageContext> {
        self.injected_rx.clone()
    }

    pub fn drain_sent(&self) -> Vec<MessageContext> {
        self.sent_rx.try_iter().collect()
    }

    pub fn drain_injected(&self) -> Vec<MessageContext> {
        self.injected_rx.try_iter().collect()
    }

    /// Wait up to `timeout` for the next sent message
    pub fn recv_sent_timeout(&self, timeout: Duration) -> Option<MessageContext> {
        self.sent_rx.recv_timeout(timeout).ok()
    }

    pub fn sent_count(&self) -> usize {
        self.sent_rx.len()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn ensure_open(&self) -> EnvironmentResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(EnvironmentError::Closed)
        } else {
            Ok(())
        }
    }
}

impl SynapseEnvironment for InMemoryEnvironment {
    fn create_message_context(&self) -> MessageContext {
        MessageContext::new(Value::Null).with_global_properties(self.global_properties.clone())
    }

    fn inject_message(&self, ctx: MessageContext) -> EnvironmentResult<()> {
        self.ensure_open()?;
        debug!(message_id = %ctx.message_id(), "Message injected");
        self.injected_tx
            .send(ctx)
            .map_err(|_| EnvironmentError::Closed)
    }

    fn send(&self, endpoint: Option<&Endpoint>, mut ctx: MessageContext) -> EnvironmentResult<()> {
        self.ensure_open()?;

        if let Some(address) = endpoint.and_then(|e| e.address.clone()) {
            ctx.to = Some(address);
        }
        if ctx.to.is_none() && !ctx.is_response() {
            return Err(EnvironmentError::NoRoute {
                message_id: ctx.message_id().to_string(),
            });
        }

        debug!(message_id = %ctx.message_id(), to = ?ctx.to, "Message sent");
        self.sent_tx.send(ctx).map_err(|_| EnvironmentError::Closed)
    }
}
