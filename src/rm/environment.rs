//! Environment routing reliable sends into the RM core.
//!
//! Mediation is synchronous while the [`ReliableSender`] is async. A message
//! marked for reliable delivery is put on the queue of its sequence key and
//! `send` returns at once. One task per key drains the queue, so messages
//! are numbered in the order mediation sent them. Delivery outcomes surface
//! as sender events, not as send errors.

use super::sender::ReliableSender;
use crate::constants::properties::{RM_ENABLED, RM_LAST_MESSAGE, RM_SEQUENCE_KEY};
use crate::constants::SINGLE_SEQUENCE_KEY;
use crate::environment::{Endpoint, EnvironmentError, EnvironmentResult, SynapseEnvironment};
use crate::logging::log_error;
use crate::message::MessageContext;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::debug;

type Submission = (MessageContext, bool);

fn flag(ctx: &MessageContext, key: &str) -> bool {
    ctx.get_property(key)
        .is_some_and(|value| value.as_bool() == Some(true))
}

#[derive(Debug, Clone)]
pub struct ReliableEnvironment {
    inner: Arc<dyn SynapseEnvironment>,
    sender: ReliableSender,
    runtime: Handle,
    /// Sequence key -> queue drained by that key's submission task
    queues: Arc<DashMap<String, mpsc::UnboundedSender<Submission>>>,
}

impl ReliableEnvironment {
    pub fn new(inner: Arc<dyn SynapseEnvironment>, sender: ReliableSender, runtime: Handle) -> Self {
        Self {
            inner,
            sender,
            runtime,
            queues: Arc::new(DashMap::new()),
        }
    }

    /// Bind to the runtime of the calling task
    pub fn try_current(
        inner: Arc<dyn SynapseEnvironment>,
        sender: ReliableSender,
    ) -> EnvironmentResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| EnvironmentError::Reliable(format!("no tokio runtime: {e}")))?;
        Ok(Self::new(inner, sender, runtime))
    }

    pub fn sender(&self) -> &ReliableSender {
        &self.sender
    }

    pub fn inner(&self) -> &Arc<dyn SynapseEnvironment> {
        &self.inner
    }

    /// Sequence keys with a live submission queue
    pub fn active_queues(&self) -> usize {
        self.queues.len()
    }

    fn is_reliable(endpoint: Option<&Endpoint>, ctx: &MessageContext) -> bool {
        endpoint.is_some_and(|e| e.reliable) || flag(ctx, RM_ENABLED)
    }

    /// Queue `submission` behind earlier sends on `sequence_key`
    fn submit(&self, sequence_key: &str, mut submission: Submission) {
        loop {
            let queue = self
                .queues
                .entry(sequence_key.to_string())
                .or_insert_with(|| self.spawn_queue(sequence_key))
                .clone();
            match queue.send(submission) {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => {
                    // the queue closed after a last message; start a new one
                    self.queues
                        .remove_if(sequence_key, |_, current| current.same_channel(&queue));
                    submission = returned;
                }
            }
        }
    }

    fn spawn_queue(&self, sequence_key: &str) -> mpsc::UnboundedSender<Submission> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Submission>();
        let sender = self.sender.clone();
        let queues = Arc::clone(&self.queues);
        let key = sequence_key.to_string();
        let handle = tx.clone();

        self.runtime.spawn(async move {
            while let Some((ctx, last_message)) = rx.recv().await {
                let message_id = ctx.message_id().to_string();
                if let Err(fault) = sender.send(&key, ctx, last_message).await {
                    log_error(
                        "reliable_environment",
                        "send",
                        &fault.to_string(),
                        Some(&format!("message_id={message_id} sequence_key={key}")),
                    );
                }
                if last_message {
                    // later sends open a new queue and meet the closed sequence
                    queues.remove_if(&key, |_, current| current.same_channel(&handle));
                    rx.close();
                }
            }
            debug!(sequence_key = %key, "Reliable submission queue closed");
        });
        tx
    }
}

impl SynapseEnvironment for ReliableEnvironment {
    fn create_message_context(&self) -> MessageContext {
        self.inner.create_message_context()
    }

    fn inject_message(&self, ctx: MessageContext) -> EnvironmentResult<()> {
        self.inner.inject_message(ctx)
    }

    fn send(&self, endpoint: Option<&Endpoint>, mut ctx: MessageContext) -> EnvironmentResult<()> {
        if !Self::is_reliable(endpoint, &ctx) || ctx.is_response() {
            return self.inner.send(endpoint, ctx);
        }

        if let Some(address) = endpoint.and_then(|e| e.address.clone()) {
            ctx.to = Some(address);
        }
        if ctx.to.is_none() {
            return Err(EnvironmentError::NoRoute {
                message_id: ctx.message_id().to_string(),
            });
        }

        let sequence_key = ctx
            .get_property_string(RM_SEQUENCE_KEY)
            .unwrap_or_else(|| SINGLE_SEQUENCE_KEY.to_string());
        let last_message = flag(&ctx, RM_LAST_MESSAGE);

        debug!(
            message_id = %ctx.message_id(),
            sequence_key = %sequence_key,
            "Handing message to reliable sender"
        );
        self.submit(&sequence_key, (ctx, last_message));
        Ok(())
    }
}
