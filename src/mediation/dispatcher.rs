//! # Dispatcher
//!
//! Runs independent messages concurrently. Mediation itself is synchronous,
//! so each message executes on the blocking pool; a semaphore bounds how many
//! run at once.

use super::MediationEngine;
use crate::config::MediationConfig;
use crate::error::{SynapseError, SynapseResult};
use crate::mediators::Outcome;
use crate::message::MessageContext;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Dispatcher capacity and throughput
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherStats {
    pub max_concurrent: usize,
    pub available_capacity: usize,
    pub in_flight: usize,
    pub processed: u64,
    pub faulted: u64,
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    engine: Arc<MediationEngine>,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    processed: Arc<AtomicU64>,
    faulted: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new(engine: Arc<MediationEngine>, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            engine,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            processed: Arc::new(AtomicU64::new(0)),
            faulted: Arc::new(AtomicU64::new(0)),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_config(engine: Arc<MediationEngine>, config: &MediationConfig) -> Self {
        Self::new(engine, config.worker_pool_size)
    }

    /// Mediate one message, waiting for a free worker first
    pub async fn dispatch(&self, ctx: MessageContext) -> SynapseResult<Outcome> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| SynapseError::Internal(format!("dispatcher closed: {e}")))?;
        self.execute(ctx, permit).await
    }

    async fn execute(
        &self,
        mut ctx: MessageContext,
        permit: tokio::sync::OwnedSemaphorePermit,
    ) -> SynapseResult<Outcome> {
        let engine = Arc::clone(&self.engine);
        let message_id = ctx.message_id().to_string();

        let outcome = tokio::task::spawn_blocking(move || {
            let outcome = engine.mediate(&mut ctx);
            drop(permit);
            outcome
        })
        .await
        .map_err(|e| {
            error!(message_id = %message_id, error = %e, "❌ Mediation worker panicked");
            SynapseError::Internal(format!("mediation worker failed: {e}"))
        })?;

        self.processed.fetch_add(1, Ordering::Relaxed);
        if outcome.is_fault() {
            self.faulted.fetch_add(1, Ordering::Relaxed);
        }
        Ok(outcome)
    }

    /// Mediate in the background
    pub fn spawn(&self, ctx: MessageContext) -> JoinHandle<SynapseResult<Outcome>> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.dispatch(ctx).await })
    }

    /// Mediate every message from `receiver` until the channel disconnects or
    /// [`shutdown`](Self::shutdown) is called; returns the number dispatched
    ///
    /// In-flight messages are awaited before returning.
    pub async fn run(&self, receiver: Receiver<MessageContext>) -> usize {
        let (tx, mut rx) = mpsc::channel(self.max_concurrent);
        let shutdown = Arc::clone(&self.shutdown);

        let forwarder = tokio::task::spawn_blocking(move || loop {
            if shutdown.load(Ordering::Acquire) {
                break;
            }
            match receiver.recv_timeout(POLL_INTERVAL) {
                Ok(ctx) => {
                    if tx.blocking_send(ctx).is_err() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        });

        info!(max_concurrent = self.max_concurrent, "🚀 Dispatcher started");
        let mut dispatched = 0;
        while let Some(ctx) = rx.recv().await {
            let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    warn!(error = %e, "Dispatcher semaphore closed, stopping");
                    break;
                }
            };
            dispatched += 1;

            let dispatcher = self.clone();
            tokio::spawn(async move {
                let message_id = ctx.message_id().to_string();
                match dispatcher.execute(ctx, permit).await {
                    Ok(Outcome::Fault(fault)) => debug!(
                        message_id = %message_id,
                        code = %fault.code,
                        "Message mediation faulted"
                    ),
                    Ok(_) => {}
                    Err(e) => error!(message_id = %message_id, error = %e, "❌ Dispatch failed"),
                }
            });
        }

        if let Err(e) = forwarder.await {
            error!(error = %e, "❌ Dispatcher forwarder failed");
        }
        // every permit back means nothing is in flight
        if let Ok(all) = self.semaphore.acquire_many(self.max_concurrent as u32).await {
            drop(all);
        }

        info!(dispatched = dispatched, "🛑 Dispatcher stopped");
        dispatched
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn stats(&self) -> DispatcherStats {
        let available = self.semaphore.available_permits();
        DispatcherStats {
            max_concurrent: self.max_concurrent,
            available_capacity: available,
            in_flight: self.max_concurrent.saturating_sub(available),
            processed: self.processed.load(Ordering::Relaxed),
            faulted: self.faulted.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Endpoint;
    use crate::mediation::testing::test_env;
    use crate::mediation::SynapseConfiguration;
    use crate::mediators::{Mediator, SendMediator, SequenceMediator};
    use serde_json::json;

    fn forwarding_engine() -> (Arc<MediationEngine>, Arc<crate::environment::InMemoryEnvironment>) {
        let config = SynapseConfiguration::new();
        config.add_sequence(SequenceMediator::named(
            "main",
            vec![Mediator::Send(SendMediator::new(Some(Endpoint::address(
                "http://backend/Svc",
            ))))],
        ));
        let (env, sink) = test_env(config);
        (Arc::new(MediationEngine::new(env)), sink)
    }

    #[tokio::test]
    async fn test_dispatch_runs_engine() {
        let (engine, sink) = forwarding_engine();
        let dispatcher = Dispatcher::new(engine, 2);

        let outcome = dispatcher
            .dispatch(MessageContext::new(json!({"n": 1})))
            .await
            .unwrap();
        assert!(outcome.is_continue());
        assert_eq!(sink.sent_count(), 1);

        let stats = dispatcher.stats();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_run_drains_channel_until_disconnect() {
        let (engine, sink) = forwarding_engine();
        let dispatcher = Dispatcher::new(engine, 3);
        let (tx, rx) = crossbeam::channel::unbounded();
        for n in 0..10 {
            tx.send(MessageContext::new(json!({"n": n}))).unwrap();
        }
        drop(tx);

        let dispatched = dispatcher.run(rx).await;
        assert_eq!(dispatched, 10);
        assert_eq!(sink.sent_count(), 10);
        assert_eq!(dispatcher.stats().available_capacity, 3);
    }

    #[tokio::test]
    async fn test_shutdown_stops_run_loop() {
        let (engine, _) = forwarding_engine();
        let dispatcher = Dispatcher::new(engine, 1);
        let (_tx, rx) = crossbeam::channel::unbounded::<MessageContext>();

        let runner = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.run(rx).await })
        };
        dispatcher.shutdown();
        let dispatched = tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dispatched, 0);
    }
}
