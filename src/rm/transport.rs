//! Outbound transport for reliable messaging traffic.
//!
//! Protocol messages and application payloads leave through an
//! [`RmTransport`]. Every send is bounded by a deadline; a timed out send is
//! reported to the caller but never undoes state already committed.

use crate::message::MessageContext;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Send timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Transport is closed")]
    Closed,

    #[error("Transport failure: {0}")]
    Failed(String),
}

#[async_trait]
pub trait RmTransport: Send + Sync + fmt::Debug {
    async fn send(&self, ctx: MessageContext) -> Result<(), TransportError>;
}

/// Send `ctx` through `transport`, failing with `Timeout` past `timeout`
pub async fn send_timeout(
    transport: &dyn RmTransport,
    ctx: MessageContext,
    timeout: Duration,
) -> Result<(), TransportError> {
    match tokio::time::timeout(timeout, transport.send(ctx)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

#[derive(Debug, Default)]
struct Faults {
    drop_next: usize,
    fail_next: usize,
}

/// In-memory transport delivering to an unbounded channel
///
/// Loss and failure can be injected to exercise retransmission.
#[derive(Debug)]
pub struct ChannelTransport {
    sender: mpsc::UnboundedSender<MessageContext>,
    faults: Mutex<Faults>,
    latency: Option<Duration>,
    sent: AtomicUsize,
    dropped: AtomicUsize,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MessageContext>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let transport = Self {
            sender,
            faults: Mutex::new(Faults::default()),
            latency: None,
            sent: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        };
        (transport, receiver)
    }

    /// Delay every send by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Silently lose the next `count` messages
    pub fn drop_next(&self, count: usize) {
        self.faults.lock().drop_next += count;
    }

    /// Fail the next `count` sends with an error
    pub fn fail_next(&self, count: usize) {
        self.faults.lock().fail_next += count;
    }

    /// Messages handed to the channel
    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RmTransport for ChannelTransport {
    async fn send(&self, ctx: MessageContext) -> Result<(), TransportError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        {
            let mut faults = self.faults.lock();
            if faults.fail_next > 0 {
                faults.fail_next -= 1;
                return Err(TransportError::Failed("injected failure".to_string()));
            }
            if faults.drop_next > 0 {
                faults.drop_next -= 1;
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        }

        self.sender.send(ctx).map_err(|_| TransportError::Closed)?;
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
