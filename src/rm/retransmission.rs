//! Retransmission timers.
//!
//! One cancelable tokio timer per `(sequence, message number)`. Scheduling a
//! number that already has a timer replaces it. A timer unregisters itself
//! before running its callback, so the callback may schedule the next
//! attempt for the same number.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

type TimerKey = (String, u64);

#[derive(Debug)]
struct Timer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Debug, Clone, Default)]
pub struct RetransmissionScheduler {
    timers: Arc<DashMap<TimerKey, Timer>>,
    generations: Arc<AtomicU64>,
}

impl RetransmissionScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `on_fire` after `delay` unless cancelled first
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F, Fut>(&self, sequence_id: &str, number: u64, delay: Duration, on_fire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let key: TimerKey = (sequence_id.to_string(), number);
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let timers = Arc::clone(&self.timers);
        let task_key = key.clone();

        // the entry guard is held until the timer is registered
        let entry = self.timers.entry(key);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let current = timers
                .remove_if(&task_key, |_, timer| timer.generation == generation)
                .is_some();
            if current {
                on_fire().await;
            }
        });
        let timer = Timer { generation, handle };

        match entry {
            Entry::Occupied(mut occupied) => {
                let replaced = occupied.insert(timer);
                replaced.handle.abort();
            }
            Entry::Vacant(vacant) => {
                vacant.insert(timer);
            }
        }
        debug!(
            sequence_id = %sequence_id,
            message_number = number,
            delay_ms = delay.as_millis() as u64,
            "Retransmission scheduled"
        );
    }

    /// Cancel the timer for one number; true if one was pending
    pub fn cancel(&self, sequence_id: &str, number: u64) -> bool {
        match self.timers.remove(&(sequence_id.to_string(), number)) {
            Some((_, timer)) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every timer of a sequence; returns how many were pending
    pub fn cancel_all(&self, sequence_id: &str) -> usize {
        let keys: Vec<TimerKey> = self
            .timers
            .iter()
            .filter(|timer| timer.key().0 == sequence_id)
            .map(|timer| timer.key().clone())
            .collect();
        keys.into_iter()
            .filter(|(sequence, number)| self.cancel(sequence, *number))
            .count()
    }

    pub fn is_scheduled(&self, sequence_id: &str, number: u64) -> bool {
        self.timers.contains_key(&(sequence_id.to_string(), number))
    }

    /// Pending timers, optionally restricted to one sequence
    pub fn pending_count(&self, sequence_id: Option<&str>) -> usize {
        match sequence_id {
            Some(sequence_id) => self
                .timers
                .iter()
                .filter(|timer| timer.key().0 == sequence_id)
                .count(),
            None => self.timers.len(),
        }
    }

    /// Abort every pending timer
    pub fn shutdown(&self) {
        let keys: Vec<TimerKey> = self.timers.iter().map(|timer| timer.key().clone()).collect();
        for (sequence, number) in keys {
            self.cancel(&sequence, number);
        }
    }
}
