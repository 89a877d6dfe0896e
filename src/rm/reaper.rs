//! Background cleanup of idle and finished sequences.
//!
//! Active sequences with no traffic for the inactivity timeout are
//! terminated; terminated sequences are purged from storage once the
//! termination grace period has passed.

use super::events::SequenceEvent;
use super::policy::RmPolicy;
use super::publisher::RmEventPublisher;
use super::receiver::RmMessageReceiver;
use super::sender::ReliableSender;
use super::states::SequenceState;
use super::storage::{SequenceRole, StorageManager};
use crate::constants::events::{DELIVERY_FAILED, SEQUENCE_PURGED, SEQUENCE_TERMINATED, SEQUENCE_TIMED_OUT};
use crate::logging::log_sequence_operation;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Sequences touched by one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub timed_out: Vec<String>,
    pub purged: Vec<String>,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.timed_out.is_empty() && self.purged.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SequenceReaper {
    storage: Arc<StorageManager>,
    inactivity_timeout: Duration,
    termination_grace: Duration,
    sender: Option<ReliableSender>,
    publisher: RmEventPublisher,
}

impl SequenceReaper {
    pub fn new(storage: Arc<StorageManager>, policy: &RmPolicy) -> Self {
        Self {
            storage,
            inactivity_timeout: policy.inactivity_timeout,
            termination_grace: policy.termination_grace,
            sender: None,
            publisher: RmEventPublisher::default(),
        }
    }

    /// Reap the sequences of `sender`, cancelling their timers and pending
    /// CreateSequence requests on timeout
    pub fn with_sender(sender: &ReliableSender) -> Self {
        Self {
            sender: Some(sender.clone()),
            publisher: sender.publisher().clone(),
            ..Self::new(Arc::clone(sender.storage()), sender.policy())
        }
    }

    pub fn with_receiver(receiver: &RmMessageReceiver) -> Self {
        Self {
            publisher: receiver.publisher().clone(),
            ..Self::new(Arc::clone(receiver.storage()), receiver.policy())
        }
    }

    /// Time out idle sequences and purge expired terminated ones as of `now`
    pub async fn sweep(&self, now: Instant) -> ReapReport {
        let mut report = ReapReport::default();

        for key in self.storage.sequence_keys() {
            let Some(record) = self.storage.snapshot(&key) else {
                continue;
            };

            match record.terminated_at {
                Some(terminated_at) => {
                    if now.saturating_duration_since(terminated_at) >= self.termination_grace
                        && self.storage.remove(&key).await.is_some()
                    {
                        self.publisher.publish(SEQUENCE_PURGED, key.clone(), None, json!({}));
                        debug!(sequence_key = %key, "Purged terminated sequence");
                        report.purged.push(key);
                    }
                }
                None => {
                    if now.saturating_duration_since(record.last_activity) >= self.inactivity_timeout
                        && self.time_out(&key, now).await
                    {
                        report.timed_out.push(key);
                    }
                }
            }
        }

        if !report.is_empty() {
            info!(
                timed_out = report.timed_out.len(),
                purged = report.purged.len(),
                "🧹 Sequence reaper sweep"
            );
        }
        report
    }

    async fn time_out(&self, key: &str, now: Instant) -> bool {
        let mut tx = self.storage.begin(key).await;
        let Some(record) = tx.record_mut() else {
            tx.rollback();
            return false;
        };
        // activity may have arrived since the snapshot
        if record.state.is_terminal()
            || now.saturating_duration_since(record.last_activity) < self.inactivity_timeout
        {
            tx.rollback();
            return false;
        }
        if let Err(fault) = record.apply(SequenceEvent::Timeout) {
            warn!(sequence_key = %key, fault = %fault, "Could not time out sequence");
            tx.rollback();
            return false;
        }

        let failed: Vec<u64> = if record.role == SequenceRole::Outbound {
            let numbers: Vec<u64> = record.pending.keys().copied().collect();
            record.pending.clear();
            record.failed.extend(numbers.iter().copied());
            numbers
        } else {
            Vec::new()
        };
        let role = record.role;
        let create_request_id = record.create_request_id.clone();
        if let Err(e) = tx.commit() {
            warn!(sequence_key = %key, error = %e, "Could not commit sequence timeout");
            return false;
        }

        if let Some(sender) = &self.sender {
            sender.scheduler().cancel_all(key);
            if let Some(request_id) = &create_request_id {
                sender.forget_create(request_id);
            }
        }
        for number in &failed {
            self.publisher.publish(
                DELIVERY_FAILED,
                key,
                Some(*number),
                json!({ "reason": "inactivity timeout" }),
            );
        }
        self.publisher
            .publish(SEQUENCE_TIMED_OUT, key, None, json!({ "role": format!("{role:?}") }));
        self.publisher.publish(SEQUENCE_TERMINATED, key, None, json!({ "reason": "timeout" }));
        log_sequence_operation(
            "timeout",
            Some(key),
            None,
            &SequenceState::Terminated.to_string(),
            Some("inactivity timeout"),
        );
        true
    }

    /// Sweep every `interval` until the returned task is aborted
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep(Instant::now()).await;
            }
        })
    }
}
