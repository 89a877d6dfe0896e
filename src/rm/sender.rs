//! # Reliable Sender
//!
//! The RM source. Application messages are numbered and stored inside a
//! sequence transaction; only after the transaction commits are they put on
//! the wire and armed for retransmission. Messages sent before the
//! destination answered CreateSequence are queued and flushed when the
//! response arrives.

use super::errors::{RmFault, RmResult, StorageError};
use super::events::SequenceEvent;
use super::headers::{AckRange, RmHeader};
use super::policy::RmPolicy;
use super::publisher::RmEventPublisher;
use super::ranges;
use super::retransmission::RetransmissionScheduler;
use super::states::SequenceState;
use super::storage::{SequenceRecord, StorageManager, StoredMessage, Transaction};
use super::transport::{send_timeout, RmTransport};
use crate::constants::events::{
    DELIVERY_FAILED, MESSAGE_ACKNOWLEDGED, SEQUENCE_CREATED, SEQUENCE_ESTABLISHED,
    SEQUENCE_TERMINATED, SEQUENCE_TERMINATING,
};
use crate::logging::log_sequence_operation;
use crate::message::{EndpointReference, MessageContext};
use chrono::Utc;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Timer slot for CreateSequence retries; message numbers start at 1
const CREATE_TIMER: u64 = 0;
/// Timer slot for TerminateSequence retries; numbering stops before `u64::MAX`
const TERMINATE_TIMER: u64 = u64::MAX;

/// Traffic and events released after a transaction commits
#[derive(Debug, Default)]
struct Outbox {
    create: Option<(MessageContext, u32)>,
    messages: Vec<(u64, u32, MessageContext)>,
    terminate: Option<(MessageContext, u32)>,
    events: Vec<(&'static str, Option<u64>, Value)>,
}

impl Outbox {
    fn event(&mut self, name: &'static str, number: Option<u64>, context: Value) {
        self.events.push((name, number, context));
    }

    /// Timer slot and transmission count of every staged transmission
    fn timer_slots(&self) -> Vec<(u64, u32)> {
        let create = self.create.iter().map(|(_, attempt)| (CREATE_TIMER, *attempt));
        let messages = self.messages.iter().map(|(number, count, _)| (*number, *count));
        let terminate = self.terminate.iter().map(|(_, attempt)| (TERMINATE_TIMER, *attempt));
        create.chain(messages).chain(terminate).collect()
    }
}

fn storage_fault(error: StorageError) -> RmFault {
    RmFault::internal(error.to_string())
}

/// Count one more transmission of `number` and build its wire copy
fn take_transmission(record: &mut SequenceRecord, number: u64) -> Option<(u64, u32, MessageContext)> {
    let identifier = record.identifier().to_string();
    let destination = record.destination.clone();
    let stored = record.pending.get_mut(&number)?;
    stored.send_count += 1;
    stored.last_sent_at = Some(Utc::now());

    let mut ctx = stored.ctx.clone();
    ctx.rm_header = Some(RmHeader::Sequence {
        identifier,
        message_number: number,
        last_message: stored.last_message,
    });
    if ctx.to.is_none() {
        ctx.to = destination;
    }
    Some((number, stored.send_count, ctx))
}

fn terminate_request(record: &SequenceRecord) -> MessageContext {
    RmHeader::TerminateSequence {
        identifier: record.identifier().to_string(),
        last_message_number: record.highest_number(),
    }
    .into_message(record.destination.clone())
}

/// TerminateSequence, once a terminating sequence has nothing unresolved
fn termination_message(record: &mut SequenceRecord) -> Option<(MessageContext, u32)> {
    if record.state != SequenceState::Terminating
        || !record.all_resolved()
        || record.terminate_attempts > 0
    {
        return None;
    }
    record.terminate_attempts = 1;
    Some((terminate_request(record), 1))
}

/// Give up on every unacknowledged number
fn fail_pending(record: &mut SequenceRecord, outbox: &mut Outbox, reason: &str) {
    let numbers: Vec<u64> = record.pending.keys().copied().collect();
    record.pending.clear();
    for number in numbers {
        record.failed.insert(number);
        outbox.event(DELIVERY_FAILED, Some(number), json!({ "reason": reason }));
    }
}

#[derive(Debug, Clone)]
pub struct ReliableSender {
    storage: Arc<StorageManager>,
    transport: Arc<dyn RmTransport>,
    policy: Arc<RmPolicy>,
    scheduler: RetransmissionScheduler,
    publisher: RmEventPublisher,
    /// CreateSequence message id -> sequence key
    pending_creates: Arc<DashMap<String, String>>,
    acks_to: EndpointReference,
}

impl ReliableSender {
    pub fn new(storage: Arc<StorageManager>, transport: Arc<dyn RmTransport>, policy: RmPolicy) -> Self {
        Self {
            storage,
            transport,
            policy: Arc::new(policy),
            scheduler: RetransmissionScheduler::new(),
            publisher: RmEventPublisher::default(),
            pending_creates: Arc::new(DashMap::new()),
            acks_to: EndpointReference::anonymous(),
        }
    }

    pub fn with_publisher(mut self, publisher: RmEventPublisher) -> Self {
        self.publisher = publisher;
        self
    }

    /// Endpoint the destination should send acknowledgements to
    pub fn with_acks_to(mut self, acks_to: impl Into<EndpointReference>) -> Self {
        self.acks_to = acks_to.into();
        self
    }

    pub fn storage(&self) -> &Arc<StorageManager> {
        &self.storage
    }

    pub fn scheduler(&self) -> &RetransmissionScheduler {
        &self.scheduler
    }

    pub fn publisher(&self) -> &RmEventPublisher {
        &self.publisher
    }

    pub fn policy(&self) -> &RmPolicy {
        &self.policy
    }

    pub fn sequence_state(&self, sequence_key: &str) -> Option<SequenceState> {
        self.storage.state(sequence_key)
    }

    pub fn snapshot(&self, sequence_key: &str) -> Option<SequenceRecord> {
        self.storage.snapshot(sequence_key)
    }

    /// Whether `request_id` is an unanswered CreateSequence
    pub fn is_pending_create(&self, request_id: &str) -> bool {
        self.pending_creates.contains_key(request_id)
    }

    /// Stop waiting for a response to CreateSequence `request_id`
    pub fn forget_create(&self, request_id: &str) {
        self.pending_creates.remove(request_id);
    }

    /// Add `ctx` to the sequence `sequence_key`, returning its message number
    ///
    /// The sequence is created on first use. Transport failures are logged
    /// and left to retransmission; they never fail the call.
    pub async fn send(
        &self,
        sequence_key: &str,
        ctx: MessageContext,
        last_message: bool,
    ) -> RmResult<u64> {
        let mut tx = self.storage.begin(sequence_key).await;
        let (number, state, outbox) = match self.stage_send(&mut tx, ctx, last_message) {
            Ok(staged) => staged,
            Err(fault) => {
                tx.rollback();
                return Err(fault);
            }
        };
        self.commit(tx, &outbox)?;

        if let Some((create, _)) = &outbox.create {
            self.pending_creates
                .insert(create.message_id().to_string(), sequence_key.to_string());
        }
        log_sequence_operation(
            "send",
            Some(sequence_key),
            Some(number),
            &state.to_string(),
            last_message.then_some("last message"),
        );
        self.flush(sequence_key, outbox).await;
        Ok(number)
    }

    fn stage_send(
        &self,
        tx: &mut Transaction<'_>,
        ctx: MessageContext,
        last_message: bool,
    ) -> RmResult<(u64, SequenceState, Outbox)> {
        let mut outbox = Outbox::default();
        let sequence_key = tx.key().to_string();

        if tx.record().is_none() {
            let destination = ctx.to.clone();
            let record = tx
                .create(SequenceRecord::outbound(sequence_key.clone(), destination.clone()))
                .map_err(storage_fault)?;
            record.apply(SequenceEvent::CreateRequested)?;

            let mut create = RmHeader::CreateSequence {
                acks_to: Some(self.acks_to.clone()),
            }
            .into_message(destination);
            create.reply_to = Some(self.acks_to.clone());
            record.create_request_id = Some(create.message_id().to_string());
            record.create_attempts = 1;

            outbox.event(SEQUENCE_CREATED, None, json!({ "role": "outbound" }));
            outbox.create = Some((create, 1));
        }

        let record = tx.existing().map_err(storage_fault)?;
        if record.state == SequenceState::Terminated {
            return Err(RmFault::SequenceTerminated {
                identifier: sequence_key,
            });
        }
        if record.termination_requested || record.state == SequenceState::Terminating {
            return Err(RmFault::SequenceTerminating {
                identifier: sequence_key,
            });
        }
        if record.next_number == u64::MAX {
            return Err(RmFault::MessageNumberRollover {
                identifier: sequence_key,
            });
        }
        record.apply(SequenceEvent::ApplicationMessage)?;

        let number = record.next_number;
        record.next_number += 1;
        record.pending.insert(
            number,
            StoredMessage {
                number,
                ctx,
                last_message,
                send_count: 0,
                last_sent_at: None,
            },
        );
        if last_message {
            record.last_message_number = Some(number);
            record.termination_requested = true;
        }

        if record.state == SequenceState::Established {
            outbox.messages.extend(take_transmission(record, number));
            if last_message {
                record.apply(SequenceEvent::TerminateRequested)?;
                outbox.event(SEQUENCE_TERMINATING, Some(number), Value::Null);
            }
        } else {
            debug!(
                sequence_key = %sequence_key,
                message_number = number,
                "Message queued until the sequence is established"
            );
        }
        Ok((number, record.state, outbox))
    }

    /// Resend `number` if still unacknowledged; fails once retries run out
    pub async fn retransmit(&self, sequence_key: &str, number: u64) -> RmResult<()> {
        let mut tx = self.storage.begin(sequence_key).await;
        let Some(record) = tx.record_mut() else {
            tx.rollback();
            return Err(RmFault::unknown(sequence_key));
        };

        let resendable = matches!(
            record.state,
            SequenceState::Established | SequenceState::Terminating
        );
        let Some(send_count) = record.pending.get(&number).map(|m| m.send_count) else {
            tx.rollback();
            return Ok(());
        };
        if !resendable {
            tx.rollback();
            return Ok(());
        }

        let mut outbox = Outbox::default();
        if self.policy.retries_exhausted(send_count) {
            record.pending.remove(&number);
            record.failed.insert(number);
            outbox.event(
                DELIVERY_FAILED,
                Some(number),
                json!({ "attempts": send_count }),
            );
            outbox.terminate = termination_message(record);
            self.commit(tx, &outbox)?;

            warn!(
                sequence_key = %sequence_key,
                message_number = number,
                attempts = send_count,
                "⚠️ Giving up on message after exhausting retransmissions"
            );
            self.flush(sequence_key, outbox).await;
            return Err(RmFault::DeliveryFailed {
                identifier: sequence_key.to_string(),
                message_number: number,
                attempts: send_count,
            });
        }

        outbox.messages.extend(take_transmission(record, number));
        self.commit(tx, &outbox)?;
        debug!(
            sequence_key = %sequence_key,
            message_number = number,
            attempt = send_count + 1,
            "Retransmitting message"
        );
        self.flush(sequence_key, outbox).await;
        Ok(())
    }

    async fn retry_create(&self, sequence_key: &str) -> RmResult<()> {
        let mut tx = self.storage.begin(sequence_key).await;
        let Some(record) = tx.record_mut() else {
            tx.rollback();
            return Err(RmFault::unknown(sequence_key));
        };
        if record.state != SequenceState::Creating {
            tx.rollback();
            return Ok(());
        }

        let mut outbox = Outbox::default();
        let request_id = record.create_request_id.clone().unwrap_or_default();
        if self.policy.retries_exhausted(record.create_attempts) {
            let reason = format!(
                "no CreateSequenceResponse after {} attempts",
                record.create_attempts
            );
            record.apply(SequenceEvent::Fail(reason.clone()))?;
            fail_pending(record, &mut outbox, &reason);
            outbox.event(SEQUENCE_TERMINATED, None, json!({ "reason": reason }));
            self.commit(tx, &outbox)?;

            self.pending_creates.remove(&request_id);
            self.flush(sequence_key, outbox).await;
            return Err(RmFault::CreateSequenceRefused { reason });
        }

        record.create_attempts += 1;
        let mut create = RmHeader::CreateSequence {
            acks_to: Some(self.acks_to.clone()),
        }
        .into_message(record.destination.clone());
        create.reply_to = Some(self.acks_to.clone());
        create.set_message_id(request_id);
        outbox.create = Some((create, record.create_attempts));
        self.commit(tx, &outbox)?;

        self.flush(sequence_key, outbox).await;
        Ok(())
    }

    async fn retry_terminate(&self, sequence_key: &str) -> RmResult<()> {
        let mut tx = self.storage.begin(sequence_key).await;
        let Some(record) = tx.record_mut() else {
            tx.rollback();
            return Err(RmFault::unknown(sequence_key));
        };
        if record.state != SequenceState::Terminating || record.terminate_attempts == 0 {
            tx.rollback();
            return Ok(());
        }

        let mut outbox = Outbox::default();
        if self.policy.retries_exhausted(record.terminate_attempts) {
            let reason = format!(
                "no TerminateSequenceResponse after {} attempts",
                record.terminate_attempts
            );
            if let Err(fault) = record.apply(SequenceEvent::Fail(reason.clone())) {
                tx.rollback();
                return Err(fault);
            }
            outbox.event(SEQUENCE_TERMINATED, None, json!({ "reason": reason }));
            self.commit(tx, &outbox)?;

            self.scheduler.cancel_all(sequence_key);
            warn!(sequence_key = %sequence_key, reason = %reason, "⚠️ Closing sequence without TerminateSequenceResponse");
            self.flush(sequence_key, outbox).await;
            return Ok(());
        }

        record.terminate_attempts += 1;
        outbox.terminate = Some((terminate_request(record), record.terminate_attempts));
        self.commit(tx, &outbox)?;

        debug!(sequence_key = %sequence_key, "Retransmitting TerminateSequence");
        self.flush(sequence_key, outbox).await;
        Ok(())
    }

    /// The destination accepted CreateSequence `request_id` as `identifier`
    pub async fn handle_create_sequence_response(
        &self,
        request_id: &str,
        identifier: &str,
    ) -> RmResult<()> {
        let sequence_key = self
            .pending_creates
            .get(request_id)
            .map(|key| key.clone())
            .ok_or_else(|| RmFault::unknown(identifier))?;

        let mut tx = self.storage.begin(&sequence_key).await;
        if tx.record().map(|r| r.state) != Some(SequenceState::Creating) {
            // duplicate or late response
            tx.rollback();
            return Ok(());
        }
        tx.bind_wire_id(identifier);
        let record = tx.existing().map_err(storage_fault)?;

        let mut outbox = Outbox::default();
        let staged = (|| -> RmResult<()> {
            record.apply(SequenceEvent::CreateAccepted)?;
            record.wire_id = Some(identifier.to_string());
            for number in record.queued_numbers() {
                outbox.messages.extend(take_transmission(record, number));
            }
            outbox.event(
                SEQUENCE_ESTABLISHED,
                None,
                json!({ "identifier": identifier }),
            );
            if record.termination_requested {
                record.apply(SequenceEvent::TerminateRequested)?;
                outbox.event(SEQUENCE_TERMINATING, None, Value::Null);
                outbox.terminate = termination_message(record);
            }
            Ok(())
        })();
        if let Err(fault) = staged {
            tx.rollback();
            return Err(fault);
        }
        self.scheduler.cancel(&sequence_key, CREATE_TIMER);
        self.commit(tx, &outbox)?;

        self.pending_creates.remove(request_id);
        log_sequence_operation(
            "create_sequence_response",
            Some(&sequence_key),
            None,
            &SequenceState::Established.to_string(),
            Some(identifier),
        );
        self.flush(&sequence_key, outbox).await;
        Ok(())
    }

    /// The destination refused CreateSequence `request_id`
    pub async fn handle_create_sequence_refused(&self, request_id: &str, reason: &str) -> RmResult<()> {
        let (_, sequence_key) = self
            .pending_creates
            .remove(request_id)
            .ok_or_else(|| RmFault::unknown(request_id))?;

        let mut tx = self.storage.begin(&sequence_key).await;
        let Some(record) = tx.record_mut() else {
            tx.rollback();
            return Err(RmFault::unknown(sequence_key));
        };
        if record.state.is_terminal() {
            tx.rollback();
            return Ok(());
        }

        let mut outbox = Outbox::default();
        if let Err(fault) = record.apply(SequenceEvent::CreateRefused(reason.to_string())) {
            tx.rollback();
            return Err(fault);
        }
        fail_pending(record, &mut outbox, reason);
        outbox.event(SEQUENCE_TERMINATED, None, json!({ "reason": reason }));
        self.commit(tx, &outbox)?;

        self.scheduler.cancel_all(&sequence_key);
        warn!(sequence_key = %sequence_key, reason = %reason, "⚠️ CreateSequence refused");
        self.flush(&sequence_key, outbox).await;
        Ok(())
    }

    /// Apply a SequenceAcknowledgement, returning the newly acknowledged numbers
    ///
    /// Repeated acknowledgements are harmless. Negative acknowledgements
    /// trigger an immediate resend.
    pub async fn handle_acknowledgement(
        &self,
        identifier: &str,
        ranges: &[AckRange],
        nacks: &[u64],
    ) -> RmResult<Vec<u64>> {
        let sequence_key = self
            .storage
            .resolve_wire_id(identifier)
            .ok_or_else(|| RmFault::unknown(identifier))?;

        let mut tx = self.storage.begin(&sequence_key).await;
        let Some(record) = tx.record_mut() else {
            tx.rollback();
            return Err(RmFault::unknown(identifier));
        };
        if record.state.is_terminal() {
            tx.rollback();
            return Ok(Vec::new());
        }

        let acked = ranges::expand(ranges);
        let invalid = acked
            .iter()
            .find(|number| **number == 0 || **number >= record.next_number)
            .copied();
        if let Some(number) = invalid {
            tx.rollback();
            return Err(RmFault::InvalidAcknowledgement {
                identifier: identifier.to_string(),
                reason: format!("message {number} was never sent"),
            });
        }
        if let Err(fault) = record.apply(SequenceEvent::Acknowledgement) {
            tx.rollback();
            return Err(fault);
        }

        let mut outbox = Outbox::default();
        let mut newly_acked = Vec::new();
        for number in &acked {
            if record.pending.remove(number).is_some() {
                newly_acked.push(*number);
                outbox.event(MESSAGE_ACKNOWLEDGED, Some(*number), Value::Null);
            }
            record.acknowledged.insert(*number);
        }
        for number in nacks.iter().filter(|n| !acked.contains(n)) {
            outbox.messages.extend(take_transmission(record, *number));
        }
        outbox.terminate = termination_message(record);
        let state = record.state;
        for number in &newly_acked {
            self.scheduler.cancel(&sequence_key, *number);
        }
        self.commit(tx, &outbox)?;

        log_sequence_operation(
            "acknowledgement",
            Some(&sequence_key),
            None,
            &state.to_string(),
            Some(&ranges::format_ranges(ranges)),
        );
        self.flush(&sequence_key, outbox).await;
        Ok(newly_acked)
    }

    /// Close the sequence once every message is acknowledged or given up
    pub async fn terminate(&self, sequence_key: &str) -> RmResult<()> {
        let mut tx = self.storage.begin(sequence_key).await;
        let Some(record) = tx.record_mut() else {
            tx.rollback();
            return Err(RmFault::unknown(sequence_key));
        };

        let mut outbox = Outbox::default();
        match record.state {
            SequenceState::Terminated | SequenceState::Terminating => {
                tx.rollback();
                return Ok(());
            }
            SequenceState::Initial | SequenceState::Creating => {
                // completed once the sequence is established
                record.termination_requested = true;
            }
            SequenceState::Established => {
                record.termination_requested = true;
                if let Err(fault) = record.apply(SequenceEvent::TerminateRequested) {
                    tx.rollback();
                    return Err(fault);
                }
                outbox.event(SEQUENCE_TERMINATING, None, Value::Null);
                outbox.terminate = termination_message(record);
            }
        }
        let state = record.state;
        self.commit(tx, &outbox)?;

        log_sequence_operation("terminate", Some(sequence_key), None, &state.to_string(), None);
        self.flush(sequence_key, outbox).await;
        Ok(())
    }

    /// TerminateSequenceResponse received for `identifier`
    pub async fn handle_terminate_response(&self, identifier: &str) -> RmResult<()> {
        let sequence_key = self
            .storage
            .resolve_wire_id(identifier)
            .ok_or_else(|| RmFault::unknown(identifier))?;

        let mut tx = self.storage.begin(&sequence_key).await;
        let Some(record) = tx.record_mut() else {
            tx.rollback();
            return Err(RmFault::unknown(identifier));
        };
        if record.state == SequenceState::Terminated {
            tx.rollback();
            return Ok(());
        }
        if let Err(fault) = record.apply(SequenceEvent::TerminateCompleted) {
            tx.rollback();
            return Err(fault);
        }
        let mut outbox = Outbox::default();
        outbox.event(
            SEQUENCE_TERMINATED,
            None,
            json!({
                "acknowledged": record.acknowledged.len(),
                "failed": record.failed.len(),
            }),
        );
        self.commit(tx, &outbox)?;

        self.scheduler.cancel_all(&sequence_key);
        log_sequence_operation(
            "terminate_response",
            Some(&sequence_key),
            None,
            &SequenceState::Terminated.to_string(),
            None,
        );
        self.flush(&sequence_key, outbox).await;
        Ok(())
    }

    /// Commit `tx` with the retransmission timers for its traffic armed
    /// while the sequence lock is still held
    fn commit(&self, tx: Transaction<'_>, outbox: &Outbox) -> RmResult<()> {
        let sequence_key = tx.key().to_string();
        let slots = outbox.timer_slots();
        for (slot, attempt) in &slots {
            self.arm_timer(&sequence_key, *slot, self.policy.delay_for_attempt(*attempt));
        }
        tx.commit().map_err(|e| {
            for (slot, _) in &slots {
                self.scheduler.cancel(&sequence_key, *slot);
            }
            storage_fault(e)
        })
    }

    /// Publish events and put committed traffic on the wire
    async fn flush(&self, sequence_key: &str, outbox: Outbox) {
        for (name, number, context) in outbox.events {
            self.publisher.publish(name, sequence_key, number, context);
        }

        if let Some((create, _)) = outbox.create {
            self.transmit(create).await;
        }
        for (_, _, ctx) in outbox.messages {
            self.transmit(ctx).await;
        }
        if let Some((mut terminate, _)) = outbox.terminate {
            terminate.reply_to.get_or_insert_with(|| self.acks_to.clone());
            self.transmit(terminate).await;
        }
    }

    async fn transmit(&self, ctx: MessageContext) -> bool {
        let message_id = ctx.message_id().to_string();
        match send_timeout(self.transport.as_ref(), ctx, self.policy.send_timeout).await {
            Ok(()) => true,
            Err(e) => {
                warn!(message_id = %message_id, error = %e, "⚠️ Reliable transmission failed");
                false
            }
        }
    }

    fn arm_timer(&self, sequence_key: &str, number: u64, delay: Duration) {
        let sender = self.clone();
        let key = sequence_key.to_string();
        self.scheduler
            .schedule(sequence_key, number, delay, move || sender.on_timer(key, number));
    }

    fn on_timer(self, sequence_key: String, number: u64) -> BoxFuture<'static, ()> {
        async move {
            let result = match number {
                CREATE_TIMER => self.retry_create(&sequence_key).await,
                TERMINATE_TIMER => self.retry_terminate(&sequence_key).await,
                _ => self.retransmit(&sequence_key, number).await,
            };
            if let Err(fault) = result {
                debug!(
                    sequence_key = %sequence_key,
                    message_number = number,
                    fault = %fault,
                    "Retransmission timer ended with a fault"
                );
            }
        }
        .boxed()
    }
}
