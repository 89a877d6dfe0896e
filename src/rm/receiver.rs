//! # Reliable Message Receiver
//!
//! Single entry point for inbound reliable messaging traffic. Each message
//! is processed inside one sequence transaction: on success the transaction
//! commits and protocol responses go out afterwards; on failure it rolls
//! back, the message context is paused and a fault is reported.
//!
//! Application payloads reach mediation through
//! [`SynapseEnvironment::inject_message`] exactly once. Duplicates are
//! acknowledged again but not redelivered, and with in-order delivery
//! enabled, messages wait in the sequence record until every lower number
//! has arrived.

use super::errors::{ProcessingError, ProcessingResult, RmFault};
use super::events::SequenceEvent;
use super::headers::RmHeader;
use super::messages::{keys, MessageCatalog};
use super::policy::RmPolicy;
use super::publisher::RmEventPublisher;
use super::sender::ReliableSender;
use super::states::SequenceState;
use super::storage::{SequenceRecord, SequenceRole, StorageManager, Transaction};
use super::transport::{send_timeout, RmTransport};
use crate::constants::events::{MESSAGE_DELIVERED, SEQUENCE_CREATED, SEQUENCE_TERMINATED};
use crate::environment::SynapseEnvironment;
use crate::logging::{log_error, log_sequence_operation};
use crate::message::{EndpointReference, MessageContext};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// What happened to an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// CreateSequence accepted under `identifier`
    Created { identifier: String },
    /// Messages handed to mediation, in delivery order
    Delivered { identifier: String, numbers: Vec<u64> },
    /// Already received; acknowledged again only
    Duplicate { identifier: String, number: u64 },
    /// Held back until lower numbers arrive
    Buffered { identifier: String, number: u64 },
    /// AckRequested answered
    Acknowledged { identifier: String },
    Terminated { identifier: String },
    /// Response for a sequence this process sends on
    Handled,
    /// No reliable messaging header; mediate normally
    NotReliable,
}

impl ReceiveOutcome {
    /// Whether the caller should still mediate the original context
    pub fn requires_mediation(&self) -> bool {
        matches!(self, Self::NotReliable)
    }
}

/// Result of one transaction, released after commit
#[derive(Debug)]
struct Staged {
    outcome: ReceiveOutcome,
    deliveries: Vec<(u64, MessageContext)>,
    responses: Vec<MessageContext>,
    events: Vec<(&'static str, Option<u64>, Value)>,
}

impl Staged {
    fn new(outcome: ReceiveOutcome) -> Self {
        Self {
            outcome,
            deliveries: Vec::new(),
            responses: Vec::new(),
            events: Vec::new(),
        }
    }
}

/// Inbound record for `identifier`, or `UnknownSequence`
fn inbound<'t>(tx: &'t mut Transaction<'_>, identifier: &str) -> ProcessingResult<&'t mut SequenceRecord> {
    match tx.record_mut() {
        Some(record) if record.role == SequenceRole::Inbound => Ok(record),
        _ => Err(RmFault::unknown(identifier).into()),
    }
}

fn acknowledgement(record: &SequenceRecord, fallback: Option<EndpointReference>) -> MessageContext {
    let header = RmHeader::SequenceAcknowledgement {
        identifier: record.identifier().to_string(),
        ranges: record.ack_ranges(),
        nacks: Vec::new(),
    };
    let mut ack = header.into_message(record.acks_to.clone().or(fallback));
    ack.set_response(true);
    ack
}

#[derive(Debug, Clone)]
pub struct RmMessageReceiver {
    storage: Arc<StorageManager>,
    transport: Arc<dyn RmTransport>,
    environment: Arc<dyn SynapseEnvironment>,
    policy: Arc<RmPolicy>,
    catalog: Arc<MessageCatalog>,
    publisher: RmEventPublisher,
    sender: Option<ReliableSender>,
}

impl RmMessageReceiver {
    pub fn new(
        storage: Arc<StorageManager>,
        transport: Arc<dyn RmTransport>,
        environment: Arc<dyn SynapseEnvironment>,
        policy: RmPolicy,
    ) -> Self {
        Self {
            storage,
            transport,
            environment,
            policy: Arc::new(policy),
            catalog: Arc::new(MessageCatalog::default()),
            publisher: RmEventPublisher::default(),
            sender: None,
        }
    }

    pub fn with_catalog(mut self, catalog: MessageCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    pub fn with_publisher(mut self, publisher: RmEventPublisher) -> Self {
        self.publisher = publisher;
        self
    }

    /// Route source-bound responses to `sender`
    pub fn with_sender(mut self, sender: ReliableSender) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn storage(&self) -> &Arc<StorageManager> {
        &self.storage
    }

    pub fn policy(&self) -> &RmPolicy {
        &self.policy
    }

    pub fn publisher(&self) -> &RmEventPublisher {
        &self.publisher
    }

    pub fn sequence_state(&self, identifier: &str) -> Option<SequenceState> {
        self.storage
            .snapshot(identifier)
            .filter(|record| record.role == SequenceRole::Inbound)
            .map(|record| record.state)
    }

    /// Process one inbound message
    ///
    /// On a fault the context is paused and a fault message is sent to its
    /// `fault_to` (or `reply_to`) address when it has one.
    pub async fn receive(&self, ctx: &mut MessageContext) -> Result<ReceiveOutcome, RmFault> {
        let result = self.dispatch(ctx).await;
        match result {
            Ok(staged) => Ok(self.release(staged).await),
            Err(error) => Err(self.fail(ctx, error).await),
        }
    }

    async fn dispatch(&self, ctx: &MessageContext) -> ProcessingResult<Staged> {
        if ctx.is_fault() {
            if let Some(handled) = self.refused_create(ctx).await? {
                return Ok(handled);
            }
        }

        let Some(header) = ctx.rm_header.clone() else {
            return Ok(Staged::new(ReceiveOutcome::NotReliable));
        };
        debug!(
            message_id = %ctx.message_id(),
            header = header.kind(),
            "Processing reliable messaging header"
        );

        if header.is_source_bound() {
            return self.source_bound(ctx, header).await;
        }

        match header {
            RmHeader::CreateSequence { acks_to } => self.create_sequence(ctx, acks_to).await,
            RmHeader::Sequence {
                identifier,
                message_number,
                last_message,
            } => {
                self.in_transaction(&identifier, |tx| {
                    self.stage_sequence(tx, ctx, &identifier, message_number, last_message)
                })
                .await
            }
            RmHeader::AckRequested { identifier } => {
                self.in_transaction(&identifier, |tx| {
                    let record = inbound(tx, &identifier)?;
                    record.touch();
                    let mut staged = Staged::new(ReceiveOutcome::Acknowledged {
                        identifier: identifier.clone(),
                    });
                    staged.responses.push(acknowledgement(record, ctx.reply_to.clone()));
                    Ok(staged)
                })
                .await
            }
            RmHeader::TerminateSequence {
                identifier,
                last_message_number,
            } => {
                self.in_transaction(&identifier, |tx| {
                    self.stage_terminate(tx, ctx, &identifier, last_message_number)
                })
                .await
            }
            other => Err(RmFault::internal(format!("unexpected {} header", other.kind())).into()),
        }
    }

    /// Run `stage` inside a transaction on `key`, delivering and committing
    /// on success and rolling back on failure
    ///
    /// When a delivery fails after earlier ones reached mediation, the
    /// delivered prefix is committed and the rest goes back to the buffer,
    /// so a retransmission never hands a message over twice.
    async fn in_transaction<F>(&self, key: &str, stage: F) -> ProcessingResult<Staged>
    where
        F: FnOnce(&mut Transaction<'_>) -> ProcessingResult<Staged>,
    {
        let mut tx = self.storage.begin(key).await;
        let mut staged = match stage(&mut tx) {
            Ok(staged) => staged,
            Err(error) => {
                tx.rollback();
                return Err(error);
            }
        };

        let mut injected = 0;
        let mut failure = None;
        for (number, delivery) in &staged.deliveries {
            match self.environment.inject_message(delivery.clone()) {
                Ok(()) => injected += 1,
                Err(e) => {
                    failure = Some(format!("delivery of message {number} failed: {e}"));
                    break;
                }
            }
        }
        let Some(reason) = failure else {
            tx.commit()?;
            return Ok(staged);
        };

        let fault = RmFault::internal(self.catalog.format(keys::PROCESSING_FAILED, &[&reason]));
        if injected == 0 {
            tx.rollback();
            return Err(fault.into());
        }

        let undelivered = staged.deliveries.split_off(injected);
        if let Some(record) = tx.record_mut() {
            if let Some((first, _)) = undelivered.first() {
                record.delivered_up_to = first - 1;
            }
            record.buffered.extend(undelivered);
        }
        tx.commit()?;

        for (number, _) in &staged.deliveries {
            self.publisher
                .publish(MESSAGE_DELIVERED, key.to_string(), Some(*number), Value::Null);
        }
        warn!(
            sequence_id = %key,
            delivered = injected,
            reason = %reason,
            "⚠️ Partial delivery committed; the rest waits for the next message"
        );
        Err(fault.into())
    }

    async fn create_sequence(
        &self,
        ctx: &MessageContext,
        acks_to: Option<EndpointReference>,
    ) -> ProcessingResult<Staged> {
        if let Some(service) = ctx.service_name() {
            if !self.policy.is_enabled_for(service) {
                let reason = self.catalog.format(keys::RM_DISABLED_FOR_SERVICE, &[service]);
                return Err(RmFault::CreateSequenceRefused {
                    reason: self.catalog.format(keys::CREATE_SEQUENCE_REFUSED, &[&reason]),
                }
                .into());
            }
        }

        let identifier = format!("urn:uuid:{}", Uuid::new_v4());
        self.in_transaction(&identifier, |tx| {
            let acks_to = acks_to.or_else(|| ctx.reply_to.clone());
            let record = tx.create(SequenceRecord::inbound(identifier.clone(), acks_to))?;
            record.apply(SequenceEvent::CreateAccepted)?;

            let mut response = RmHeader::CreateSequenceResponse {
                identifier: identifier.clone(),
            }
            .into_message(ctx.reply_to.clone());
            response.relates_to = Some(ctx.message_id().to_string());
            response.set_response(true);

            let mut staged = Staged::new(ReceiveOutcome::Created {
                identifier: identifier.clone(),
            });
            staged.responses.push(response);
            staged
                .events
                .push((SEQUENCE_CREATED, None, json!({ "role": "inbound" })));
            Ok(staged)
        })
        .await
    }

    fn stage_sequence(
        &self,
        tx: &mut Transaction<'_>,
        ctx: &MessageContext,
        identifier: &str,
        number: u64,
        last_message: bool,
    ) -> ProcessingResult<Staged> {
        let record = inbound(tx, identifier)?;
        if number == 0 {
            return Err(RmFault::internal(self.catalog.format(
                keys::INVALID_MESSAGE_NUMBER,
                &[&number.to_string(), identifier],
            ))
            .into());
        }
        if record.state == SequenceState::Terminated {
            return Err(RmFault::SequenceTerminated {
                identifier: identifier.to_string(),
            }
            .into());
        }
        if let Some(last) = record.last_message_number {
            if number > last {
                return Err(RmFault::LastMessageNumberExceeded {
                    identifier: identifier.to_string(),
                    number,
                    last,
                }
                .into());
            }
        }
        if number == u64::MAX {
            return Err(RmFault::MessageNumberRollover {
                identifier: identifier.to_string(),
            }
            .into());
        }
        record.apply(SequenceEvent::ApplicationMessage)?;
        if last_message {
            record.last_message_number = Some(number);
        }

        let fresh = !record.received.contains(&number);
        if fresh
            && self.policy.in_order_delivery
            && number > record.delivered_up_to.saturating_add(self.policy.out_of_order_window)
        {
            return Err(RmFault::OutOfOrderWindowExceeded {
                identifier: identifier.to_string(),
                number,
                window: self.policy.out_of_order_window,
            }
            .into());
        }
        if fresh {
            record.received.insert(number);
            let mut payload = ctx.clone();
            payload.rm_header = None;
            record.buffered.insert(number, payload);
        }

        let mut deliveries = Vec::new();
        if self.policy.in_order_delivery {
            // duplicates also drain what an earlier failed delivery left behind
            while let Some(next) = record.buffered.remove(&(record.delivered_up_to + 1)) {
                record.delivered_up_to += 1;
                deliveries.push((record.delivered_up_to, next));
            }
        } else if fresh {
            deliveries.extend(record.buffered.remove(&number).map(|p| (number, p)));
            while record.received.contains(&(record.delivered_up_to + 1)) {
                record.delivered_up_to += 1;
            }
        }

        let outcome = if !deliveries.is_empty() {
            ReceiveOutcome::Delivered {
                identifier: identifier.to_string(),
                numbers: deliveries.iter().map(|(n, _)| *n).collect(),
            }
        } else if fresh {
            ReceiveOutcome::Buffered {
                identifier: identifier.to_string(),
                number,
            }
        } else {
            ReceiveOutcome::Duplicate {
                identifier: identifier.to_string(),
                number,
            }
        };
        let mut staged = Staged::new(outcome);
        for (delivered, _) in &deliveries {
            staged.events.push((MESSAGE_DELIVERED, Some(*delivered), Value::Null));
        }
        staged.deliveries = deliveries;

        staged.responses.push(acknowledgement(record, ctx.reply_to.clone()));
        Ok(staged)
    }

    fn stage_terminate(
        &self,
        tx: &mut Transaction<'_>,
        ctx: &MessageContext,
        identifier: &str,
        last_message_number: Option<u64>,
    ) -> ProcessingResult<Staged> {
        let record = inbound(tx, identifier)?;
        let mut staged = Staged::new(ReceiveOutcome::Terminated {
            identifier: identifier.to_string(),
        });

        if record.state != SequenceState::Terminated {
            if let Some(last) = last_message_number {
                record.last_message_number = Some(last);
            }
            record.apply(SequenceEvent::TerminateRequested)?;
            record.apply(SequenceEvent::TerminateCompleted)?;
            if !record.buffered.is_empty() {
                warn!(
                    sequence_id = %identifier,
                    undelivered = record.buffered.len(),
                    "⚠️ Sequence terminated with messages still waiting for gaps"
                );
            }
            staged.events.push((
                SEQUENCE_TERMINATED,
                None,
                json!({ "received": record.received.len() }),
            ));
        }

        staged.responses.push(acknowledgement(record, ctx.reply_to.clone()));
        let mut response = RmHeader::TerminateSequenceResponse {
            identifier: identifier.to_string(),
        }
        .into_message(ctx.reply_to.clone().or_else(|| record.acks_to.clone()));
        response.relates_to = Some(ctx.message_id().to_string());
        response.set_response(true);
        staged.responses.push(response);
        Ok(staged)
    }

    async fn source_bound(&self, ctx: &MessageContext, header: RmHeader) -> ProcessingResult<Staged> {
        let Some(sender) = &self.sender else {
            return Err(RmFault::internal(
                self.catalog.format(keys::NO_RELIABLE_SENDER, &[header.kind()]),
            )
            .into());
        };

        match header {
            RmHeader::CreateSequenceResponse { identifier } => {
                let request_id = ctx.relates_to.as_deref().unwrap_or_default();
                sender
                    .handle_create_sequence_response(request_id, &identifier)
                    .await?;
            }
            RmHeader::SequenceAcknowledgement {
                identifier,
                ranges,
                nacks,
            } => {
                sender.handle_acknowledgement(&identifier, &ranges, &nacks).await?;
            }
            RmHeader::TerminateSequenceResponse { identifier } => {
                sender.handle_terminate_response(&identifier).await?;
            }
            other => {
                return Err(RmFault::internal(format!("unexpected {} header", other.kind())).into())
            }
        }
        Ok(Staged::new(ReceiveOutcome::Handled))
    }

    /// A fault answering one of our CreateSequence requests
    async fn refused_create(&self, ctx: &MessageContext) -> ProcessingResult<Option<Staged>> {
        let (Some(sender), Some(request_id)) = (&self.sender, ctx.relates_to.as_deref()) else {
            return Ok(None);
        };
        if !sender.is_pending_create(request_id) {
            return Ok(None);
        }

        let reason = ctx
            .payload
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("CreateSequence refused");
        sender.handle_create_sequence_refused(request_id, reason).await?;
        Ok(Some(Staged::new(ReceiveOutcome::Handled)))
    }

    async fn release(&self, staged: Staged) -> ReceiveOutcome {
        let sequence_id = match &staged.outcome {
            ReceiveOutcome::Created { identifier }
            | ReceiveOutcome::Delivered { identifier, .. }
            | ReceiveOutcome::Duplicate { identifier, .. }
            | ReceiveOutcome::Buffered { identifier, .. }
            | ReceiveOutcome::Acknowledged { identifier }
            | ReceiveOutcome::Terminated { identifier } => Some(identifier.clone()),
            ReceiveOutcome::Handled | ReceiveOutcome::NotReliable => None,
        };

        if let Some(sequence_id) = &sequence_id {
            for (name, number, context) in staged.events {
                self.publisher.publish(name, sequence_id.clone(), number, context);
            }
            let state = self
                .storage
                .state(sequence_id)
                .map(|state| state.to_string())
                .unwrap_or_default();
            log_sequence_operation("receive", Some(sequence_id), None, &state, None);
        }

        for response in staged.responses {
            if response.to.is_none() {
                debug!(message_id = %response.message_id(), "Response has no destination, skipped");
                continue;
            }
            let message_id = response.message_id().to_string();
            if let Err(e) = send_timeout(self.transport.as_ref(), response, self.policy.send_timeout).await {
                warn!(message_id = %message_id, error = %e, "⚠️ Failed to send reliable messaging response");
            }
        }
        staged.outcome
    }

    async fn fail(&self, ctx: &mut MessageContext, error: ProcessingError) -> RmFault {
        let fault = match error {
            ProcessingError::Fault(fault) => fault,
            other => RmFault::internal(
                self.catalog
                    .format(keys::PROCESSING_FAILED, &[&other.to_string()]),
            ),
        };
        ctx.pause();

        let reason = self.localize(&fault);
        log_error(
            "rm_receiver",
            "receive",
            &reason,
            Some(&format!("message_id={} code={}", ctx.message_id(), fault.fault_code())),
        );

        if let Some(destination) = ctx.fault_to.clone().or_else(|| ctx.reply_to.clone()) {
            let mut message = MessageContext::new(json!({
                "code": fault.fault_code(),
                "reason": reason,
            }));
            message.to = Some(destination);
            message.relates_to = Some(ctx.message_id().to_string());
            message.set_fault(true);
            message.set_response(true);
            if let Err(e) = send_timeout(self.transport.as_ref(), message, self.policy.send_timeout).await {
                warn!(error = %e, "⚠️ Failed to send reliable messaging fault");
            }
        }
        fault
    }

    /// Human readable reason for `fault` from the catalog
    fn localize(&self, fault: &RmFault) -> String {
        match fault {
            RmFault::UnknownSequence { identifier } => {
                self.catalog.format(keys::UNKNOWN_SEQUENCE, &[identifier])
            }
            RmFault::SequenceTerminating { identifier } => {
                self.catalog.format(keys::SEQUENCE_TERMINATING, &[identifier])
            }
            RmFault::DeliveryFailed {
                identifier,
                message_number,
                ..
            } => self
                .catalog
                .format(keys::DELIVERY_FAILED, &[&message_number.to_string(), identifier]),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{Endpoint, EnvironmentError, EnvironmentResult, InMemoryEnvironment};
    use crate::rm::transport::ChannelTransport;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio_test::{assert_err, assert_ok};

    /// Refuses the `fail_on`-th injection, recording the rest
    #[derive(Debug)]
    struct RefusingEnvironment {
        inner: Arc<InMemoryEnvironment>,
        fail_on: usize,
        calls: AtomicUsize,
    }

    impl SynapseEnvironment for RefusingEnvironment {
        fn create_message_context(&self) -> MessageContext {
            self.inner.create_message_context()
        }

        fn inject_message(&self, ctx: MessageContext) -> EnvironmentResult<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
                return Err(EnvironmentError::Closed);
            }
            self.inner.inject_message(ctx)
        }

        fn send(&self, endpoint: Option<&Endpoint>, ctx: MessageContext) -> EnvironmentResult<()> {
            self.inner.send(endpoint, ctx)
        }
    }

    struct Harness {
        receiver: RmMessageReceiver,
        environment: Arc<InMemoryEnvironment>,
        wire: UnboundedReceiver<MessageContext>,
    }

    fn harness(policy: RmPolicy) -> Harness {
        harness_refusing(policy, 0)
    }

    /// Harness whose environment refuses injection number `fail_on` (0: never)
    fn harness_refusing(policy: RmPolicy, fail_on: usize) -> Harness {
        let (transport, wire) = ChannelTransport::new();
        let environment = Arc::new(InMemoryEnvironment::default());
        let refusing = Arc::new(RefusingEnvironment {
            inner: environment.clone(),
            fail_on,
            calls: AtomicUsize::new(0),
        });
        let receiver = RmMessageReceiver::new(
            Arc::new(StorageManager::new()),
            Arc::new(transport),
            refusing,
            policy,
        );
        Harness {
            receiver,
            environment,
            wire,
        }
    }

    async fn next(wire: &mut UnboundedReceiver<MessageContext>) -> MessageContext {
        tokio::time::timeout(Duration::from_secs(2), wire.recv())
            .await
            .expect("no message on the wire")
            .expect("wire closed")
    }

    async fn open_sequence(h: &mut Harness) -> String {
        let mut create = RmHeader::CreateSequence { acks_to: None }
            .into_message(Some("http://esb/services/Orders".into()));
        create.reply_to = Some("http://client/acks".into());

        let outcome = h.receiver.receive(&mut create).await.unwrap();
        let ReceiveOutcome::Created { identifier } = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        let response = next(&mut h.wire).await;
        assert_eq!(response.relates_to.as_deref(), Some(create.message_id()));
        identifier
    }

    fn app_message(identifier: &str, number: u64, last: bool) -> MessageContext {
        let mut ctx = MessageContext::new(json!({ "n": number }))
            .with_to("http://esb/services/Orders")
            .with_rm_header(RmHeader::Sequence {
                identifier: identifier.to_string(),
                message_number: number,
                last_message: last,
            });
        ctx.reply_to = Some("http://client/acks".into());
        ctx
    }

    #[tokio::test]
    async fn test_create_sequence_establishes_inbound_record() {
        let mut h = harness(RmPolicy::default());
        let identifier = open_sequence(&mut h).await;

        assert!(identifier.starts_with("urn:uuid:"));
        assert_eq!(
            h.receiver.sequence_state(&identifier),
            Some(SequenceState::Established)
        );
    }

    #[tokio::test]
    async fn test_disabled_service_refuses_create() {
        let mut h = harness(RmPolicy::default().disable_service("Orders"));
        let mut create = RmHeader::CreateSequence { acks_to: None }
            .into_message(Some("http://esb/services/Orders".into()));
        create.reply_to = Some("http://client/acks".into());

        let fault = h.receiver.receive(&mut create).await.unwrap_err();
        assert_eq!(fault.fault_code(), "CreateSequenceRefused");
        assert!(fault.to_string().contains("'Orders'"));
        assert!(create.is_paused());

        let reported = next(&mut h.wire).await;
        assert!(reported.is_fault());
        assert_eq!(reported.payload["code"], "CreateSequenceRefused");
        assert!(h.receiver.storage().is_empty());
    }

    #[tokio::test]
    async fn test_duplicates_are_acknowledged_not_redelivered() {
        let mut h = harness(RmPolicy::default());
        let identifier = open_sequence(&mut h).await;

        let first = h.receiver.receive(&mut app_message(&identifier, 1, false)).await.unwrap();
        assert_eq!(
            first,
            ReceiveOutcome::Delivered {
                identifier: identifier.clone(),
                numbers: vec![1]
            }
        );
        let again = h.receiver.receive(&mut app_message(&identifier, 1, false)).await.unwrap();
        assert!(matches!(again, ReceiveOutcome::Duplicate { number: 1, .. }));

        let injected = h.environment.drain_injected();
        assert_eq!(injected.len(), 1);
        assert!(injected[0].rm_header.is_none());

        for _ in 0..2 {
            let ack = next(&mut h.wire).await;
            assert!(matches!(
                ack.rm_header,
                Some(RmHeader::SequenceAcknowledgement { ref ranges, .. }) if ranges.len() == 1
            ));
        }
    }

    #[tokio::test]
    async fn test_in_order_delivery_buffers_gaps() {
        let mut h = harness(RmPolicy {
            in_order_delivery: true,
            ..RmPolicy::default()
        });
        let identifier = open_sequence(&mut h).await;

        let early = h.receiver.receive(&mut app_message(&identifier, 2, false)).await.unwrap();
        assert!(matches!(early, ReceiveOutcome::Buffered { number: 2, .. }));
        assert!(h.environment.drain_injected().is_empty());

        let filled = h.receiver.receive(&mut app_message(&identifier, 1, false)).await.unwrap();
        assert_eq!(
            filled,
            ReceiveOutcome::Delivered {
                identifier: identifier.clone(),
                numbers: vec![1, 2]
            }
        );
        let payloads: Vec<_> = h
            .environment
            .drain_injected()
            .into_iter()
            .map(|ctx| ctx.payload["n"].as_u64().unwrap())
            .collect();
        assert_eq!(payloads, vec![1, 2]);
    }

    fn injected_numbers(h: &Harness) -> Vec<u64> {
        h.environment
            .drain_injected()
            .into_iter()
            .map(|ctx| ctx.payload["n"].as_u64().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_failed_delivery_keeps_delivered_prefix() {
        let mut h = harness_refusing(
            RmPolicy {
                in_order_delivery: true,
                ..RmPolicy::default()
            },
            2,
        );
        let identifier = open_sequence(&mut h).await;

        let early = h.receiver.receive(&mut app_message(&identifier, 2, false)).await.unwrap();
        assert!(matches!(early, ReceiveOutcome::Buffered { number: 2, .. }));

        let mut first = app_message(&identifier, 1, false);
        let fault = assert_err!(h.receiver.receive(&mut first).await);
        assert_eq!(fault.fault_code(), "Internal");
        assert!(first.is_paused());
        assert_eq!(injected_numbers(&h), vec![1]);

        let record = h.receiver.storage().snapshot(&identifier).unwrap();
        assert_eq!(record.delivered_up_to, 1);
        assert!(record.buffered.contains_key(&2));

        // the retransmitted message is not handed over again but unblocks 2
        let resent = assert_ok!(h.receiver.receive(&mut app_message(&identifier, 1, false)).await);
        assert_eq!(
            resent,
            ReceiveOutcome::Delivered {
                identifier: identifier.clone(),
                numbers: vec![2]
            }
        );
        assert_eq!(injected_numbers(&h), vec![2]);

        let again = h.receiver.receive(&mut app_message(&identifier, 1, false)).await.unwrap();
        assert!(matches!(again, ReceiveOutcome::Duplicate { number: 1, .. }));
        assert!(h.environment.drain_injected().is_empty());
    }

    #[tokio::test]
    async fn test_failed_single_delivery_rolls_back() {
        let mut h = harness_refusing(RmPolicy::default(), 1);
        let identifier = open_sequence(&mut h).await;

        assert_err!(h.receiver.receive(&mut app_message(&identifier, 1, false)).await);
        assert!(!h.receiver.storage().snapshot(&identifier).unwrap().received.contains(&1));

        let resent = h.receiver.receive(&mut app_message(&identifier, 1, false)).await.unwrap();
        assert!(matches!(resent, ReceiveOutcome::Delivered { .. }));
        assert_eq!(injected_numbers(&h), vec![1]);
    }

    #[tokio::test]
    async fn test_in_order_window_bounds_buffering() {
        let mut h = harness(RmPolicy {
            in_order_delivery: true,
            out_of_order_window: 4,
            ..RmPolicy::default()
        });
        let identifier = open_sequence(&mut h).await;

        let fault = h
            .receiver
            .receive(&mut app_message(&identifier, 5, false))
            .await
            .unwrap_err();
        assert!(matches!(
            fault,
            RmFault::OutOfOrderWindowExceeded { number: 5, window: 4, .. }
        ));
        assert_eq!(fault.fault_code(), "MessageNumberOutOfWindow");
        let record = h.receiver.storage().snapshot(&identifier).unwrap();
        assert!(record.buffered.is_empty());
        assert!(!record.received.contains(&5));

        let inside = h.receiver.receive(&mut app_message(&identifier, 4, false)).await.unwrap();
        assert!(matches!(inside, ReceiveOutcome::Buffered { number: 4, .. }));
    }

    #[tokio::test]
    async fn test_unknown_sequence_faults_and_pauses() {
        let h = harness(RmPolicy::default());
        let mut ctx = app_message("urn:uuid:missing", 1, false);

        let fault = h.receiver.receive(&mut ctx).await.unwrap_err();
        assert_eq!(fault, RmFault::unknown("urn:uuid:missing"));
        assert!(ctx.is_paused());
    }

    #[tokio::test]
    async fn test_numbers_past_last_message_are_rejected() {
        let mut h = harness(RmPolicy::default());
        let identifier = open_sequence(&mut h).await;
        h.receiver.receive(&mut app_message(&identifier, 2, true)).await.unwrap();

        let fault = h
            .receiver
            .receive(&mut app_message(&identifier, 3, false))
            .await
            .unwrap_err();
        assert!(matches!(
            fault,
            RmFault::LastMessageNumberExceeded { number: 3, last: 2, .. }
        ));
        // the failed message left no trace
        let record = h.receiver.storage().snapshot(&identifier).unwrap();
        assert!(!record.received.contains(&3));
    }

    #[tokio::test]
    async fn test_terminate_sequence_responds_and_closes() {
        let mut h = harness(RmPolicy::default());
        let identifier = open_sequence(&mut h).await;
        h.receiver.receive(&mut app_message(&identifier, 1, false)).await.unwrap();
        next(&mut h.wire).await;

        let mut terminate = RmHeader::TerminateSequence {
            identifier: identifier.clone(),
            last_message_number: Some(1),
        }
        .into_message(Some("http://esb/services/Orders".into()));
        terminate.reply_to = Some("http://client/acks".into());
        let outcome = h.receiver.receive(&mut terminate).await.unwrap();
        assert!(matches!(outcome, ReceiveOutcome::Terminated { .. }));

        let _final_ack = next(&mut h.wire).await;
        let response = next(&mut h.wire).await;
        assert_eq!(
            response.rm_header,
            Some(RmHeader::TerminateSequenceResponse {
                identifier: identifier.clone()
            })
        );
        assert_eq!(h.receiver.sequence_state(&identifier), Some(SequenceState::Terminated));

        let late = h.receiver.receive(&mut app_message(&identifier, 1, false)).await;
        assert!(matches!(late, Err(RmFault::SequenceTerminated { .. })));
    }

    #[tokio::test]
    async fn test_source_bound_header_without_sender_faults() {
        let h = harness(RmPolicy::default());
        let mut ctx = RmHeader::TerminateSequenceResponse {
            identifier: "s1".to_string(),
        }
        .into_message(None);

        let fault = h.receiver.receive(&mut ctx).await.unwrap_err();
        assert!(fault.to_string().contains("No reliable sender"));
    }

    #[tokio::test]
    async fn test_plain_messages_pass_through() {
        let h = harness(RmPolicy::default());
        let mut ctx = MessageContext::new(json!({}));
        let outcome = h.receiver.receive(&mut ctx).await.unwrap();
        assert!(outcome.requires_mediation());
    }
}
