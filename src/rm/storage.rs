//! # Sequence Storage
//!
//! Per-sequence records behind key-scoped locks. All mutation goes through a
//! [`Transaction`]: it holds the sequence lock, works on a private copy of the
//! committed record and publishes it on [`Transaction::commit`]. A dropped or
//! rolled back transaction leaves the committed record untouched, and
//! [`StorageManager::snapshot`] only ever returns committed state.

use super::errors::{RmResult, StorageError, StorageResult};
use super::events::SequenceEvent;
use super::headers::AckRange;
use super::ranges;
use super::state_machine::SequenceStateMachine;
use super::states::SequenceState;
use crate::message::{EndpointReference, MessageContext};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Which end of the sequence this process plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceRole {
    /// RM source: numbers, stores and retransmits messages
    Outbound,
    /// RM destination: receives, acknowledges and delivers messages
    Inbound,
}

/// Outbound message kept until acknowledged
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub number: u64,
    pub ctx: MessageContext,
    pub last_message: bool,
    pub send_count: u32,
    pub last_sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct SequenceRecord {
    pub internal_id: String,
    pub role: SequenceRole,
    pub state: SequenceState,
    /// Identifier agreed on the wire; for inbound sequences the internal id
    pub wire_id: Option<String>,
    /// Next outbound message number
    pub next_number: u64,
    /// Outbound messages awaiting acknowledgement
    pub pending: BTreeMap<u64, StoredMessage>,
    pub acknowledged: BTreeSet<u64>,
    /// Outbound numbers given up after the retry budget
    pub failed: BTreeSet<u64>,
    /// Inbound numbers seen
    pub received: BTreeSet<u64>,
    /// Inbound numbers handed to the application, contiguous from 1
    pub delivered_up_to: u64,
    /// Inbound messages held back for in-order delivery
    pub buffered: BTreeMap<u64, MessageContext>,
    pub last_message_number: Option<u64>,
    pub destination: Option<EndpointReference>,
    pub acks_to: Option<EndpointReference>,
    pub create_request_id: Option<String>,
    /// CreateSequence transmissions so far
    pub create_attempts: u32,
    pub termination_requested: bool,
    /// TerminateSequence transmissions so far
    pub terminate_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub last_activity: Instant,
    pub terminated_at: Option<Instant>,
}

impl SequenceRecord {
    fn new(internal_id: String, role: SequenceRole) -> Self {
        Self {
            internal_id,
            role,
            state: SequenceState::Initial,
            wire_id: None,
            next_number: 1,
            pending: BTreeMap::new(),
            acknowledged: BTreeSet::new(),
            failed: BTreeSet::new(),
            received: BTreeSet::new(),
            delivered_up_to: 0,
            buffered: BTreeMap::new(),
            last_message_number: None,
            destination: None,
            acks_to: None,
            create_request_id: None,
            create_attempts: 0,
            termination_requested: false,
            terminate_attempts: 0,
            created_at: Utc::now(),
            last_activity: Instant::now(),
            terminated_at: None,
        }
    }

    pub fn outbound(sequence_key: impl Into<String>, destination: Option<EndpointReference>) -> Self {
        let mut record = Self::new(sequence_key.into(), SequenceRole::Outbound);
        record.destination = destination;
        record
    }

    pub fn inbound(wire_id: impl Into<String>, acks_to: Option<EndpointReference>) -> Self {
        let wire_id = wire_id.into();
        let mut record = Self::new(wire_id.clone(), SequenceRole::Inbound);
        record.wire_id = Some(wire_id);
        record.acks_to = acks_to;
        record
    }

    /// Identifier to use in logs and faults
    pub fn identifier(&self) -> &str {
        self.wire_id.as_deref().unwrap_or(&self.internal_id)
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Move the record through the transition table
    pub fn apply(&mut self, event: SequenceEvent) -> RmResult<SequenceState> {
        let mut machine = SequenceStateMachine::with_state(self.state);
        let state = machine.transition(self.identifier(), &event)?;
        if state == SequenceState::Terminated {
            self.mark_terminated();
        } else {
            self.state = state;
        }
        self.touch();
        Ok(state)
    }

    pub fn mark_terminated(&mut self) {
        self.state = SequenceState::Terminated;
        self.terminated_at = Some(Instant::now());
    }

    /// Every sent number is acknowledged or given up
    pub fn all_resolved(&self) -> bool {
        self.pending.is_empty()
    }

    /// Outbound numbers not yet transmitted
    pub fn queued_numbers(&self) -> Vec<u64> {
        self.pending
            .values()
            .filter(|message| message.send_count == 0)
            .map(|message| message.number)
            .collect()
    }

    /// Highest number assigned so far
    pub fn highest_number(&self) -> Option<u64> {
        self.next_number.checked_sub(1).filter(|n| *n > 0)
    }

    /// Acknowledgement ranges for received inbound messages
    pub fn ack_ranges(&self) -> Vec<AckRange> {
        ranges::compact(self.received.iter().copied())
    }
}

#[derive(Debug)]
struct Slot {
    lock: Arc<Mutex<()>>,
    committed: RwLock<Option<SequenceRecord>>,
}

impl Slot {
    fn empty() -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            committed: RwLock::new(None),
        }
    }
}

/// Sequence records keyed by internal id
#[derive(Debug, Default)]
pub struct StorageManager {
    slots: DashMap<String, Arc<Slot>>,
    wire_ids: DashMap<String, String>,
}

impl StorageManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a transaction on `key`, waiting for any other on the same key
    pub async fn begin(&self, key: &str) -> Transaction<'_> {
        let slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Slot::empty()))
            .clone();
        let guard = Arc::clone(&slot.lock).lock_owned().await;
        let working = slot.committed.read().clone();

        Transaction {
            storage: self,
            key: key.to_string(),
            slot,
            _guard: guard,
            working,
            wire_binding: None,
            active: true,
        }
    }

    /// Committed record for `key`
    pub fn snapshot(&self, key: &str) -> Option<SequenceRecord> {
        let slot = self.slots.get(key)?.clone();
        let record = slot.committed.read().clone();
        record
    }

    /// State of the committed record for `key`
    pub fn state(&self, key: &str) -> Option<SequenceState> {
        let slot = self.slots.get(key)?.clone();
        let state = slot.committed.read().as_ref().map(|record| record.state);
        state
    }

    /// Keys with a committed record
    pub fn sequence_keys(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|slot| slot.value().committed.read().is_some())
            .map(|slot| slot.key().clone())
            .collect()
    }

    pub fn resolve_wire_id(&self, wire_id: &str) -> Option<String> {
        self.wire_ids.get(wire_id).map(|key| key.clone())
    }

    pub fn bind_wire_id(&self, wire_id: impl Into<String>, key: impl Into<String>) {
        self.wire_ids.insert(wire_id.into(), key.into());
    }

    /// Drop `key` and any wire binding pointing at it
    pub async fn remove(&self, key: &str) -> Option<SequenceRecord> {
        let slot = self.slots.get(key)?.clone();
        let _guard = Arc::clone(&slot.lock).lock_owned().await;
        let removed = slot.committed.write().take();
        self.slots
            .remove_if(key, |_, current| Arc::ptr_eq(current, &slot));
        self.wire_ids.retain(|_, bound| bound != key);
        removed
    }

    pub fn len(&self) -> usize {
        self.sequence_keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive, all-or-nothing access to one sequence record
#[derive(Debug)]
pub struct Transaction<'a> {
    storage: &'a StorageManager,
    key: String,
    slot: Arc<Slot>,
    _guard: OwnedMutexGuard<()>,
    working: Option<SequenceRecord>,
    wire_binding: Option<String>,
    active: bool,
}

impl Transaction<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn record(&self) -> Option<&SequenceRecord> {
        self.working.as_ref()
    }

    pub fn record_mut(&mut self) -> Option<&mut SequenceRecord> {
        self.working.as_mut()
    }

    /// Record for the key, or `RecordNotFound`
    pub fn existing(&mut self) -> StorageResult<&mut SequenceRecord> {
        let key = self.key.clone();
        self.working
            .as_mut()
            .ok_or(StorageError::RecordNotFound { key })
    }

    /// Insert a new record; fails if one is already stored
    pub fn create(&mut self, record: SequenceRecord) -> StorageResult<&mut SequenceRecord> {
        if self.working.is_some() {
            return Err(StorageError::AlreadyExists {
                key: self.key.clone(),
            });
        }
        Ok(self.working.insert(record))
    }

    pub fn delete(&mut self) -> Option<SequenceRecord> {
        self.working.take()
    }

    /// Map `wire_id` to this key once the transaction commits
    pub fn bind_wire_id(&mut self, wire_id: impl Into<String>) {
        self.wire_binding = Some(wire_id.into());
    }

    pub fn commit(mut self) -> StorageResult<()> {
        if !self.active {
            return Err(StorageError::TransactionInactive {
                key: self.key.clone(),
            });
        }
        self.active = false;

        *self.slot.committed.write() = self.working.take();
        if let Some(wire_id) = self.wire_binding.take() {
            self.storage.bind_wire_id(wire_id, self.key.clone());
        }
        debug!(key = %self.key, "Sequence transaction committed");
        Ok(())
    }

    pub fn rollback(mut self) {
        self.discard();
    }

    fn discard(&mut self) {
        if self.active {
            self.active = false;
            self.working = None;
            self.wire_binding = None;
            debug!(key = %self.key, "Sequence transaction rolled back");
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.active {
            warn!(key = %self.key, "Transaction dropped while active, rolling back");
            self.discard();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_commit_publishes_working_copy() {
        let storage = StorageManager::new();
        let mut tx = storage.begin("seq-1").await;
        tx.create(SequenceRecord::outbound("seq-1", None)).unwrap();
        tx.existing().unwrap().next_number = 2;
        tx.bind_wire_id("urn:uuid:wire");
        assert!(storage.snapshot("seq-1").is_none());
        tx.commit().unwrap();

        assert_eq!(storage.snapshot("seq-1").unwrap().next_number, 2);
        assert_eq!(storage.resolve_wire_id("urn:uuid:wire").as_deref(), Some("seq-1"));
        assert_eq!(storage.sequence_keys(), vec!["seq-1".to_string()]);
    }

    #[tokio::test]
    async fn test_rollback_leaves_no_trace() {
        let storage = StorageManager::new();
        let mut tx = storage.begin("seq-1").await;
        tx.create(SequenceRecord::inbound("seq-1", None)).unwrap();
        tx.commit().unwrap();

        let mut tx = storage.begin("seq-1").await;
        let record = tx.existing().unwrap();
        record.received.insert(1);
        record.buffered.insert(1, MessageContext::new(json!({"n": 1})));
        assert!(storage.snapshot("seq-1").unwrap().received.is_empty());
        tx.rollback();

        let committed = storage.snapshot("seq-1").unwrap();
        assert!(committed.received.is_empty());
        assert!(committed.buffered.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let storage = StorageManager::new();
        {
            let mut tx = storage.begin("seq-1").await;
            tx.create(SequenceRecord::outbound("seq-1", None)).unwrap();
        }
        assert!(storage.snapshot("seq-1").is_none());
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let storage = StorageManager::new();
        let mut tx = storage.begin("seq-1").await;
        tx.create(SequenceRecord::outbound("seq-1", None)).unwrap();
        assert!(matches!(
            tx.create(SequenceRecord::outbound("seq-1", None)),
            Err(StorageError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_transactions_on_one_key_are_serialized() {
        let storage = Arc::new(StorageManager::new());
        {
            let mut tx = storage.begin("seq-1").await;
            tx.create(SequenceRecord::inbound("seq-1", None)).unwrap();
            tx.commit().unwrap();
        }

        let mut handles = Vec::new();
        for n in 1..=20u64 {
            let storage = Arc::clone(&storage);
            handles.push(tokio::spawn(async move {
                let mut tx = storage.begin("seq-1").await;
                tx.existing().unwrap().received.insert(n);
                tokio::task::yield_now().await;
                tx.commit().unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(storage.snapshot("seq-1").unwrap().received.len(), 20);
    }

    #[tokio::test]
    async fn test_remove_unbinds_wire_id() {
        let storage = StorageManager::new();
        let mut tx = storage.begin("seq-1").await;
        tx.create(SequenceRecord::outbound("seq-1", None)).unwrap();
        tx.bind_wire_id("wire-1");
        tx.commit().unwrap();

        assert!(storage.remove("seq-1").await.is_some());
        assert!(storage.resolve_wire_id("wire-1").is_none());
        assert!(storage.snapshot("seq-1").is_none());
    }

    #[test]
    fn test_apply_stamps_termination() {
        let mut record = SequenceRecord::outbound("s1", None);
        record.apply(SequenceEvent::CreateRequested).unwrap();
        assert_eq!(record.state, SequenceState::Creating);
        assert!(record.terminated_at.is_none());

        record.apply(SequenceEvent::Timeout).unwrap();
        assert_eq!(record.state, SequenceState::Terminated);
        assert!(record.terminated_at.is_some());
        assert!(record.apply(SequenceEvent::ApplicationMessage).is_err());
    }

    #[test]
    fn test_record_helpers() {
        let mut record = SequenceRecord::inbound("s1", None);
        record.received.extend([1, 2, 4]);
        assert_eq!(ranges::format_ranges(&record.ack_ranges()), "[1,2][4,4]");
        assert_eq!(record.highest_number(), None);
        record.next_number = 4;
        assert_eq!(record.highest_number(), Some(3));
    }
}
