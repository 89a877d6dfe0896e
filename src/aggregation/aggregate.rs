use crate::constants::properties::MESSAGE_SEQUENCE;
use crate::message::MessageContext;
use std::time::{Duration, Instant};

/// When an aggregate is considered complete
///
/// Counts of `-1` (or any non-positive value) are unset. A zero timeout means
/// no deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionCondition {
    pub min_count: i64,
    pub max_count: i64,
    pub timeout: Option<Duration>,
}

impl Default for CompletionCondition {
    fn default() -> Self {
        Self {
            min_count: -1,
            max_count: -1,
            timeout: None,
        }
    }
}

impl CompletionCondition {
    pub fn with_min_count(mut self, min_count: i64) -> Self {
        self.min_count = min_count;
        self
    }

    pub fn with_max_count(mut self, max_count: i64) -> Self {
        self.max_count = max_count;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    fn min(&self) -> Option<usize> {
        (self.min_count > 0).then_some(self.min_count as usize)
    }

    fn max(&self) -> Option<usize> {
        (self.max_count > 0).then_some(self.max_count as usize)
    }
}

/// Why an aggregate completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionReason {
    /// A total-count hint on the collected messages says every part arrived
    AllParts,
    MinCount,
    MaxCount,
    Timeout,
}

/// Messages collected for one correlation key
#[derive(Debug)]
pub struct Aggregate {
    correlation: String,
    condition: CompletionCondition,
    sequence_property: String,
    created_at: Instant,
    expire_at: Option<Instant>,
    messages: Vec<MessageContext>,
}

impl Aggregate {
    /// Start an aggregate; the deadline is `created_at + timeout`
    pub fn new(
        correlation: impl Into<String>,
        condition: CompletionCondition,
        created_at: Instant,
    ) -> Self {
        Self {
            correlation: correlation.into(),
            condition,
            sequence_property: MESSAGE_SEQUENCE.to_string(),
            created_at,
            expire_at: condition.timeout.map(|timeout| created_at + timeout),
            messages: Vec::new(),
        }
    }

    /// Read split positions from `property` instead of the default one
    pub fn with_sequence_property(mut self, property: impl Into<String>) -> Self {
        self.sequence_property = property.into();
        self
    }

    pub fn correlation(&self) -> &str {
        &self.correlation
    }

    pub fn condition(&self) -> &CompletionCondition {
        &self.condition
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn expire_time(&self) -> Option<Instant> {
        self.expire_at
    }

    pub fn messages(&self) -> &[MessageContext] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// True once `max_count` messages are held
    pub fn is_full(&self) -> bool {
        self.condition
            .max()
            .is_some_and(|max| self.messages.len() >= max)
    }

    /// Add a message; refused once `max_count` messages are held
    pub fn add_message(&mut self, ctx: MessageContext) -> bool {
        if self.is_full() {
            return false;
        }
        self.messages.push(ctx);
        true
    }

    /// Total announced by the collected messages' split positions
    fn total_hint(&self) -> Option<usize> {
        self.messages
            .iter()
            .find_map(|ctx| ctx.message_sequence_of(&self.sequence_property))
            .map(|(_, total)| total)
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expire_at.is_some_and(|expire| now >= expire)
    }

    pub fn completion_reason_at(&self, now: Instant) -> Option<CompletionReason> {
        let size = self.messages.len();

        match self.total_hint() {
            Some(total) if size >= total => return Some(CompletionReason::AllParts),
            Some(_) => {}
            None => {
                if self.condition.min().is_some_and(|min| size >= min) {
                    return Some(CompletionReason::MinCount);
                }
            }
        }

        if self.condition.max().is_some_and(|max| size >= max) {
            return Some(CompletionReason::MaxCount);
        }

        self.is_expired_at(now).then_some(CompletionReason::Timeout)
    }

    pub fn is_complete_at(&self, now: Instant) -> bool {
        self.completion_reason_at(now).is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete_at(Instant::now())
    }

    /// Collected messages, sorted by split position when every message has one
    pub fn into_ordered_messages(self) -> Vec<MessageContext> {
        let property = self.sequence_property;
        let mut messages = self.messages;

        let all_positioned = messages
            .iter()
            .all(|ctx| ctx.message_sequence_of(&property).is_some());
        if all_positioned {
            messages.sort_by_key(|ctx| {
                ctx.message_sequence_of(&property)
                    .map(|(index, _)| index)
                    .unwrap_or(usize::MAX)
            });
        }
        messages
    }
}
