use super::aggregate::{Aggregate, CompletionCondition, CompletionReason};
use crate::constants::properties::MESSAGE_SEQUENCE;
use crate::message::MessageContext;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Result of offering a message to the tracker
#[derive(Debug)]
pub enum OfferResult {
    /// Message held; `created` is true when it started a new aggregate
    Parked { size: usize, created: bool },
    /// Message completed its aggregate, which is no longer tracked
    Completed(CompletedAggregate),
    /// The aggregate refused the message (max count reached)
    Rejected(MessageContext),
}

/// An aggregate removed from tracking after completion
#[derive(Debug)]
pub struct CompletedAggregate {
    pub correlation: String,
    /// Ordered by split position when every message carries one
    pub messages: Vec<MessageContext>,
    pub timed_out: bool,
}

impl CompletedAggregate {
    fn from_aggregate(aggregate: Aggregate, reason: CompletionReason) -> Self {
        Self {
            correlation: aggregate.correlation().to_string(),
            messages: aggregate.into_ordered_messages(),
            timed_out: reason == CompletionReason::Timeout,
        }
    }
}

/// Point-in-time view of a tracked aggregate
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateInfo {
    pub correlation: String,
    pub size: usize,
    pub created_at: Instant,
    pub expire_at: Option<Instant>,
}

#[derive(Debug)]
struct TrackedAggregate {
    aggregate: Option<Aggregate>,
}

impl TrackedAggregate {
    /// Closed entries are being removed; offers must start a new aggregate
    fn is_closed(&self) -> bool {
        self.aggregate.is_none()
    }
}

/// In-flight aggregates keyed by correlation
///
/// The map is only locked long enough to fetch an entry; all work on an
/// aggregate happens under its own mutex, so offers for different keys never
/// contend and `offer` / completion for the same key are atomic.
#[derive(Debug)]
pub struct AggregateTracker {
    entries: DashMap<String, Arc<Mutex<TrackedAggregate>>>,
    condition: CompletionCondition,
    sequence_property: String,
}

impl AggregateTracker {
    pub fn new(condition: CompletionCondition) -> Self {
        Self {
            entries: DashMap::new(),
            condition,
            sequence_property: MESSAGE_SEQUENCE.to_string(),
        }
    }

    pub fn with_sequence_property(mut self, property: impl Into<String>) -> Self {
        self.sequence_property = property.into();
        self
    }

    pub fn condition(&self) -> &CompletionCondition {
        &self.condition
    }

    fn new_aggregate(&self, key: &str) -> Aggregate {
        Aggregate::new(key, self.condition, Instant::now())
            .with_sequence_property(self.sequence_property.clone())
    }

    fn slot(&self, key: &str) -> (Arc<Mutex<TrackedAggregate>>, bool) {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(occupied) => (Arc::clone(occupied.get()), false),
            Entry::Vacant(vacant) => {
                let slot = Arc::new(Mutex::new(TrackedAggregate {
                    aggregate: Some(self.new_aggregate(key)),
                }));
                vacant.insert(Arc::clone(&slot));
                (slot, true)
            }
        }
    }

    fn detach(&self, key: &str, slot: &Arc<Mutex<TrackedAggregate>>) {
        self.entries
            .remove_if(key, |_, current| Arc::ptr_eq(current, slot));
    }

    /// Add `ctx` to the aggregate for `key`, completing it if the condition holds
    pub fn offer(&self, key: &str, ctx: MessageContext) -> OfferResult {
        loop {
            let (slot, created) = self.slot(key);
            let mut tracked = slot.lock();

            let Some(aggregate) = tracked.aggregate.as_mut() else {
                // completed by a concurrent caller, not yet detached
                drop(tracked);
                self.detach(key, &slot);
                continue;
            };

            if aggregate.is_full() {
                debug!(correlation = %key, size = aggregate.len(), "Aggregate refused message");
                return OfferResult::Rejected(ctx);
            }
            aggregate.add_message(ctx);

            let size = aggregate.len();
            match aggregate.completion_reason_at(Instant::now()) {
                Some(reason) => {
                    let completed = tracked.aggregate.take();
                    drop(tracked);
                    self.detach(key, &slot);
                    return match completed {
                        Some(aggregate) => {
                            info!(
                                correlation = %key,
                                size = size,
                                reason = ?reason,
                                "✅ Aggregate completed"
                            );
                            OfferResult::Completed(CompletedAggregate::from_aggregate(
                                aggregate, reason,
                            ))
                        }
                        None => OfferResult::Parked { size, created },
                    };
                }
                None => {
                    debug!(correlation = %key, size = size, created = created, "Message parked in aggregate");
                    return OfferResult::Parked { size, created };
                }
            }
        }
    }

    fn complete_slot_if_expired(
        &self,
        key: &str,
        slot: &Arc<Mutex<TrackedAggregate>>,
        now: Instant,
    ) -> Option<CompletedAggregate> {
        let mut tracked = slot.lock();
        let expired = tracked
            .aggregate
            .as_ref()
            .is_some_and(|aggregate| aggregate.is_expired_at(now));
        if !expired {
            return None;
        }

        let aggregate = tracked.aggregate.take()?;
        drop(tracked);
        self.detach(key, slot);

        info!(
            correlation = %key,
            size = aggregate.len(),
            "⏰ Aggregate completed by timeout with partial set"
        );
        Some(CompletedAggregate::from_aggregate(
            aggregate,
            CompletionReason::Timeout,
        ))
    }

    /// Complete the aggregate for `key` if its deadline has passed
    pub fn complete_if_expired(&self, key: &str) -> Option<CompletedAggregate> {
        let slot = self.entries.get(key).map(|entry| Arc::clone(entry.value()))?;
        self.complete_slot_if_expired(key, &slot, Instant::now())
    }

    /// Complete every aggregate whose deadline is at or before `now`
    pub fn complete_expired(&self, now: Instant) -> Vec<CompletedAggregate> {
        let slots: Vec<(String, Arc<Mutex<TrackedAggregate>>)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        slots
            .into_iter()
            .filter_map(|(key, slot)| self.complete_slot_if_expired(&key, &slot, now))
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<AggregateInfo> {
        let slot = self.entries.get(key).map(|entry| Arc::clone(entry.value()))?;
        let tracked = slot.lock();
        let aggregate = tracked.aggregate.as_ref()?;
        Some(AggregateInfo {
            correlation: aggregate.correlation().to_string(),
            size: aggregate.len(),
            created_at: aggregate.created_at(),
            expire_at: aggregate.expire_time(),
        })
    }

    pub fn active_count(&self) -> usize {
        self.entries.len()
    }

    /// Stop tracking `key`, discarding its messages; removing twice is a no-op
    pub fn remove(&self, key: &str) -> Option<Vec<MessageContext>> {
        let (_, slot) = self.entries.remove(key)?;
        let mut tracked = slot.lock();
        let closed = tracked.is_closed();
        let aggregate = tracked.aggregate.take();
        if !closed {
            debug!(correlation = %key, "Aggregate removed");
        }
        aggregate.map(Aggregate::into_ordered_messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_offer_parks_then_completes_and_restarts() {
        let tracker = AggregateTracker::new(CompletionCondition::default().with_min_count(2));

        match tracker.offer("k", MessageContext::new(json!(1))) {
            OfferResult::Parked { size, created } => {
                assert_eq!(size, 1);
                assert!(created);
            }
            other => panic!("expected parked, got {other:?}"),
        }
        assert_eq!(tracker.active_count(), 1);

        match tracker.offer("k", MessageContext::new(json!(2))) {
            OfferResult::Completed(completed) => {
                assert_eq!(completed.messages.len(), 2);
                assert!(!completed.timed_out);
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(tracker.active_count(), 0);

        assert!(matches!(
            tracker.offer("k", MessageContext::new(json!(3))),
            OfferResult::Parked { created: true, .. }
        ));
    }

    #[test]
    fn test_complete_expired_returns_partial_sets() {
        let tracker = AggregateTracker::new(
            CompletionCondition::default()
                .with_min_count(5)
                .with_timeout(Duration::from_millis(50)),
        );
        tracker.offer("a", MessageContext::new(json!(1)));
        tracker.offer("a", MessageContext::new(json!(2)));
        tracker.offer("b", MessageContext::new(json!(3)));

        assert!(tracker.complete_expired(Instant::now()).is_empty());

        let later = Instant::now() + Duration::from_millis(100);
        let mut completed = tracker.complete_expired(later);
        completed.sort_by(|x, y| x.correlation.cmp(&y.correlation));

        assert_eq!(completed.len(), 2);
        assert_eq!(completed[0].messages.len(), 2);
        assert!(completed[0].timed_out);
        assert_eq!(tracker.active_count(), 0);
        assert!(tracker.complete_expired(later).is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let tracker = AggregateTracker::new(CompletionCondition::default().with_min_count(3));
        tracker.offer("k", MessageContext::default());

        assert_eq!(tracker.remove("k").map(|m| m.len()), Some(1));
        assert!(tracker.remove("k").is_none());
        assert!(tracker.get("k").is_none());
    }
}
