//! # Aggregation
//!
//! In-flight aggregation state. An [`Aggregate`] collects the messages that
//! share a correlation key until its [`CompletionCondition`] holds; the
//! [`AggregateTracker`] owns one aggregate per key and makes `offer` and
//! completion atomic per key.
//!
//! Completion precedence:
//!
//! 1. a total-count hint carried by the messages' split position
//! 2. `min_count` (only consulted when no hint is present)
//! 3. `max_count` reached
//! 4. the deadline (`created + timeout`), completing with a partial set

pub mod aggregate;
pub mod tracker;

pub use aggregate::{Aggregate, CompletionCondition, CompletionReason};
pub use tracker::{AggregateInfo, AggregateTracker, CompletedAggregate, OfferResult};
