#![allow(dead_code)]

use proptest::prelude::*;
use proptest::strategy::Just;
use synapse_core::rm::SequenceEvent;

/// Message numbers as a destination would record them: small, with gaps
pub fn message_numbers_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(1u64..=200, 0..60)
}

/// Any event the sequence state machine understands
pub fn sequence_event_strategy() -> impl Strategy<Value = SequenceEvent> {
    prop_oneof![
        Just(SequenceEvent::CreateRequested),
        Just(SequenceEvent::CreateAccepted),
        "[a-z ]{1,20}".prop_map(SequenceEvent::CreateRefused),
        Just(SequenceEvent::ApplicationMessage),
        Just(SequenceEvent::Acknowledgement),
        Just(SequenceEvent::TerminateRequested),
        Just(SequenceEvent::TerminateCompleted),
        Just(SequenceEvent::Timeout),
        "[a-z ]{1,20}".prop_map(SequenceEvent::Fail),
    ]
}

pub fn sequence_events_strategy() -> impl Strategy<Value = Vec<SequenceEvent>> {
    prop::collection::vec(sequence_event_strategy(), 1..30)
}

/// (base interval ms, cap ms, attempt) for backoff calculations
pub fn backoff_strategy() -> impl Strategy<Value = (u64, u64, u32)> {
    (1u64..10_000, 1u64..120_000, 1u32..64)
}

/// Property names accepted by `$ctx:` expressions
pub fn property_name_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z_][a-zA-Z0-9_.]{0,31}"
}

/// Literal values that do not start with an expression prefix
pub fn literal_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9][a-zA-Z0-9_-]{0,31}"
}
