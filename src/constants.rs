//! # System Constants
//!
//! Well-known property names, sequence names and lifecycle event names shared
//! by the mediation engine and the reliable messaging core.

/// Names of the sequences every configuration may define
pub mod sequences {
    /// Sequence that receives every injected message
    pub const MAIN: &str = "main";
    /// Default fault handler pushed before the main sequence runs
    pub const FAULT: &str = "fault";
}

/// Message context properties written or read by mediators
pub mod properties {
    /// Position of a split message within its group, formatted `"index/total"`
    pub const MESSAGE_SEQUENCE: &str = "aggregatorMessageSequence";
    /// Separator between index and total in [`MESSAGE_SEQUENCE`]
    pub const MESSAGE_SEQUENCE_DELIMITER: char = '/';
    /// Correlation id stamped on split messages (the parent message id)
    pub const AGGREGATE_CORRELATION: &str = "aggregateCorrelation";

    /// Fault details exposed to fault handler sequences
    pub const ERROR_CODE: &str = "ERROR_CODE";
    pub const ERROR_MESSAGE: &str = "ERROR_MESSAGE";
    pub const ERROR_DETAIL: &str = "ERROR_DETAIL";
    pub const ERROR_MEDIATOR: &str = "ERROR_MEDIATOR";

    /// Reliable messaging markers set by the reliable sequence mediator
    pub const RM_ENABLED: &str = "RM_ENABLED";
    pub const RM_SEQUENCE_KEY: &str = "RM_SEQUENCE_KEY";
    pub const RM_LAST_MESSAGE: &str = "RM_LAST_MESSAGE";
    pub const RM_SPEC_VERSION: &str = "RM_SPEC_VERSION";

    /// Set on a merged aggregate when completion was forced by the timeout
    pub const AGGREGATE_TIMED_OUT: &str = "AGGREGATE_TIMED_OUT";
    /// Number of parts collected into a merged aggregate
    pub const AGGREGATE_SIZE: &str = "AGGREGATE_SIZE";
}

/// Key used for the single shared sequence when no correlation is configured
pub const SINGLE_SEQUENCE_KEY: &str = "single-sequence";

/// Content types understood by the built-in registry mappers
pub mod content_types {
    pub const TEXT: &str = "text/plain";
    pub const JSON: &str = "application/json";
    pub const SEQUENCE: &str = "application/vnd.synapse.sequence+json";
}

/// Lifecycle events published by the reliable messaging core
pub mod events {
    pub const SEQUENCE_CREATED: &str = "sequence.created";
    pub const SEQUENCE_ESTABLISHED: &str = "sequence.established";
    pub const SEQUENCE_TERMINATING: &str = "sequence.terminating";
    pub const SEQUENCE_TERMINATED: &str = "sequence.terminated";
    pub const SEQUENCE_TIMED_OUT: &str = "sequence.timed_out";
    pub const SEQUENCE_PURGED: &str = "sequence.purged";
    pub const MESSAGE_ACKNOWLEDGED: &str = "message.acknowledged";
    pub const MESSAGE_DELIVERED: &str = "message.delivered";
    pub const DELIVERY_FAILED: &str = "message.delivery_failed";
}

/// WS-ReliableMessaging protocol constants
pub mod rm {
    pub const NAMESPACE_1_0: &str = "http://schemas.xmlsoap.org/ws/2005/02/rm";
    pub const NAMESPACE_1_1: &str = "http://docs.oasis-open.org/ws-rx/wsrm/200702";

    pub const ACTION_CREATE_SEQUENCE: &str = "http://docs.oasis-open.org/ws-rx/wsrm/200702/CreateSequence";
    pub const ACTION_CREATE_SEQUENCE_RESPONSE: &str =
        "http://docs.oasis-open.org/ws-rx/wsrm/200702/CreateSequenceResponse";
    pub const ACTION_SEQUENCE_ACKNOWLEDGEMENT: &str =
        "http://docs.oasis-open.org/ws-rx/wsrm/200702/SequenceAcknowledgement";
    pub const ACTION_ACK_REQUESTED: &str = "http://docs.oasis-open.org/ws-rx/wsrm/200702/AckRequested";
    pub const ACTION_TERMINATE_SEQUENCE: &str =
        "http://docs.oasis-open.org/ws-rx/wsrm/200702/TerminateSequence";
    pub const ACTION_TERMINATE_SEQUENCE_RESPONSE: &str =
        "http://docs.oasis-open.org/ws-rx/wsrm/200702/TerminateSequenceResponse";

    /// Anonymous addressing URI used for back-channel replies
    pub const ANONYMOUS_URI: &str = "http://www.w3.org/2005/08/addressing/anonymous";
}
