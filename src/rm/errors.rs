use super::transport::TransportError;
use thiserror::Error;

/// Reliable messaging protocol faults
///
/// These are reported to peers and callers as typed faults; `fault_code`
/// names the WS-ReliableMessaging fault subcode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RmFault {
    #[error("{reason}")]
    CreateSequenceRefused { reason: String },

    #[error("Unknown sequence '{identifier}'")]
    UnknownSequence { identifier: String },

    #[error("Sequence '{identifier}' is terminating")]
    SequenceTerminating { identifier: String },

    #[error("Sequence '{identifier}' has been terminated")]
    SequenceTerminated { identifier: String },

    #[error("Message number {number} exceeds last message number {last} of sequence '{identifier}'")]
    LastMessageNumberExceeded {
        identifier: String,
        number: u64,
        last: u64,
    },

    #[error("Message numbers of sequence '{identifier}' rolled over")]
    MessageNumberRollover { identifier: String },

    #[error("Message {number} of sequence '{identifier}' is more than {window} ahead of the next deliverable message")]
    OutOfOrderWindowExceeded {
        identifier: String,
        number: u64,
        window: u64,
    },

    #[error("Invalid acknowledgement for sequence '{identifier}': {reason}")]
    InvalidAcknowledgement { identifier: String, reason: String },

    #[error("Message {message_number} of sequence '{identifier}' undeliverable after {attempts} attempts")]
    DeliveryFailed {
        identifier: String,
        message_number: u64,
        attempts: u32,
    },

    #[error("Invalid sequence transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    #[error("{message}")]
    Internal { message: String },
}

impl RmFault {
    pub fn fault_code(&self) -> &'static str {
        match self {
            Self::CreateSequenceRefused { .. } => "CreateSequenceRefused",
            Self::UnknownSequence { .. } => "UnknownSequence",
            Self::SequenceTerminating { .. } => "SequenceClosed",
            Self::SequenceTerminated { .. } => "SequenceTerminated",
            Self::LastMessageNumberExceeded { .. } => "LastMessageNumberExceeded",
            Self::MessageNumberRollover { .. } => "MessageNumberRollover",
            Self::OutOfOrderWindowExceeded { .. } => "MessageNumberOutOfWindow",
            Self::InvalidAcknowledgement { .. } => "InvalidAcknowledgement",
            Self::DeliveryFailed { .. } => "DeliveryFailed",
            Self::InvalidTransition { .. } | Self::Internal { .. } => "Internal",
        }
    }

    pub fn unknown(identifier: impl Into<String>) -> Self {
        Self::UnknownSequence {
            identifier: identifier.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Errors raised by sequence storage
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("Transaction on '{key}' is no longer active")]
    TransactionInactive { key: String },

    #[error("Sequence record '{key}' already exists")]
    AlreadyExists { key: String },

    #[error("Sequence record '{key}' not found")]
    RecordNotFound { key: String },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Anything that can abort processing of one reliable message
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Fault(#[from] RmFault),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type RmResult<T> = Result<T, RmFault>;
pub type StorageResult<T> = Result<T, StorageError>;
pub type ProcessingResult<T> = Result<T, ProcessingError>;
