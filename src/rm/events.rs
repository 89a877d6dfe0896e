use serde::{Deserialize, Serialize};

/// Events that can trigger sequence state transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SequenceEvent {
    /// CreateSequence sent for an outbound sequence
    CreateRequested,
    /// Sequence identifier agreed (response received, or request accepted)
    CreateAccepted,
    /// CreateSequence refused by the destination
    CreateRefused(String),
    /// Application message added to, or received on, the sequence
    ApplicationMessage,
    /// SequenceAcknowledgement processed
    Acknowledgement,
    /// Local request to stop the sequence once everything is acknowledged
    TerminateRequested,
    /// TerminateSequence exchange finished
    TerminateCompleted,
    /// Inactivity timeout elapsed
    Timeout,
    /// Unrecoverable failure
    Fail(String),
}

impl SequenceEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::CreateRequested => "create_requested",
            Self::CreateAccepted => "create_accepted",
            Self::CreateRefused(_) => "create_refused",
            Self::ApplicationMessage => "application_message",
            Self::Acknowledgement => "acknowledgement",
            Self::TerminateRequested => "terminate_requested",
            Self::TerminateCompleted => "terminate_completed",
            Self::Timeout => "timeout",
            Self::Fail(_) => "fail",
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::CreateRefused(reason) | Self::Fail(reason) => Some(reason),
            _ => None,
        }
    }

    /// Check if this event always ends the sequence
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::CreateRefused(_) | Self::TerminateCompleted | Self::Timeout | Self::Fail(_)
        )
    }
}
