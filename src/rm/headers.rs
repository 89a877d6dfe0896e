use crate::constants::rm::{
    ACTION_ACK_REQUESTED, ACTION_CREATE_SEQUENCE, ACTION_CREATE_SEQUENCE_RESPONSE,
    ACTION_SEQUENCE_ACKNOWLEDGEMENT, ACTION_TERMINATE_SEQUENCE,
    ACTION_TERMINATE_SEQUENCE_RESPONSE,
};
use crate::message::{EndpointReference, MessageContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inclusive range of acknowledged message numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AckRange {
    pub lower: u64,
    pub upper: u64,
}

impl AckRange {
    pub fn new(lower: u64, upper: u64) -> Self {
        Self { lower, upper }
    }

    pub fn single(number: u64) -> Self {
        Self::new(number, number)
    }

    pub fn contains(&self, number: u64) -> bool {
        self.lower <= number && number <= self.upper
    }
}

/// Reliable messaging protocol header carried by a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RmHeader {
    CreateSequence {
        /// Where acknowledgements for the new sequence are sent
        acks_to: Option<EndpointReference>,
    },
    CreateSequenceResponse {
        identifier: String,
    },
    /// Position of an application message within its sequence
    Sequence {
        identifier: String,
        message_number: u64,
        #[serde(default)]
        last_message: bool,
    },
    SequenceAcknowledgement {
        identifier: String,
        ranges: Vec<AckRange>,
        /// Numbers the destination reports missing
        #[serde(default)]
        nacks: Vec<u64>,
    },
    AckRequested {
        identifier: String,
    },
    TerminateSequence {
        identifier: String,
        last_message_number: Option<u64>,
    },
    TerminateSequenceResponse {
        identifier: String,
    },
}

impl RmHeader {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateSequence { .. } => "CreateSequence",
            Self::CreateSequenceResponse { .. } => "CreateSequenceResponse",
            Self::Sequence { .. } => "Sequence",
            Self::SequenceAcknowledgement { .. } => "SequenceAcknowledgement",
            Self::AckRequested { .. } => "AckRequested",
            Self::TerminateSequence { .. } => "TerminateSequence",
            Self::TerminateSequenceResponse { .. } => "TerminateSequenceResponse",
        }
    }

    /// WS-Addressing action of a protocol message; application messages keep
    /// their own action
    pub fn action(&self) -> Option<&'static str> {
        match self {
            Self::CreateSequence { .. } => Some(ACTION_CREATE_SEQUENCE),
            Self::CreateSequenceResponse { .. } => Some(ACTION_CREATE_SEQUENCE_RESPONSE),
            Self::Sequence { .. } => None,
            Self::SequenceAcknowledgement { .. } => Some(ACTION_SEQUENCE_ACKNOWLEDGEMENT),
            Self::AckRequested { .. } => Some(ACTION_ACK_REQUESTED),
            Self::TerminateSequence { .. } => Some(ACTION_TERMINATE_SEQUENCE),
            Self::TerminateSequenceResponse { .. } => Some(ACTION_TERMINATE_SEQUENCE_RESPONSE),
        }
    }

    /// Sequence identifier, absent only on CreateSequence
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Self::CreateSequence { .. } => None,
            Self::CreateSequenceResponse { identifier }
            | Self::Sequence { identifier, .. }
            | Self::SequenceAcknowledgement { identifier, .. }
            | Self::AckRequested { identifier }
            | Self::TerminateSequence { identifier, .. }
            | Self::TerminateSequenceResponse { identifier } => Some(identifier),
        }
    }

    /// Standalone protocol message carrying this header
    pub fn into_message(self, to: Option<EndpointReference>) -> MessageContext {
        let mut ctx = MessageContext::new(Value::Null);
        ctx.action = self.action().map(str::to_string);
        ctx.to = to;
        ctx.rm_header = Some(self);
        ctx
    }

    /// Responses travelling back to the RM source
    pub fn is_source_bound(&self) -> bool {
        matches!(
            self,
            Self::CreateSequenceResponse { .. }
                | Self::SequenceAcknowledgement { .. }
                | Self::TerminateSequenceResponse { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_header_serde_is_tagged() {
        let header = RmHeader::Sequence {
            identifier: "urn:uuid:s1".to_string(),
            message_number: 3,
            last_message: true,
        };
        let value = serde_json::to_value(&header).unwrap();
        assert_eq!(
            value,
            json!({"type": "Sequence", "identifier": "urn:uuid:s1", "message_number": 3, "last_message": true})
        );

        let ack: RmHeader = serde_json::from_value(json!({
            "type": "SequenceAcknowledgement",
            "identifier": "urn:uuid:s1",
            "ranges": [{"lower": 1, "upper": 2}]
        }))
        .unwrap();
        assert_eq!(ack.identifier(), Some("urn:uuid:s1"));
        assert!(ack.is_source_bound());
    }

    #[test]
    fn test_actions() {
        assert_eq!(
            RmHeader::CreateSequence { acks_to: None }.action(),
            Some(ACTION_CREATE_SEQUENCE)
        );
        assert_eq!(
            RmHeader::Sequence {
                identifier: "s".to_string(),
                message_number: 1,
                last_message: false
            }
            .action(),
            None
        );
    }
}
