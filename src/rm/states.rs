use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a reliable sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceState {
    /// Known locally, CreateSequence not yet sent
    #[default]
    Initial,
    /// CreateSequence sent, awaiting the response
    Creating,
    /// Sequence identifier agreed; application messages flow
    Established,
    /// No new messages; draining acknowledgements before TerminateSequence
    Terminating,
    Terminated,
}

impl SequenceState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Check if application messages may still be added
    pub fn accepts_new_messages(&self) -> bool {
        matches!(self, Self::Initial | Self::Creating | Self::Established)
    }

    /// Check if messages of this sequence are on the wire
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Established | Self::Terminating)
    }
}

impl fmt::Display for SequenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::Creating => write!(f, "creating"),
            Self::Established => write!(f, "established"),
            Self::Terminating => write!(f, "terminating"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

impl std::str::FromStr for SequenceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(Self::Initial),
            "creating" => Ok(Self::Creating),
            "established" => Ok(Self::Established),
            "terminating" => Ok(Self::Terminating),
            "terminated" => Ok(Self::Terminated),
            _ => Err(format!("Invalid sequence state: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(SequenceState::Terminated.is_terminal());
        assert!(!SequenceState::Terminating.is_terminal());
        assert!(SequenceState::Creating.accepts_new_messages());
        assert!(!SequenceState::Terminating.accepts_new_messages());
        assert!(SequenceState::Terminating.is_active());
    }

    #[test]
    fn test_state_string_conversion() {
        assert_eq!(SequenceState::Established.to_string(), "established");
        assert_eq!(
            "terminating".parse::<SequenceState>().unwrap(),
            SequenceState::Terminating
        );
        assert!("closed".parse::<SequenceState>().is_err());
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&SequenceState::Creating).unwrap();
        assert_eq!(json, "\"creating\"");
        let state: SequenceState = serde_json::from_str("\"terminated\"").unwrap();
        assert_eq!(state, SequenceState::Terminated);
    }
}
