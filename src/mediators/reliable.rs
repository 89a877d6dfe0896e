use super::errors::MediationError;
use super::expression::ValueSource;
use super::Outcome;
use crate::constants::properties::{RM_ENABLED, RM_LAST_MESSAGE, RM_SEQUENCE_KEY, RM_SPEC_VERSION};
use crate::constants::rm::{NAMESPACE_1_0, NAMESPACE_1_1};
use crate::constants::SINGLE_SEQUENCE_KEY;
use crate::message::MessageContext;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// WS-ReliableMessaging protocol revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RmSpecVersion {
    #[serde(rename = "1.0")]
    #[default]
    V1_0,
    #[serde(rename = "1.1")]
    V1_1,
}

impl RmSpecVersion {
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::V1_0 => NAMESPACE_1_0,
            Self::V1_1 => NAMESPACE_1_1,
        }
    }
}

impl fmt::Display for RmSpecVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V1_0 => f.write_str("1.0"),
            Self::V1_1 => f.write_str("1.1"),
        }
    }
}

impl FromStr for RmSpecVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1.0" => Ok(Self::V1_0),
            "1.1" => Ok(Self::V1_1),
            other => Err(format!("Unsupported reliable messaging version: {other}")),
        }
    }
}

/// How outbound messages are grouped into reliable sequences
#[derive(Debug, Clone)]
pub enum SequenceGrouping {
    /// Every message travels in one shared sequence
    Single,
    /// Messages with the same correlation value share a sequence
    Correlation(ValueSource),
}

/// Marks a message for reliable delivery and assigns its sequence key
#[derive(Debug, Clone)]
pub struct ReliableSequenceMediator {
    grouping: SequenceGrouping,
    last_message: Option<ValueSource>,
    version: RmSpecVersion,
}

impl ReliableSequenceMediator {
    pub fn single() -> Self {
        Self {
            grouping: SequenceGrouping::Single,
            last_message: None,
            version: RmSpecVersion::default(),
        }
    }

    pub fn correlated(correlation: ValueSource) -> Self {
        Self {
            grouping: SequenceGrouping::Correlation(correlation),
            ..Self::single()
        }
    }

    pub fn with_last_message(mut self, last_message: ValueSource) -> Self {
        self.last_message = Some(last_message);
        self
    }

    pub fn with_version(mut self, version: RmSpecVersion) -> Self {
        self.version = version;
        self
    }

    pub fn version(&self) -> RmSpecVersion {
        self.version
    }

    pub fn mediate(&self, ctx: &mut MessageContext) -> Outcome {
        let sequence_key = match &self.grouping {
            SequenceGrouping::Single => SINGLE_SEQUENCE_KEY.to_string(),
            SequenceGrouping::Correlation(source) => match source.evaluate_string(ctx) {
                Some(key) => key,
                None => {
                    return Outcome::fault(
                        MediationError::ExpressionFailed {
                            expression: source.to_string(),
                            reason: "sequence correlation evaluated to nothing".to_string(),
                        },
                        "RMSequence",
                    )
                }
            },
        };

        let last = self
            .last_message
            .as_ref()
            .is_some_and(|source| source.evaluate_bool(ctx));

        ctx.set_property(RM_ENABLED, true);
        ctx.set_property(RM_SEQUENCE_KEY, sequence_key.clone());
        ctx.set_property(RM_SPEC_VERSION, self.version.to_string());
        if last {
            ctx.set_property(RM_LAST_MESSAGE, true);
        }

        debug!(
            message_id = %ctx.message_id(),
            sequence_key = %sequence_key,
            last_message = last,
            version = %self.version,
            "Message marked for reliable delivery"
        );
        Outcome::Continue
    }
}
