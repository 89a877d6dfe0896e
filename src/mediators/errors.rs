use crate::environment::EnvironmentError;
use crate::registry::RegistryError;
use thiserror::Error;

/// Errors raised while a mediator processes a message
///
/// These never escape the pipeline as errors: they are converted into
/// [`super::Outcome::Fault`] and routed to the active fault handler.
#[derive(Debug, Error)]
pub enum MediationError {
    #[error("Sequence '{name}' not found in configuration")]
    SequenceNotFound { name: String },

    #[error("Sequence '{name}' resolved to a de-initialized instance")]
    StaleSequence { name: String },

    #[error("Expression '{expression}' could not be evaluated: {reason}")]
    ExpressionFailed { expression: String, reason: String },

    #[error("Resource '{key}' is unavailable")]
    ResourceUnavailable { key: String },

    #[error("Enrich target '{target}' is not applicable: {reason}")]
    InvalidEnrichTarget { target: String, reason: String },

    #[error("Nothing to split at '{expression}'")]
    NothingToSplit { expression: String },

    #[error("Send failed: {0}")]
    SendFailed(#[from] EnvironmentError),

    #[error("Registry lookup failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("{message}")]
    Custom { code: String, message: String },
}

impl MediationError {
    /// Stable error code exposed to fault handlers through `ERROR_CODE`
    pub fn code(&self) -> &str {
        match self {
            Self::SequenceNotFound { .. } => "SEQUENCE_NOT_FOUND",
            Self::StaleSequence { .. } => "STALE_SEQUENCE",
            Self::ExpressionFailed { .. } => "EXPRESSION_FAILED",
            Self::ResourceUnavailable { .. } => "RESOURCE_UNAVAILABLE",
            Self::InvalidEnrichTarget { .. } => "INVALID_ENRICH_TARGET",
            Self::NothingToSplit { .. } => "NOTHING_TO_SPLIT",
            Self::SendFailed(_) => "SEND_FAILED",
            Self::Registry(_) => "REGISTRY_ERROR",
            Self::Custom { code, .. } => code,
        }
    }
}

/// Errors raised while building mediators from definitions
///
/// These are configuration errors: fatal at wiring time and reported as a
/// construction failure.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Unknown mediator type '{tag}'")]
    UnknownMediator { tag: String },

    #[error("Mediator '{mediator}' is missing mandatory attribute '{attribute}'")]
    MissingAttribute { mediator: String, attribute: String },

    #[error("Mediator '{mediator}' has invalid attribute '{attribute}': {reason}")]
    InvalidAttribute {
        mediator: String,
        attribute: String,
        reason: String,
    },

    #[error("Sequence '{referenced_by}' references undefined sequence '{name}'")]
    DanglingReference { name: String, referenced_by: String },

    #[error("Duplicate definition for '{name}'")]
    DuplicateDefinition { name: String },

    #[error("Definition is malformed: {0}")]
    Malformed(String),
}

impl BuildError {
    pub fn missing(mediator: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::MissingAttribute {
            mediator: mediator.into(),
            attribute: attribute.into(),
        }
    }

    pub fn invalid(
        mediator: impl Into<String>,
        attribute: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidAttribute {
            mediator: mediator.into(),
            attribute: attribute.into(),
            reason: reason.into(),
        }
    }
}

pub type MediationResult<T> = Result<T, MediationError>;
pub type BuildResult<T> = Result<T, BuildError>;
