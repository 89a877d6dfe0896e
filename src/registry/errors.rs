use thiserror::Error;

/// Errors raised by registry backends and the registry cache
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("Registry resource '{key}' not found")]
    NotFound { key: String },

    #[error("Registry unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("No mapper registered for content type '{content_type}'")]
    NoMapper { content_type: String },

    #[error("Resource '{key}' could not be mapped: {reason}")]
    MappingFailed { key: String, reason: String },

    #[error("Registry circuit breaker '{component}' is open")]
    CircuitOpen { component: String },
}

impl RegistryError {
    /// Failures that say nothing about the health of the backend
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
