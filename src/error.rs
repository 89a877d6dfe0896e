//! Error types for the Synapse core.
//!

use crate::config::ConfigurationError;
use crate::environment::EnvironmentError;
use crate::mediators::errors::{BuildError, MediationError};
use crate::registry::RegistryError;
use crate::rm::errors::{RmFault, StorageError};
use crate::rm::transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SynapseError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Mediator build error: {0}")]
    Build(#[from] BuildError),
    #[error("Mediation error: {0}")]
    Mediation(#[from] MediationError),
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("Reliable messaging fault: {0}")]
    ReliableMessaging(#[from] RmFault),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Environment error: {0}")]
    Environment(#[from] EnvironmentError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type SynapseResult<T> = anyhow::Result<T, SynapseError>;
