//! # Mediation
//!
//! Wiring around the mediator pipeline: the shared [`SynapseConfiguration`]
//! holding named sequences, the [`MediationEnv`] handle every mediator
//! receives, the [`MediationEngine`] entry point and the [`Dispatcher`]
//! running independent messages on a bounded worker pool.
//!
//! ## Usage
//!
//! ```rust
//! use synapse_core::environment::InMemoryEnvironment;
//! use synapse_core::mediation::{ConfigurationBuilder, MediationEngine, MediationEnv};
//! use synapse_core::mediators::MediatorFactory;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let document = json!({
//!     "sequences": [
//!         { "name": "main", "mediators": [ { "type": "send", "endpoint": "http://backend/Quote" } ] }
//!     ]
//! });
//! let config = ConfigurationBuilder::from_json(&document, &MediatorFactory::new()).unwrap();
//! let environment = Arc::new(InMemoryEnvironment::default());
//! let engine = MediationEngine::new(MediationEnv::new(Arc::new(config), environment.clone()));
//!
//! let mut ctx = engine.create_message_context();
//! ctx.payload = json!({"symbol": "IBM"});
//! assert!(engine.mediate(&mut ctx).is_continue());
//! assert_eq!(environment.sent_count(), 1);
//! ```

pub mod builder;
pub mod configuration;
pub mod dispatcher;
pub mod engine;

pub use builder::ConfigurationBuilder;
pub use configuration::SynapseConfiguration;
pub use dispatcher::{Dispatcher, DispatcherStats};
pub use engine::MediationEngine;

use crate::environment::SynapseEnvironment;
use std::fmt;
use std::sync::Arc;

/// Handles a mediator needs while processing a message
#[derive(Clone)]
pub struct MediationEnv {
    config: Arc<SynapseConfiguration>,
    environment: Arc<dyn SynapseEnvironment>,
}

impl MediationEnv {
    pub fn new(config: Arc<SynapseConfiguration>, environment: Arc<dyn SynapseEnvironment>) -> Self {
        Self {
            config,
            environment,
        }
    }

    pub fn config(&self) -> &Arc<SynapseConfiguration> {
        &self.config
    }

    pub fn environment(&self) -> &Arc<dyn SynapseEnvironment> {
        &self.environment
    }
}

impl fmt::Debug for MediationEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediationEnv")
            .field("sequences", &self.config.sequence_names())
            .field("environment", &self.environment)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::environment::InMemoryEnvironment;

    /// Environment recording sends, over `config`
    pub fn test_env(config: SynapseConfiguration) -> (MediationEnv, Arc<InMemoryEnvironment>) {
        let environment = Arc::new(InMemoryEnvironment::new(config.global_properties().clone()));
        let env = MediationEnv::new(Arc::new(config), environment.clone());
        (env, environment)
    }
}
