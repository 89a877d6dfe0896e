#![allow(clippy::doc_markdown)] // Allow technical terms like WS-ReliableMessaging in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Synapse Core
//!
//! Message mediation engine and WS-ReliableMessaging core for a service bus.
//!
//! ## Overview
//!
//! Messages flow through named sequences of mediators that filter, transform,
//! split, aggregate and route them. Sequences can be defined statically or
//! loaded from a registry and cached with version-aware revalidation. Sends
//! marked for reliable delivery go through a WS-ReliableMessaging source that
//! numbers, stores, retransmits and acknowledges messages per sequence.
//!
//! ## Module Organization
//!
//! - [`message`] - Message context, properties and addressing
//! - [`mediators`] - Mediator variants, sequences, fault handling and the factory
//! - [`mediation`] - Configuration, builder, engine and concurrent dispatcher
//! - [`aggregation`] - Correlated aggregate tracking with completion conditions
//! - [`registry`] - Dynamic registry resources and the expiry cache
//! - [`rm`] - Reliable messaging state machine, storage, sender and receiver
//! - [`resilience`] - Circuit breaker around registry I/O
//! - [`config`] - Runtime settings
//! - [`environment`] - Services the engine consumes from its host
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup and helpers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use synapse_core::environment::InMemoryEnvironment;
//! use synapse_core::mediation::{ConfigurationBuilder, MediationEngine, MediationEnv};
//! use synapse_core::mediators::MediatorFactory;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let document = json!({
//!     "sequences": [
//!         { "name": "main", "mediators": [{ "type": "log", "level": "simple" }, { "type": "drop" }] }
//!     ]
//! });
//! let config = ConfigurationBuilder::from_json(&document, &MediatorFactory::new())?;
//! let environment = Arc::new(InMemoryEnvironment::default());
//! let engine = MediationEngine::new(MediationEnv::new(Arc::new(config), environment));
//!
//! let mut ctx = engine.create_message_context();
//! ctx.payload = json!({ "order": 42 });
//! let outcome = engine.mediate(&mut ctx);
//! println!("continued: {}", outcome.is_continue());
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```

pub mod aggregation;
pub mod config;
pub mod constants;
pub mod environment;
pub mod error;
pub mod logging;
pub mod mediation;
pub mod mediators;
pub mod message;
pub mod registry;
pub mod resilience;
pub mod rm;

pub use config::{ConfigManager, SynapseConfig};
pub use environment::{Endpoint, InMemoryEnvironment, SynapseEnvironment};
pub use error::{SynapseError, SynapseResult};
pub use mediation::{
    ConfigurationBuilder, Dispatcher, MediationEngine, MediationEnv, SynapseConfiguration,
};
pub use mediators::{Mediator, MediatorFactory, Outcome, SequenceMediator};
pub use message::{EndpointReference, MessageContext};
pub use registry::{InMemoryRegistry, RegistryCache};
pub use rm::{ReliableSender, RmMessageReceiver, RmPolicy};
