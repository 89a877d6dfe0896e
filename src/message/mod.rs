//! # Message Context
//!
//! The unit of data flowing through the mediation pipeline: a structured
//! payload, a two-level property bag and WS-Addressing style routing
//! metadata.

pub mod addressing;
pub mod context;
pub mod properties;

pub use addressing::EndpointReference;
pub use context::{FaultHandler, MessageContext};
pub use properties::GlobalProperties;
