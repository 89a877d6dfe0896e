//! # Resilience Module
//!
//! Circuit breaker protecting calls into external collaborators (registry
//! fetches) so an unavailable backend fails fast instead of stalling every
//! mediation thread that needs a resource.
//!
//! ## Usage
//!
//! ```rust
//! use synapse_core::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let config = CircuitBreakerConfig {
//!     failure_threshold: 5,
//!     timeout: Duration::from_secs(30),
//!     success_threshold: 2,
//! };
//!
//! let breaker = CircuitBreaker::new("registry".to_string(), config);
//! let result = breaker.call(|| Ok::<_, String>("resource"));
//! assert!(result.is_ok());
//! ```

pub mod circuit_breaker;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerMetrics,
    CircuitState,
};
