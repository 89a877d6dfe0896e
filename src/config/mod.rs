//! # Synapse Configuration System
//!
//! Runtime settings for the mediation engine, the aggregate tracker, the
//! reliable messaging core and the registry cache.
//!
//! ## Architecture
//!
//! - **Layered Sources**: optional settings file, then `SYNAPSE__*` environment overrides
//! - **Environment Awareness**: `SYNAPSE_ENV` selects development/test/production
//! - **Explicit Validation**: invalid values fail loading instead of being clamped
//!
//! Mediation artifacts (sequences, local entries) are not settings; they live
//! in [`crate::mediation::SynapseConfiguration`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use synapse_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let policy = manager.config().reliable_messaging.to_policy();
//! println!("max retries: {}", policy.max_retries);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::rm::policy::{BackoffStrategy, RmPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root settings structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SynapseConfig {
    /// Mediation pipeline settings
    pub mediation: MediationConfig,

    /// Aggregate tracker settings
    pub aggregation: AggregationConfig,

    /// WS-ReliableMessaging settings
    pub reliable_messaging: ReliableMessagingConfig,

    /// Dynamic registry cache settings
    pub registry: RegistryConfig,

    /// Circuit breaker protecting registry fetches
    pub circuit_breaker: CircuitBreakerSettings,
}

/// Mediation pipeline settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MediationConfig {
    /// Upper bound on messages mediated concurrently by the dispatcher
    pub worker_pool_size: usize,
    /// Name of the sequence receiving injected messages
    pub main_sequence: String,
    /// Name of the default fault handler sequence
    pub fault_sequence: String,
}

impl Default for MediationConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 16,
            main_sequence: crate::constants::sequences::MAIN.to_string(),
            fault_sequence: crate::constants::sequences::FAULT.to_string(),
        }
    }
}

/// Aggregate tracker settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Timeout applied when an aggregate mediator declares none (0 = no deadline)
    pub default_timeout_ms: u64,
    /// Interval of the background sweep completing expired aggregates
    pub sweep_interval_ms: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 0,
            sweep_interval_ms: 1000,
        }
    }
}

impl AggregationConfig {
    pub fn default_timeout(&self) -> Option<Duration> {
        (self.default_timeout_ms > 0).then(|| Duration::from_millis(self.default_timeout_ms))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// WS-ReliableMessaging settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReliableMessagingConfig {
    /// Base delay before an unacknowledged message is resent
    pub retransmission_interval_ms: u64,
    /// Double the delay on each attempt instead of using a fixed interval
    pub exponential_backoff: bool,
    /// Cap on the backoff delay
    pub max_retransmission_interval_ms: u64,
    /// Resends attempted before the message is reported as undeliverable
    pub max_retries: u32,
    /// Idle time after which a sequence is terminated
    pub inactivity_timeout_ms: u64,
    /// Time a terminated sequence stays in storage before it is purged
    pub termination_grace_ms: u64,
    /// Deadline for a single transport send
    pub send_timeout_ms: u64,
    /// Deliver inbound application messages in message number order
    pub in_order_delivery: bool,
    /// How far past the next deliverable number an in-order message may arrive
    pub out_of_order_window: u64,
    /// Interval of the inactivity/purge sweep
    pub reaper_interval_ms: u64,
    /// Services that refuse CreateSequence requests
    pub disabled_services: Vec<String>,
}

impl Default for ReliableMessagingConfig {
    fn default() -> Self {
        Self {
            retransmission_interval_ms: 6000,
            exponential_backoff: true,
            max_retransmission_interval_ms: 60_000,
            max_retries: 8,
            inactivity_timeout_ms: 600_000,
            termination_grace_ms: 60_000,
            send_timeout_ms: 30_000,
            in_order_delivery: false,
            out_of_order_window: 1024,
            reaper_interval_ms: 10_000,
            disabled_services: Vec::new(),
        }
    }
}

impl ReliableMessagingConfig {
    /// Convert the settings into the runtime policy used by the RM core
    pub fn to_policy(&self) -> RmPolicy {
        RmPolicy {
            retransmission_interval: Duration::from_millis(self.retransmission_interval_ms),
            backoff: if self.exponential_backoff {
                BackoffStrategy::Exponential
            } else {
                BackoffStrategy::Fixed
            },
            max_retransmission_interval: Duration::from_millis(self.max_retransmission_interval_ms),
            max_retries: self.max_retries,
            inactivity_timeout: Duration::from_millis(self.inactivity_timeout_ms),
            termination_grace: Duration::from_millis(self.termination_grace_ms),
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            in_order_delivery: self.in_order_delivery,
            out_of_order_window: self.out_of_order_window,
            disabled_services: self.disabled_services.iter().cloned().collect(),
        }
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }
}

/// Dynamic registry cache settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Lease applied when a registry entry carries no cacheable duration hint
    pub default_cachable_duration_ms: i64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_cachable_duration_ms: 15_000,
        }
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub enabled: bool,
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time the circuit stays open before probing
    pub timeout_seconds: u64,
    /// Successful trial calls that close the circuit again
    pub success_threshold: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            timeout_seconds: 30,
            success_threshold: 2,
        }
    }
}

impl SynapseConfig {
    /// Validate settings, returning the first violation found
    pub fn validate(&self) -> ConfigResult<()> {
        if self.mediation.worker_pool_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "mediation.worker_pool_size",
                self.mediation.worker_pool_size,
                "must be at least 1",
            ));
        }

        if self.mediation.main_sequence.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "main_sequence",
                "mediation",
            ));
        }

        if self.aggregation.sweep_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "aggregation.sweep_interval_ms",
                self.aggregation.sweep_interval_ms,
                "must be greater than zero",
            ));
        }

        let rm = &self.reliable_messaging;
        if rm.retransmission_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "reliable_messaging.retransmission_interval_ms",
                rm.retransmission_interval_ms,
                "must be greater than zero",
            ));
        }

        if rm.max_retransmission_interval_ms < rm.retransmission_interval_ms {
            return Err(ConfigurationError::invalid_value(
                "reliable_messaging.max_retransmission_interval_ms",
                rm.max_retransmission_interval_ms,
                "must not be lower than retransmission_interval_ms",
            ));
        }

        if rm.max_retries == 0 {
            return Err(ConfigurationError::invalid_value(
                "reliable_messaging.max_retries",
                rm.max_retries,
                "must allow at least one retransmission",
            ));
        }

        if rm.out_of_order_window == 0 {
            return Err(ConfigurationError::invalid_value(
                "reliable_messaging.out_of_order_window",
                rm.out_of_order_window,
                "must be greater than zero",
            ));
        }

        if rm.send_timeout_ms == 0 || rm.reaper_interval_ms == 0 {
            return Err(ConfigurationError::validation_error(
                "reliable_messaging send_timeout_ms and reaper_interval_ms must be greater than zero",
            ));
        }

        if self.circuit_breaker.enabled
            && (self.circuit_breaker.failure_threshold == 0
                || self.circuit_breaker.success_threshold == 0)
        {
            return Err(ConfigurationError::validation_error(
                "circuit_breaker thresholds must be greater than zero when enabled",
            ));
        }

        Ok(())
    }
}
