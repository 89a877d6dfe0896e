//! Terminal and side-effect mediators: log, drop and send.

use super::expression::ValueSource;
use super::{MediationError, Outcome};
use crate::constants::properties::RM_ENABLED;
use crate::environment::Endpoint;
use crate::mediation::MediationEnv;
use crate::message::{EndpointReference, MessageContext};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

/// How much of the message the log mediator renders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Addressing fields only
    #[default]
    Simple,
    /// Addressing plus every header
    Headers,
    /// Addressing, headers and the payload
    Full,
    /// Configured properties only
    Custom,
}

/// Severity the rendered line is emitted at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct LogMediator {
    level: LogLevel,
    category: LogCategory,
    separator: String,
    properties: Vec<(String, ValueSource)>,
}

impl Default for LogMediator {
    fn default() -> Self {
        Self {
            level: LogLevel::Simple,
            category: LogCategory::Info,
            separator: ", ".to_string(),
            properties: Vec::new(),
        }
    }
}

impl LogMediator {
    pub fn new(level: LogLevel, category: LogCategory) -> Self {
        Self {
            level,
            category,
            ..Self::default()
        }
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: ValueSource) -> Self {
        self.properties.push((name.into(), value));
        self
    }

    pub fn mediate(&self, ctx: &mut MessageContext) -> Outcome {
        let line = self.render(ctx);
        let message_id = ctx.message_id();
        match self.category {
            LogCategory::Trace => trace!(message_id = %message_id, "{line}"),
            LogCategory::Debug => debug!(message_id = %message_id, "{line}"),
            LogCategory::Info => info!(message_id = %message_id, "{line}"),
            LogCategory::Warn => warn!(message_id = %message_id, "{line}"),
            LogCategory::Error => error!(message_id = %message_id, "{line}"),
        }
        Outcome::Continue
    }

    /// Render the log line for `ctx`
    pub fn render(&self, ctx: &MessageContext) -> String {
        let mut parts: Vec<String> = Vec::new();

        if self.level != LogLevel::Custom {
            let address = |epr: &Option<EndpointReference>| {
                epr.as_ref().map(|e| e.to_string()).unwrap_or_default()
            };
            parts.push(format!("To: {}", address(&ctx.to)));
            parts.push(format!("From: {}", address(&ctx.from)));
            parts.push(format!("WSAction: {}", ctx.action.as_deref().unwrap_or("")));
            parts.push(format!("MessageID: {}", ctx.message_id()));
            parts.push(format!(
                "Direction: {}",
                if ctx.is_response() { "response" } else { "request" }
            ));
        }

        if matches!(self.level, LogLevel::Headers | LogLevel::Full) {
            for (name, value) in &ctx.headers {
                parts.push(format!("{name} : {value}"));
            }
        }

        if self.level == LogLevel::Full {
            parts.push(format!("Envelope: {}", ctx.payload));
        }

        for (name, source) in &self.properties {
            let value = source
                .evaluate_string(ctx)
                .unwrap_or_else(|| "null".to_string());
            parts.push(format!("{name} = {value}"));
        }

        parts.join(&self.separator)
    }
}

/// Ends propagation for the current message
#[derive(Debug, Clone, Default)]
pub struct DropMediator;

impl DropMediator {
    pub fn mediate(&self, ctx: &mut MessageContext) -> Outcome {
        debug!(message_id = %ctx.message_id(), "Message dropped");
        Outcome::Stop
    }
}

/// Hands a copy of the message to the environment for delivery
#[derive(Debug, Clone, Default)]
pub struct SendMediator {
    endpoint: Option<Endpoint>,
}

impl SendMediator {
    pub fn new(endpoint: Option<Endpoint>) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn mediate(&self, ctx: &mut MessageContext, env: &MediationEnv) -> Outcome {
        let mut outbound = ctx.clone();

        if let Some(endpoint) = &self.endpoint {
            if let Some(address) = &endpoint.address {
                outbound.to = Some(address.clone());
            }
            if endpoint.reliable {
                outbound.set_property(RM_ENABLED, true);
            }
        }

        debug!(
            message_id = %ctx.message_id(),
            to = ?outbound.to,
            endpoint = ?self.endpoint.as_ref().and_then(|e| e.name.as_deref()),
            "Sending message"
        );

        match env.environment().send(self.endpoint.as_ref(), outbound) {
            Ok(()) => Outcome::Continue,
            Err(e) => Outcome::fault(MediationError::SendFailed(e), "send"),
        }
    }
}
