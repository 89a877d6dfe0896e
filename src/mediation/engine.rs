use super::MediationEnv;
use crate::logging::{log_error, log_mediation_operation};
use crate::mediators::{run_with_fault_handler, Outcome};
use crate::message::{FaultHandler, MessageContext};
use tracing::debug;

/// Entry point running a message through the configured main sequence
///
/// The configuration's fault sequence, when defined, is pushed as the
/// outermost fault handler before `main` starts.
#[derive(Debug, Clone)]
pub struct MediationEngine {
    env: MediationEnv,
}

impl MediationEngine {
    pub fn new(env: MediationEnv) -> Self {
        Self { env }
    }

    pub fn env(&self) -> &MediationEnv {
        &self.env
    }

    /// Empty context wired to the configuration's shared properties
    pub fn create_message_context(&self) -> MessageContext {
        self.env.environment().create_message_context()
    }

    pub fn mediate(&self, ctx: &mut MessageContext) -> Outcome {
        let config = self.env.config();
        let main = match config.main_sequence() {
            Ok(main) => main,
            Err(e) => {
                log_error(
                    "MediationEngine",
                    "mediate",
                    &e.to_string(),
                    Some(ctx.message_id()),
                );
                return Outcome::fault(e, "engine");
            }
        };

        let handler = config
            .has_fault_sequence()
            .then(|| FaultHandler::Named(config.fault_sequence_name().to_string()));

        debug!(
            message_id = %ctx.message_id(),
            sequence = %config.main_sequence_name(),
            response = ctx.is_response(),
            "Mediating message"
        );
        let outcome = run_with_fault_handler(&main, ctx, &self.env, handler);

        let status = match &outcome {
            Outcome::Continue => "continued",
            Outcome::Stop => "stopped",
            Outcome::Fault(_) => "faulted",
        };
        log_mediation_operation(
            "mediate",
            ctx.message_id(),
            Some(config.main_sequence_name()),
            None,
            status,
            match &outcome {
                Outcome::Fault(fault) => Some(fault.message.as_str()),
                _ => None,
            },
        );
        outcome
    }
}
