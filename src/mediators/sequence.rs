//! Sequences: ordered lists of mediators, named or anonymous, and references
//! to named sequences resolved at call time.

use super::errors::{MediationError, MediationResult};
use super::{handle_fault, mediate_children, Mediator, Outcome};
use crate::mediation::MediationEnv;
use crate::message::{FaultHandler, MessageContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Ordered list of mediators with an optional error handler
///
/// Named sequences live in the configuration (statically or through the
/// registry). A sequence loaded from the registry is de-initialized when a
/// newer version replaces it; references holding the old instance detect
/// this through [`SequenceMediator::is_initialized`] and re-resolve.
#[derive(Debug)]
pub struct SequenceMediator {
    name: Option<String>,
    children: Vec<Mediator>,
    on_error: Option<FaultHandler>,
    registry_key: Option<String>,
    initialized: AtomicBool,
}

impl SequenceMediator {
    pub fn named(name: impl Into<String>, children: Vec<Mediator>) -> Self {
        Self::build(Some(name.into()), children)
    }

    pub fn anonymous(children: Vec<Mediator>) -> Self {
        Self::build(None, children)
    }

    fn build(name: Option<String>, children: Vec<Mediator>) -> Self {
        Self {
            name,
            children,
            on_error: None,
            registry_key: None,
            initialized: AtomicBool::new(true),
        }
    }

    pub fn with_error_handler(mut self, handler: FaultHandler) -> Self {
        self.on_error = Some(handler);
        self
    }

    /// Mark this sequence as loaded from the registry under `key`
    pub fn with_registry_key(mut self, key: impl Into<String>) -> Self {
        self.registry_key = Some(key.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn children(&self) -> &[Mediator] {
        &self.children
    }

    pub fn on_error(&self) -> Option<&FaultHandler> {
        self.on_error.as_ref()
    }

    pub fn registry_key(&self) -> Option<&str> {
        self.registry_key.as_deref()
    }

    pub fn is_dynamic(&self) -> bool {
        self.registry_key.is_some()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// De-initialize this sequence and every mediator it owns
    pub fn destroy(&self) {
        if self.initialized.swap(false, Ordering::AcqRel) {
            info!(
                sequence = self.name.as_deref().unwrap_or("anonymous"),
                registry_key = ?self.registry_key,
                "🗑️ Sequence de-initialized"
            );
            for child in &self.children {
                child.destroy();
            }
        }
    }

    pub fn mediate(&self, ctx: &mut MessageContext, env: &MediationEnv) -> Outcome {
        debug!(
            message_id = %ctx.message_id(),
            sequence = self.name.as_deref().unwrap_or("anonymous"),
            children = self.children.len(),
            "Start : Sequence"
        );

        let pushed = match &self.on_error {
            Some(handler) => {
                ctx.push_fault_handler(handler.clone());
                true
            }
            None => false,
        };

        let outcome = match mediate_children(&self.children, ctx, env) {
            Outcome::Fault(fault) if pushed => handle_fault(ctx, env, fault),
            outcome => {
                if pushed {
                    ctx.pop_fault_handler();
                }
                outcome
            }
        };

        debug!(
            message_id = %ctx.message_id(),
            sequence = self.name.as_deref().unwrap_or("anonymous"),
            outcome = ?outcome,
            "End : Sequence"
        );
        outcome
    }

    pub fn collect_references(&self, out: &mut Vec<String>) {
        if let Some(FaultHandler::Named(name)) = &self.on_error {
            out.push(name.clone());
        }
        if let Some(FaultHandler::Inline(sequence)) = &self.on_error {
            sequence.collect_references(out);
        }
        for child in &self.children {
            child.collect_references(out);
        }
    }
}

/// Reference to a named sequence, resolved from the configuration on every call
#[derive(Debug, Clone)]
pub struct SequenceReference {
    name: String,
}

impl SequenceReference {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mediate(&self, ctx: &mut MessageContext, env: &MediationEnv) -> Outcome {
        match self.resolve(env) {
            Ok(sequence) => sequence.mediate(ctx, env),
            Err(e) => Outcome::fault(e, "sequence"),
        }
    }

    /// Resolve the target, re-resolving once if the instance was replaced
    pub fn resolve(&self, env: &MediationEnv) -> MediationResult<Arc<SequenceMediator>> {
        let sequence = env.config().get_sequence(&self.name)?;
        if sequence.is_initialized() {
            return Ok(sequence);
        }

        debug!(sequence = %self.name, "Resolved sequence is stale, re-resolving");
        let sequence = env.config().get_sequence(&self.name)?;
        if sequence.is_initialized() {
            Ok(sequence)
        } else {
            Err(MediationError::StaleSequence {
                name: self.name.clone(),
            })
        }
    }
}
