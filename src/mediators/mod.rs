//! # Mediators
//!
//! The processing units a message flows through. Every mediator kind is a
//! variant of [`Mediator`]; trees of mediators are built once at
//! configuration time (see [`factory::MediatorFactory`]) and then shared
//! read-only by every worker thread.
//!
//! ## Outcome contract
//!
//! `mediate` returns an [`Outcome`]:
//!
//! - `Continue` lets the enclosing list move on to the next child
//! - `Stop` ends propagation for this message (dropped, parked, or handed off)
//! - `Fault` carries a typed fault up to the closest fault handler
//!
//! A sequence with an error handler pushes it on the message's fault stack
//! before running its children; on `Fault` the handler sequence runs and the
//! original flow does not continue.

pub mod aggregate;
pub mod builtin;
pub mod errors;
pub mod expression;
pub mod factory;
pub mod filters;
pub mod reliable;
pub mod sequence;
pub mod split;
pub mod transform;

pub use aggregate::AggregateMediator;
pub use builtin::{DropMediator, LogCategory, LogLevel, LogMediator, SendMediator};
pub use errors::{BuildError, BuildResult, MediationError, MediationResult};
pub use expression::ValueSource;
pub use factory::MediatorFactory;
pub use filters::{FilterCondition, FilterMediator, InMediator, OutMediator, SwitchCase, SwitchMediator};
pub use reliable::{ReliableSequenceMediator, RmSpecVersion, SequenceGrouping};
pub use sequence::{SequenceMediator, SequenceReference};
pub use split::{scoped_property, CloneMediator, IterateMediator, Target, TargetSequence};
pub use transform::{
    EnrichAction, EnrichMediator, EnrichTarget, FaultMediator, HeaderAction,
    HeaderMediator, PropertyAction, PropertyMediator, PropertyScope,
};

use crate::constants::properties::{ERROR_CODE, ERROR_DETAIL, ERROR_MEDIATOR, ERROR_MESSAGE};
use crate::mediation::MediationEnv;
use crate::message::{FaultHandler, MessageContext};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Details of a fault raised inside the pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct FaultInfo {
    pub code: String,
    pub message: String,
    /// Kind of the mediator that raised the fault
    pub mediator: String,
    pub detail: Option<Value>,
}

impl FaultInfo {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        mediator: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            mediator: mediator.into(),
            detail: None,
        }
    }

    pub fn from_error(error: &MediationError, mediator: &str) -> Self {
        Self::new(error.code(), error.to_string(), mediator)
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Result of running one mediator against a message
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Continue,
    Stop,
    Fault(FaultInfo),
}

impl Outcome {
    /// Boolean view of the outcome: only `Continue` keeps the flow going
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault(_))
    }

    pub fn fault(error: MediationError, mediator: &str) -> Self {
        Self::Fault(FaultInfo::from_error(&error, mediator))
    }
}

impl From<bool> for Outcome {
    fn from(proceed: bool) -> Self {
        if proceed {
            Self::Continue
        } else {
            Self::Stop
        }
    }
}

/// A unit of processing in the mediation pipeline
#[derive(Debug, Clone)]
pub enum Mediator {
    Sequence(Arc<SequenceMediator>),
    SequenceRef(SequenceReference),
    In(InMediator),
    Out(OutMediator),
    Switch(SwitchMediator),
    Filter(FilterMediator),
    Header(HeaderMediator),
    Fault(FaultMediator),
    Enrich(EnrichMediator),
    Property(PropertyMediator),
    Log(LogMediator),
    Drop(DropMediator),
    Send(SendMediator),
    Aggregate(AggregateMediator),
    Iterate(IterateMediator),
    Clone(CloneMediator),
    ReliableSequence(ReliableSequenceMediator),
}

impl Mediator {
    pub fn mediate(&self, ctx: &mut MessageContext, env: &MediationEnv) -> Outcome {
        let outcome = match self {
            Self::Sequence(m) => m.mediate(ctx, env),
            Self::SequenceRef(m) => m.mediate(ctx, env),
            Self::In(m) => m.mediate(ctx, env),
            Self::Out(m) => m.mediate(ctx, env),
            Self::Switch(m) => m.mediate(ctx, env),
            Self::Filter(m) => m.mediate(ctx, env),
            Self::Header(m) => m.mediate(ctx),
            Self::Fault(m) => m.mediate(ctx),
            Self::Enrich(m) => m.mediate(ctx),
            Self::Property(m) => m.mediate(ctx),
            Self::Log(m) => m.mediate(ctx),
            Self::Drop(m) => m.mediate(ctx),
            Self::Send(m) => m.mediate(ctx, env),
            Self::Aggregate(m) => m.mediate(ctx, env),
            Self::Iterate(m) => m.mediate(ctx, env),
            Self::Clone(m) => m.mediate(ctx, env),
            Self::ReliableSequence(m) => m.mediate(ctx),
        };

        if let Outcome::Fault(info) = &outcome {
            debug!(
                message_id = %ctx.message_id(),
                mediator = self.kind(),
                code = %info.code,
                "Mediator raised fault"
            );
        }
        outcome
    }

    /// Factory tag of this mediator kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sequence(_) => "sequence",
            Self::SequenceRef(_) => "sequence",
            Self::In(_) => "in",
            Self::Out(_) => "out",
            Self::Switch(_) => "switch",
            Self::Filter(_) => "filter",
            Self::Header(_) => "header",
            Self::Fault(_) => "makefault",
            Self::Enrich(_) => "enrich",
            Self::Property(_) => "property",
            Self::Log(_) => "log",
            Self::Drop(_) => "drop",
            Self::Send(_) => "send",
            Self::Aggregate(_) => "aggregate",
            Self::Iterate(_) => "iterate",
            Self::Clone(_) => "clone",
            Self::ReliableSequence(_) => "RMSequence",
        }
    }

    /// Names of sequences this mediator (or any descendant) refers to
    pub fn collect_references(&self, out: &mut Vec<String>) {
        match self {
            Self::Sequence(seq) => seq.collect_references(out),
            Self::SequenceRef(reference) => out.push(reference.name().to_string()),
            Self::In(m) => collect_all(m.children(), out),
            Self::Out(m) => collect_all(m.children(), out),
            Self::Switch(m) => {
                for case in m.cases() {
                    collect_all(&case.mediators, out);
                }
                if let Some(default) = m.default_case() {
                    collect_all(default, out);
                }
            }
            Self::Filter(m) => {
                collect_all(m.then_branch(), out);
                collect_all(m.else_branch(), out);
            }
            Self::Aggregate(m) => m.on_complete().collect_references(out),
            Self::Iterate(m) => m.target().collect_references(out),
            Self::Clone(m) => {
                for target in m.targets() {
                    target.collect_references(out);
                }
            }
            Self::Header(_)
            | Self::Fault(_)
            | Self::Enrich(_)
            | Self::Property(_)
            | Self::Log(_)
            | Self::Drop(_)
            | Self::Send(_)
            | Self::ReliableSequence(_) => {}
        }
    }

    /// Release resources held by this mediator tree
    pub fn destroy(&self) {
        match self {
            Self::Sequence(seq) => seq.destroy(),
            Self::Aggregate(m) => m.destroy(),
            _ => {}
        }
    }
}

fn collect_all(children: &[Mediator], out: &mut Vec<String>) {
    for child in children {
        child.collect_references(out);
    }
}

/// Run children in order, stopping at the first non-`Continue` outcome
pub fn mediate_children(
    children: &[Mediator],
    ctx: &mut MessageContext,
    env: &MediationEnv,
) -> Outcome {
    for child in children {
        let outcome = child.mediate(ctx, env);
        if !outcome.is_continue() {
            return outcome;
        }
    }
    Outcome::Continue
}

/// Pop the active fault handler and run it for `fault`
///
/// The original flow never continues: the result is `Stop` unless the handler
/// itself faults, in which case the new fault travels to the next handler.
pub fn handle_fault(ctx: &mut MessageContext, env: &MediationEnv, fault: FaultInfo) -> Outcome {
    let Some(handler) = ctx.pop_fault_handler() else {
        warn!(
            message_id = %ctx.message_id(),
            code = %fault.code,
            "No fault handler active, fault propagates to caller"
        );
        return Outcome::Fault(fault);
    };

    let sequence = match &handler {
        FaultHandler::Inline(sequence) => Arc::clone(sequence),
        FaultHandler::Named(name) => match env.config().get_sequence(name) {
            Ok(sequence) => sequence,
            Err(e) => {
                error!(
                    message_id = %ctx.message_id(),
                    handler = %name,
                    error = %e,
                    "❌ Fault handler sequence could not be resolved, message dropped"
                );
                return Outcome::Stop;
            }
        },
    };

    ctx.set_property(ERROR_CODE, fault.code.clone());
    ctx.set_property(ERROR_MESSAGE, fault.message.clone());
    ctx.set_property(ERROR_MEDIATOR, fault.mediator.clone());
    if let Some(detail) = &fault.detail {
        ctx.set_property(ERROR_DETAIL, detail.clone());
    }

    debug!(
        message_id = %ctx.message_id(),
        handler = %handler.describe(),
        code = %fault.code,
        "Executing fault handler"
    );

    match sequence.mediate(ctx, env) {
        Outcome::Fault(next) => Outcome::Fault(next),
        _ => Outcome::Stop,
    }
}

/// Run `sequence` with `handler` as the outermost fault handler
///
/// Used wherever a message enters a sequence without an enclosing pipeline
/// (the engine entry point, aggregation timers, split targets).
pub fn run_with_fault_handler(
    sequence: &SequenceMediator,
    ctx: &mut MessageContext,
    env: &MediationEnv,
    handler: Option<FaultHandler>,
) -> Outcome {
    let pushed = handler.is_some();
    if let Some(handler) = handler {
        ctx.push_fault_handler(handler);
    }

    match sequence.mediate(ctx, env) {
        Outcome::Fault(fault) if pushed => handle_fault(ctx, env, fault),
        outcome => {
            if pushed {
                ctx.pop_fault_handler();
            }
            outcome
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_boolean_view() {
        assert!(Outcome::Continue.is_continue());
        assert!(!Outcome::Stop.is_continue());
        assert!(!Outcome::Fault(FaultInfo::new("X", "boom", "log")).is_continue());
        assert_eq!(Outcome::from(true), Outcome::Continue);
        assert_eq!(Outcome::from(false), Outcome::Stop);
    }

    #[test]
    fn test_fault_info_from_error_carries_code() {
        let info = FaultInfo::from_error(
            &MediationError::SequenceNotFound {
                name: "missing".to_string(),
            },
            "sequence",
        );
        assert_eq!(info.code, "SEQUENCE_NOT_FOUND");
        assert!(info.message.contains("missing"));
        assert_eq!(info.mediator, "sequence");
    }
}
