//! Fan-out mediators: iterate (split a payload array) and clone (copy the
//! message to several targets). Every produced message carries its position
//! `"index/total"` and the parent message id so an aggregator can rebuild
//! the group.

use super::errors::MediationError;
use super::sequence::SequenceMediator;
use super::{handle_fault, Outcome};
use crate::constants::properties::{AGGREGATE_CORRELATION, MESSAGE_SEQUENCE};
use crate::environment::Endpoint;
use crate::mediation::MediationEnv;
use crate::message::{EndpointReference, MessageContext};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Property name scoped to a splitter id (`name.id`), or the bare name
pub fn scoped_property(name: &str, id: Option<&str>) -> String {
    match id {
        Some(id) => format!("{name}.{id}"),
        None => name.to_string(),
    }
}

#[derive(Debug, Clone)]
pub enum TargetSequence {
    Inline(Arc<SequenceMediator>),
    Named(String),
}

/// Destination of a produced message: a sequence, an endpoint, or (with
/// neither) re-injection into mediation
#[derive(Debug, Clone, Default)]
pub struct Target {
    sequence: Option<TargetSequence>,
    endpoint: Option<Endpoint>,
    to: Option<EndpointReference>,
    action: Option<String>,
}

impl Target {
    pub fn sequence(sequence: SequenceMediator) -> Self {
        Self {
            sequence: Some(TargetSequence::Inline(Arc::new(sequence))),
            ..Self::default()
        }
    }

    pub fn sequence_ref(name: impl Into<String>) -> Self {
        Self {
            sequence: Some(TargetSequence::Named(name.into())),
            ..Self::default()
        }
    }

    pub fn endpoint(endpoint: Endpoint) -> Self {
        Self {
            endpoint: Some(endpoint),
            ..Self::default()
        }
    }

    pub fn with_to(mut self, to: impl Into<EndpointReference>) -> Self {
        self.to = Some(to.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn collect_references(&self, out: &mut Vec<String>) {
        match &self.sequence {
            Some(TargetSequence::Named(name)) => out.push(name.clone()),
            Some(TargetSequence::Inline(sequence)) => sequence.collect_references(out),
            None => {}
        }
    }

    pub fn mediate(&self, mut ctx: MessageContext, env: &MediationEnv) -> Outcome {
        if let Some(to) = &self.to {
            ctx.to = Some(to.clone());
        }
        if let Some(action) = &self.action {
            ctx.action = Some(action.clone());
        }

        if let Some(sequence) = &self.sequence {
            let sequence = match sequence {
                TargetSequence::Inline(sequence) => Arc::clone(sequence),
                TargetSequence::Named(name) => match env.config().get_sequence(name) {
                    Ok(sequence) => sequence,
                    Err(e) => return Outcome::fault(e, "target"),
                },
            };
            return match sequence.mediate(&mut ctx, env) {
                Outcome::Fault(fault) => handle_fault(&mut ctx, env, fault),
                outcome => outcome,
            };
        }

        if let Some(endpoint) = &self.endpoint {
            return match env.environment().send(Some(endpoint), ctx) {
                Ok(()) => Outcome::Continue,
                Err(e) => Outcome::fault(MediationError::SendFailed(e), "target"),
            };
        }

        match env.environment().inject_message(ctx) {
            Ok(()) => Outcome::Continue,
            Err(e) => Outcome::fault(MediationError::SendFailed(e), "target"),
        }
    }
}

fn stamp(ctx: &mut MessageContext, id: Option<&str>, parent_id: &str, index: usize, total: usize) {
    ctx.set_message_sequence_of(&scoped_property(MESSAGE_SEQUENCE, id), index, total);
    ctx.set_property(scoped_property(AGGREGATE_CORRELATION, id), parent_id);
    ctx.correlation_key = Some(parent_id.to_string());
}

fn report(outcome: &Outcome, parent_id: &str, index: usize, mediator: &str) {
    if let Outcome::Fault(fault) = outcome {
        warn!(
            parent_message_id = %parent_id,
            index = index,
            mediator = mediator,
            code = %fault.code,
            error = %fault.message,
            "⚠️ Split message faulted without a handler"
        );
    }
}

/// Splits an array in the payload into one message per element
#[derive(Debug, Clone)]
pub struct IterateMediator {
    id: Option<String>,
    expression: String,
    preserve_payload: bool,
    attach_path: Option<String>,
    continue_parent: bool,
    target: Target,
}

impl IterateMediator {
    pub fn new(expression: impl Into<String>, target: Target) -> Self {
        Self {
            id: None,
            expression: expression.into(),
            preserve_payload: false,
            attach_path: None,
            continue_parent: false,
            target,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Keep the full payload and replace the element at `attach_path`
    pub fn preserving_payload(mut self, attach_path: impl Into<String>) -> Self {
        self.preserve_payload = true;
        self.attach_path = Some(attach_path.into());
        self
    }

    pub fn continue_parent(mut self, continue_parent: bool) -> Self {
        self.continue_parent = continue_parent;
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn mediate(&self, ctx: &mut MessageContext, env: &MediationEnv) -> Outcome {
        let elements = match ctx.payload.pointer(&self.expression) {
            Some(Value::Array(items)) => items.clone(),
            _ => {
                return Outcome::fault(
                    MediationError::NothingToSplit {
                        expression: self.expression.clone(),
                    },
                    "iterate",
                )
            }
        };

        let total = elements.len();
        let parent_id = ctx.message_id().to_string();
        debug!(
            message_id = %parent_id,
            expression = %self.expression,
            total = total,
            "Splitting message"
        );

        for (index, element) in elements.into_iter().enumerate() {
            let mut child = ctx.clone_for_fanout();
            if self.preserve_payload {
                let path = self.attach_path.as_deref().unwrap_or(&self.expression);
                match child.payload.pointer_mut(path) {
                    Some(slot) => *slot = element,
                    None => child.payload = element,
                }
            } else {
                child.payload = element;
            }
            stamp(&mut child, self.id.as_deref(), &parent_id, index, total);

            let outcome = self.target.mediate(child, env);
            report(&outcome, &parent_id, index, "iterate");
        }

        Outcome::from(self.continue_parent)
    }
}

/// Copies the message to every target
#[derive(Debug, Clone)]
pub struct CloneMediator {
    id: Option<String>,
    continue_parent: bool,
    targets: Vec<Target>,
}

impl CloneMediator {
    pub fn new(targets: Vec<Target>) -> Self {
        Self {
            id: None,
            continue_parent: false,
            targets,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn continue_parent(mut self, continue_parent: bool) -> Self {
        self.continue_parent = continue_parent;
        self
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn mediate(&self, ctx: &mut MessageContext, env: &MediationEnv) -> Outcome {
        let total = self.targets.len();
        let parent_id = ctx.message_id().to_string();

        for (index, target) in self.targets.iter().enumerate() {
            let mut child = ctx.clone_for_fanout();
            stamp(&mut child, self.id.as_deref(), &parent_id, index, total);
            let outcome = target.mediate(child, env);
            report(&outcome, &parent_id, index, "clone");
        }

        Outcome::from(self.continue_parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mediation::testing::test_env;
    use crate::mediation::SynapseConfiguration;
    use serde_json::json;

    #[test]
    fn test_iterate_stamps_position_and_correlation() {
        let (env, sink) = test_env(SynapseConfiguration::new());
        let iterate = IterateMediator::new(
            "/orders",
            Target::endpoint(Endpoint::address("http://backend/Orders")),
        );
        let mut ctx = MessageContext::new(json!({"orders": [{"id": 1}, {"id": 2}, {"id": 3}]}));

        assert_eq!(iterate.mediate(&mut ctx, &env), Outcome::Stop);

        let sent = sink.drain_sent();
        assert_eq!(sent.len(), 3);
        for (index, message) in sent.iter().enumerate() {
            assert_eq!(message.message_sequence(), Some((index, 3)));
            assert_eq!(message.correlation_key.as_deref(), Some(ctx.message_id()));
            assert_eq!(message.payload, json!({"id": index + 1}));
        }
    }

    #[test]
    fn test_iterate_with_id_scopes_properties() {
        let (env, sink) = test_env(SynapseConfiguration::new());
        let iterate = IterateMediator::new("/items", Target::endpoint(Endpoint::address("http://b/S")))
            .with_id("split1")
            .continue_parent(true);
        let mut ctx = MessageContext::new(json!({"items": ["a"]}));

        assert!(iterate.mediate(&mut ctx, &env).is_continue());
        let sent = sink.drain_sent();
        assert_eq!(sent[0].message_sequence_of("aggregatorMessageSequence.split1"), Some((0, 1)));
        assert_eq!(sent[0].message_sequence(), None);
    }

    #[test]
    fn test_iterate_preserving_payload() {
        let (env, sink) = test_env(SynapseConfiguration::new());
        let iterate = IterateMediator::new("/batch/items", Target::endpoint(Endpoint::address("http://b/S")))
            .preserving_payload("/batch/items");
        let mut ctx = MessageContext::new(json!({"batch": {"id": 7, "items": [1, 2]}}));

        iterate.mediate(&mut ctx, &env);
        let sent = sink.drain_sent();
        assert_eq!(sent[1].payload, json!({"batch": {"id": 7, "items": 2}}));
    }

    #[test]
    fn test_iterate_without_array_faults() {
        let (env, _) = test_env(SynapseConfiguration::new());
        let iterate = IterateMediator::new("/missing", Target::default());
        let mut ctx = MessageContext::new(json!({}));
        assert!(iterate.mediate(&mut ctx, &env).is_fault());
    }

    #[test]
    fn test_clone_fans_out_to_every_target() {
        let (env, sink) = test_env(SynapseConfiguration::new());
        let clone = CloneMediator::new(vec![
            Target::endpoint(Endpoint::address("http://a/Svc")),
            Target::endpoint(Endpoint::address("http://b/Svc")),
        ]);
        let mut ctx = MessageContext::new(json!({"x": 1}));

        assert_eq!(clone.mediate(&mut ctx, &env), Outcome::Stop);
        let sent = sink.drain_sent();
        assert_eq!(sent.len(), 2);
        assert_ne!(sent[0].message_id(), sent[1].message_id());
        assert_eq!(sent[1].message_sequence(), Some((1, 2)));
    }
}
