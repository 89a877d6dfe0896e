//! Transforming mediators: headers, fault construction, enrichment and
//! properties.

use super::errors::MediationError;
use super::expression::ValueSource;
use super::Outcome;
use crate::message::{EndpointReference, MessageContext};
use serde_json::{json, Value};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub enum HeaderAction {
    Set(ValueSource),
    Remove,
}

/// Sets or removes a header; addressing names map onto the context fields
#[derive(Debug, Clone)]
pub struct HeaderMediator {
    name: String,
    action: HeaderAction,
}

impl HeaderMediator {
    pub fn set(name: impl Into<String>, value: ValueSource) -> Self {
        Self {
            name: name.into(),
            action: HeaderAction::Set(value),
        }
    }

    pub fn remove(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: HeaderAction::Remove,
        }
    }

    pub fn mediate(&self, ctx: &mut MessageContext) -> Outcome {
        match &self.action {
            HeaderAction::Set(source) => {
                let Some(value) = source.evaluate(ctx) else {
                    return Outcome::fault(
                        MediationError::ExpressionFailed {
                            expression: source.to_string(),
                            reason: "header value evaluated to nothing".to_string(),
                        },
                        "header",
                    );
                };
                self.apply(ctx, Some(value));
            }
            HeaderAction::Remove => self.apply(ctx, None),
        }
        Outcome::Continue
    }

    fn apply(&self, ctx: &mut MessageContext, value: Option<Value>) {
        let text = value.as_ref().map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });

        match self.name.as_str() {
            "To" => ctx.to = text.map(EndpointReference::from),
            "From" => ctx.from = text.map(EndpointReference::from),
            "ReplyTo" => ctx.reply_to = text.map(EndpointReference::from),
            "FaultTo" => ctx.fault_to = text.map(EndpointReference::from),
            "Action" => ctx.action = text,
            "RelatesTo" => ctx.relates_to = text,
            "MessageID" => match text {
                Some(id) => ctx.set_message_id(id),
                None => warn!(message_id = %ctx.message_id(), "MessageID header cannot be removed"),
            },
            custom => match value {
                Some(value) => {
                    ctx.headers.insert(custom.to_string(), value);
                }
                None => {
                    ctx.headers.remove(custom);
                }
            },
        }
    }
}

/// Turns the current message into a fault response
///
/// The payload is replaced by a fault document and the message is addressed
/// back to the sender: `to` becomes `faultTo` (or `replyTo` when absent) and
/// `replyTo` becomes the original `to`.
#[derive(Debug, Clone)]
pub struct FaultMediator {
    code: String,
    reason: ValueSource,
    actor: Option<String>,
    detail: Option<ValueSource>,
}

impl Default for FaultMediator {
    fn default() -> Self {
        Self {
            code: "Server".to_string(),
            reason: ValueSource::literal("Fault"),
            actor: None,
            detail: None,
        }
    }
}

impl FaultMediator {
    pub fn new(code: impl Into<String>, reason: ValueSource) -> Self {
        Self {
            code: code.into(),
            reason,
            ..Self::default()
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_detail(mut self, detail: ValueSource) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn mediate(&self, ctx: &mut MessageContext) -> Outcome {
        let reason = self.reason.evaluate_string(ctx).unwrap_or_default();
        let detail = self
            .detail
            .as_ref()
            .and_then(|detail| detail.evaluate(ctx))
            .unwrap_or(Value::Null);

        ctx.payload = json!({
            "Fault": {
                "faultcode": self.code,
                "faultstring": reason,
                "faultactor": self.actor,
                "detail": detail,
            }
        });

        let original_to = ctx.to.take();
        ctx.to = ctx.fault_to.clone().or_else(|| ctx.reply_to.clone());
        ctx.reply_to = original_to;
        ctx.relates_to = Some(ctx.message_id().to_string());
        ctx.set_fault(true);
        ctx.set_response(true);

        debug!(
            message_id = %ctx.message_id(),
            code = %self.code,
            to = ?ctx.to,
            "Fault message created"
        );
        Outcome::Continue
    }
}

/// Where enriched content is written
#[derive(Debug, Clone, PartialEq)]
pub enum EnrichTarget {
    Body,
    Property(String),
    Pointer(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichAction {
    Replace,
    Child,
    Sibling,
}

/// Copies a value from one place of the message into another
#[derive(Debug, Clone)]
pub struct EnrichMediator {
    source: ValueSource,
    target: EnrichTarget,
    action: EnrichAction,
}

impl EnrichMediator {
    pub fn new(source: ValueSource, target: EnrichTarget, action: EnrichAction) -> Self {
        Self {
            source,
            target,
            action,
        }
    }

    pub fn mediate(&self, ctx: &mut MessageContext) -> Outcome {
        let Some(value) = self.source.evaluate(ctx) else {
            return Outcome::fault(
                MediationError::ExpressionFailed {
                    expression: self.source.to_string(),
                    reason: "enrich source evaluated to nothing".to_string(),
                },
                "enrich",
            );
        };

        match self.enrich(ctx, value) {
            Ok(()) => Outcome::Continue,
            Err(e) => Outcome::fault(e, "enrich"),
        }
    }

    fn enrich(&self, ctx: &mut MessageContext, value: Value) -> Result<(), MediationError> {
        match (&self.target, self.action) {
            (EnrichTarget::Body, EnrichAction::Replace) => {
                ctx.payload = value;
                Ok(())
            }
            (EnrichTarget::Body, EnrichAction::Child) => add_child(&mut ctx.payload, value, "$body"),
            (EnrichTarget::Body, EnrichAction::Sibling) => {
                let body = std::mem::take(&mut ctx.payload);
                ctx.payload = match body {
                    Value::Array(mut items) => {
                        items.push(value);
                        Value::Array(items)
                    }
                    other => Value::Array(vec![other, value]),
                };
                Ok(())
            }
            (EnrichTarget::Property(name), EnrichAction::Replace) => {
                ctx.set_property(name.clone(), value);
                Ok(())
            }
            (EnrichTarget::Property(name), EnrichAction::Child) => {
                let mut current = ctx
                    .get_property(name)
                    .map(|v| v.as_ref().clone())
                    .unwrap_or_else(|| Value::Array(Vec::new()));
                add_child(&mut current, value, name)?;
                ctx.set_property(name.clone(), current);
                Ok(())
            }
            (EnrichTarget::Property(name), EnrichAction::Sibling) => {
                Err(MediationError::InvalidEnrichTarget {
                    target: format!("$ctx:{name}"),
                    reason: "properties have no siblings".to_string(),
                })
            }
            (EnrichTarget::Pointer(pointer), EnrichAction::Replace) => {
                replace_at(&mut ctx.payload, pointer, value)
            }
            (EnrichTarget::Pointer(pointer), EnrichAction::Child) => {
                let target = ctx.payload.pointer_mut(pointer).ok_or_else(|| {
                    MediationError::InvalidEnrichTarget {
                        target: pointer.clone(),
                        reason: "target does not exist".to_string(),
                    }
                })?;
                add_child(target, value, pointer)
            }
            (EnrichTarget::Pointer(pointer), EnrichAction::Sibling) => {
                insert_sibling(&mut ctx.payload, pointer, value)
            }
        }
    }
}

fn invalid_target(target: &str, reason: &str) -> MediationError {
    MediationError::InvalidEnrichTarget {
        target: target.to_string(),
        reason: reason.to_string(),
    }
}

fn add_child(target: &mut Value, value: Value, name: &str) -> Result<(), MediationError> {
    match target {
        Value::Array(items) => {
            items.push(value);
            Ok(())
        }
        Value::Object(map) => match value {
            Value::Object(children) => {
                map.extend(children);
                Ok(())
            }
            _ => Err(invalid_target(name, "only objects can be added to an object")),
        },
        Value::Null => {
            *target = Value::Array(vec![value]);
            Ok(())
        }
        _ => Err(invalid_target(name, "target is not a container")),
    }
}

/// Split a JSON pointer into its parent pointer and unescaped last token
fn split_pointer(pointer: &str) -> Option<(&str, String)> {
    let (parent, last) = pointer.rsplit_once('/')?;
    Some((parent, last.replace("~1", "/").replace("~0", "~")))
}

fn replace_at(root: &mut Value, pointer: &str, value: Value) -> Result<(), MediationError> {
    if let Some(existing) = root.pointer_mut(pointer) {
        *existing = value;
        return Ok(());
    }

    let (parent, key) =
        split_pointer(pointer).ok_or_else(|| invalid_target(pointer, "not a JSON pointer"))?;
    match root.pointer_mut(parent) {
        Some(Value::Object(map)) => {
            map.insert(key, value);
            Ok(())
        }
        _ => Err(invalid_target(pointer, "parent does not exist or is not an object")),
    }
}

fn insert_sibling(root: &mut Value, pointer: &str, value: Value) -> Result<(), MediationError> {
    let (parent, key) =
        split_pointer(pointer).ok_or_else(|| invalid_target(pointer, "not a JSON pointer"))?;

    match root.pointer_mut(parent) {
        Some(Value::Array(items)) => {
            let index: usize = key
                .parse()
                .map_err(|_| invalid_target(pointer, "array index expected"))?;
            if index >= items.len() {
                return Err(invalid_target(pointer, "index out of bounds"));
            }
            items.insert(index + 1, value);
            Ok(())
        }
        Some(Value::Object(map)) => match value {
            Value::Object(siblings) => {
                map.extend(siblings);
                Ok(())
            }
            _ => Err(invalid_target(pointer, "only objects can be merged beside a field")),
        },
        _ => Err(invalid_target(pointer, "parent is not a container")),
    }
}

#[derive(Debug, Clone)]
pub enum PropertyAction {
    Set(ValueSource),
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PropertyScope {
    /// Local to the message
    #[default]
    Default,
    /// Configuration-level store shared by every message
    Global,
}

/// Sets or removes a property
#[derive(Debug, Clone)]
pub struct PropertyMediator {
    name: String,
    action: PropertyAction,
    scope: PropertyScope,
}

impl PropertyMediator {
    pub fn set(name: impl Into<String>, value: ValueSource) -> Self {
        Self {
            name: name.into(),
            action: PropertyAction::Set(value),
            scope: PropertyScope::Default,
        }
    }

    pub fn remove(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: PropertyAction::Remove,
            scope: PropertyScope::Default,
        }
    }

    pub fn with_scope(mut self, scope: PropertyScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn mediate(&self, ctx: &mut MessageContext) -> Outcome {
        let value = match &self.action {
            PropertyAction::Set(source) => source.evaluate(ctx),
            PropertyAction::Remove => None,
        };

        match self.scope {
            PropertyScope::Default => match value {
                Some(value) => ctx.set_property(self.name.clone(), value),
                None => {
                    ctx.remove_property(&self.name);
                }
            },
            PropertyScope::Global => match ctx.global_properties() {
                Some(global) => match value {
                    Some(value) => global.set(self.name.clone(), value),
                    None => {
                        global.remove(&self.name);
                    }
                },
                None => {
                    warn!(
                        message_id = %ctx.message_id(),
                        property = %self.name,
                        "No global property store attached, property ignored"
                    );
                }
            },
        }
        Outcome::Continue
    }
}
