//! # Mediator Factory
//!
//! Builds mediator trees from JSON definitions through a table of
//! constructors keyed by tag. Every definition is an object whose `type`
//! names the tag; the remaining keys are the mediator's attributes:
//!
//! ```json
//! { "type": "switch", "source": "/symbol",
//!   "cases": [ { "regex": "IBM", "mediators": [ { "type": "drop" } ] } ],
//!   "default": { "mediators": [ { "type": "log", "level": "full" } ] } }
//! ```
//!
//! Unknown tags and missing mandatory attributes are [`BuildError`]s. New tags
//! can be added with [`MediatorFactory::register`].

use super::aggregate::AggregateMediator;
use super::builtin::{DropMediator, LogCategory, LogLevel, LogMediator, SendMediator};
use super::errors::{BuildError, BuildResult};
use super::expression::ValueSource;
use super::filters::{FilterCondition, FilterMediator, InMediator, OutMediator, SwitchCase, SwitchMediator};
use super::reliable::{ReliableSequenceMediator, RmSpecVersion};
use super::sequence::{SequenceMediator, SequenceReference};
use super::split::{CloneMediator, IterateMediator, Target, TargetSequence};
use super::transform::{
    EnrichAction, EnrichMediator, EnrichTarget, FaultMediator, HeaderMediator, PropertyMediator,
    PropertyScope,
};
use super::Mediator;
use crate::aggregation::CompletionCondition;
use crate::environment::Endpoint;
use crate::message::FaultHandler;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

type Attributes = Map<String, Value>;

/// Builds one mediator from its attributes
pub type MediatorConstructor = fn(&MediatorFactory, &Attributes) -> BuildResult<Mediator>;

/// Tag to constructor table
#[derive(Debug, Clone)]
pub struct MediatorFactory {
    constructors: HashMap<String, MediatorConstructor>,
}

impl Default for MediatorFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MediatorFactory {
    /// Factory with every built-in mediator registered
    pub fn new() -> Self {
        let mut factory = Self {
            constructors: HashMap::new(),
        };
        factory.register("sequence", build_sequence_mediator);
        factory.register("in", build_in);
        factory.register("out", build_out);
        factory.register("switch", build_switch);
        factory.register("filter", build_filter);
        factory.register("header", build_header);
        factory.register("makefault", build_fault);
        factory.register("enrich", build_enrich);
        factory.register("property", build_property);
        factory.register("log", build_log);
        factory.register("drop", |_, _| Ok(Mediator::Drop(DropMediator)));
        factory.register("send", build_send);
        factory.register("aggregate", build_aggregate);
        factory.register("iterate", build_iterate);
        factory.register("clone", build_clone);
        factory.register("RMSequence", build_reliable_sequence);
        factory
    }

    /// Register (or replace) the constructor for `tag`
    pub fn register(
        &mut self,
        tag: impl Into<String>,
        constructor: MediatorConstructor,
    ) -> Option<MediatorConstructor> {
        self.constructors.insert(tag.into(), constructor)
    }

    pub fn is_registered(&self, tag: &str) -> bool {
        self.constructors.contains_key(tag)
    }

    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.constructors.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Build one mediator from a definition object
    pub fn build(&self, definition: &Value) -> BuildResult<Mediator> {
        let attributes = definition
            .as_object()
            .ok_or_else(|| BuildError::Malformed(format!("mediator definition must be an object: {definition}")))?;
        let tag = attributes
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| BuildError::missing("mediator", "type"))?;
        let constructor = self
            .constructors
            .get(tag)
            .ok_or_else(|| BuildError::UnknownMediator {
                tag: tag.to_string(),
            })?;
        constructor(self, attributes)
    }

    /// Build a list of mediators; an absent list is empty
    pub fn build_list(&self, definitions: Option<&Value>, context: &str) -> BuildResult<Vec<Mediator>> {
        match definitions {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items.iter().map(|item| self.build(item)).collect(),
            Some(_) => Err(BuildError::invalid(context, "mediators", "must be an array")),
        }
    }

    /// Build a top-level named sequence definition
    pub fn build_sequence(&self, definition: &Value) -> BuildResult<SequenceMediator> {
        let attributes = definition
            .as_object()
            .ok_or_else(|| BuildError::Malformed("sequence definition must be an object".to_string()))?;
        let name = required_str(attributes, "sequence", "name")?;
        self.sequence_body(Some(name.to_string()), attributes)
    }

    fn sequence_body(&self, name: Option<String>, attributes: &Attributes) -> BuildResult<SequenceMediator> {
        let children = self.build_list(attributes.get("mediators"), "sequence")?;
        let mut sequence = match name {
            Some(name) => SequenceMediator::named(name, children),
            None => SequenceMediator::anonymous(children),
        };
        if let Some(handler) = attributes.get("onError") {
            sequence = sequence.with_error_handler(self.fault_handler(handler)?);
        }
        Ok(sequence)
    }

    fn fault_handler(&self, definition: &Value) -> BuildResult<FaultHandler> {
        match definition {
            Value::String(name) => Ok(FaultHandler::Named(name.clone())),
            Value::Object(attributes) => Ok(FaultHandler::Inline(Arc::new(
                self.sequence_body(None, attributes)?,
            ))),
            _ => Err(BuildError::invalid("sequence", "onError", "must be a name or an inline sequence")),
        }
    }

    fn target_sequence(&self, mediator: &str, attribute: &str, definition: &Value) -> BuildResult<TargetSequence> {
        match definition {
            Value::String(name) => Ok(TargetSequence::Named(name.clone())),
            Value::Object(attributes) => match attributes.get("sequence").and_then(Value::as_str) {
                Some(name) => Ok(TargetSequence::Named(name.to_string())),
                None => Ok(TargetSequence::Inline(Arc::new(
                    self.sequence_body(None, attributes)?,
                ))),
            },
            _ => Err(BuildError::invalid(mediator, attribute, "must be a name or an inline sequence")),
        }
    }

    fn target(&self, mediator: &str, definition: &Value) -> BuildResult<Target> {
        let attributes = definition
            .as_object()
            .ok_or_else(|| BuildError::invalid(mediator, "target", "must be an object"))?;

        let mut target = if let Some(name) = attributes.get("sequence").and_then(Value::as_str) {
            Target::sequence_ref(name)
        } else if attributes.contains_key("mediators") {
            Target::sequence(self.sequence_body(None, attributes)?)
        } else if let Some(endpoint) = attributes.get("endpoint") {
            Target::endpoint(endpoint_from(mediator, endpoint)?)
        } else {
            Target::default()
        };

        if let Some(to) = optional_str(attributes, "to") {
            target = target.with_to(to);
        }
        if let Some(action) = optional_str(attributes, "action") {
            target = target.with_action(action);
        }
        Ok(target)
    }
}

fn required_str<'a>(attributes: &'a Attributes, mediator: &str, name: &str) -> BuildResult<&'a str> {
    attributes
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| BuildError::missing(mediator, name))
}

fn optional_str<'a>(attributes: &'a Attributes, name: &str) -> Option<&'a str> {
    attributes.get(name).and_then(Value::as_str)
}

fn required_expr(attributes: &Attributes, mediator: &str, name: &str) -> BuildResult<ValueSource> {
    ValueSource::parse(required_str(attributes, mediator, name)?)
}

fn optional_expr(attributes: &Attributes, name: &str) -> BuildResult<Option<ValueSource>> {
    optional_str(attributes, name).map(ValueSource::parse).transpose()
}

fn optional_bool(attributes: &Attributes, name: &str, default: bool) -> bool {
    attributes.get(name).and_then(Value::as_bool).unwrap_or(default)
}

fn optional_i64(attributes: &Attributes, mediator: &str, name: &str, default: i64) -> BuildResult<i64> {
    match attributes.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_i64()
            .ok_or_else(|| BuildError::invalid(mediator, name, "must be an integer")),
    }
}

/// Enum attributes deserialize through serde from their lowercase names
fn optional_enum<T: serde::de::DeserializeOwned + Default>(
    attributes: &Attributes,
    mediator: &str,
    name: &str,
) -> BuildResult<T> {
    match attributes.get(name) {
        None => Ok(T::default()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| BuildError::invalid(mediator, name, e.to_string())),
    }
}

fn endpoint_from(mediator: &str, definition: &Value) -> BuildResult<Endpoint> {
    match definition {
        Value::String(address) => Ok(Endpoint::address(address.as_str())),
        other => serde_json::from_value(other.clone())
            .map_err(|e| BuildError::invalid(mediator, "endpoint", e.to_string())),
    }
}

fn build_sequence_mediator(factory: &MediatorFactory, attributes: &Attributes) -> BuildResult<Mediator> {
    if let Some(key) = optional_str(attributes, "key") {
        return Ok(Mediator::SequenceRef(SequenceReference::new(key)));
    }
    let name = optional_str(attributes, "name").map(str::to_string);
    Ok(Mediator::Sequence(Arc::new(factory.sequence_body(name, attributes)?)))
}

fn build_in(factory: &MediatorFactory, attributes: &Attributes) -> BuildResult<Mediator> {
    Ok(Mediator::In(InMediator::new(
        factory.build_list(attributes.get("mediators"), "in")?,
    )))
}

fn build_out(factory: &MediatorFactory, attributes: &Attributes) -> BuildResult<Mediator> {
    Ok(Mediator::Out(OutMediator::new(
        factory.build_list(attributes.get("mediators"), "out")?,
    )))
}

fn build_switch(factory: &MediatorFactory, attributes: &Attributes) -> BuildResult<Mediator> {
    let source = required_expr(attributes, "switch", "source")?;

    let mut cases = Vec::new();
    if let Some(definitions) = attributes.get("cases") {
        let definitions = definitions
            .as_array()
            .ok_or_else(|| BuildError::invalid("switch", "cases", "must be an array"))?;
        for definition in definitions {
            let case = definition
                .as_object()
                .ok_or_else(|| BuildError::invalid("switch", "cases", "each case must be an object"))?;
            let regex = required_str(case, "switch", "regex")?;
            cases.push(SwitchCase::new(
                regex,
                factory.build_list(case.get("mediators"), "switch")?,
            )?);
        }
    }

    let default = match attributes.get("default") {
        None => None,
        Some(Value::Object(default)) => Some(factory.build_list(default.get("mediators"), "switch")?),
        Some(other @ Value::Array(_)) => Some(factory.build_list(Some(other), "switch")?),
        Some(_) => return Err(BuildError::invalid("switch", "default", "must be an object or array")),
    };

    Ok(Mediator::Switch(SwitchMediator::new(source, cases, default)))
}

fn build_filter(factory: &MediatorFactory, attributes: &Attributes) -> BuildResult<Mediator> {
    let source = required_expr(attributes, "filter", "source")?;
    let condition = match optional_str(attributes, "regex") {
        Some(pattern) => FilterCondition::matches(source, pattern)?,
        None => FilterCondition::Truthy(source),
    };
    let filter = FilterMediator::new(condition, factory.build_list(attributes.get("then"), "filter")?)
        .with_else(factory.build_list(attributes.get("else"), "filter")?);
    Ok(Mediator::Filter(filter))
}

fn build_header(_: &MediatorFactory, attributes: &Attributes) -> BuildResult<Mediator> {
    let name = required_str(attributes, "header", "name")?;
    match optional_str(attributes, "action").unwrap_or("set") {
        "set" => Ok(Mediator::Header(HeaderMediator::set(
            name,
            required_expr(attributes, "header", "value")?,
        ))),
        "remove" => Ok(Mediator::Header(HeaderMediator::remove(name))),
        other => Err(BuildError::invalid("header", "action", format!("unknown action '{other}'"))),
    }
}

fn build_fault(_: &MediatorFactory, attributes: &Attributes) -> BuildResult<Mediator> {
    let reason = required_expr(attributes, "makefault", "reason")?;
    let mut fault = FaultMediator::new(optional_str(attributes, "code").unwrap_or("Server"), reason);
    if let Some(actor) = optional_str(attributes, "actor") {
        fault = fault.with_actor(actor);
    }
    if let Some(detail) = optional_expr(attributes, "detail")? {
        fault = fault.with_detail(detail);
    }
    Ok(Mediator::Fault(fault))
}

fn enrich_target(expression: &str) -> BuildResult<EnrichTarget> {
    match ValueSource::parse(expression)? {
        ValueSource::Body => Ok(EnrichTarget::Body),
        ValueSource::Property(name) => Ok(EnrichTarget::Property(name)),
        ValueSource::Pointer(pointer) => Ok(EnrichTarget::Pointer(pointer)),
        _ => Err(BuildError::invalid(
            "enrich",
            "target",
            "must be $body, a $ctx: property or a JSON pointer",
        )),
    }
}

fn build_enrich(_: &MediatorFactory, attributes: &Attributes) -> BuildResult<Mediator> {
    let source = required_expr(attributes, "enrich", "source")?;
    let target = enrich_target(optional_str(attributes, "target").unwrap_or("$body"))?;
    let action = match optional_str(attributes, "action").unwrap_or("replace") {
        "replace" => EnrichAction::Replace,
        "child" => EnrichAction::Child,
        "sibling" => EnrichAction::Sibling,
        other => return Err(BuildError::invalid("enrich", "action", format!("unknown action '{other}'"))),
    };
    Ok(Mediator::Enrich(EnrichMediator::new(source, target, action)))
}

fn build_property(_: &MediatorFactory, attributes: &Attributes) -> BuildResult<Mediator> {
    let name = required_str(attributes, "property", "name")?;
    let scope = match optional_str(attributes, "scope").unwrap_or("default") {
        "default" => PropertyScope::Default,
        "global" => PropertyScope::Global,
        other => return Err(BuildError::invalid("property", "scope", format!("unknown scope '{other}'"))),
    };
    let property = match optional_str(attributes, "action").unwrap_or("set") {
        "set" => PropertyMediator::set(name, required_expr(attributes, "property", "value")?),
        "remove" => PropertyMediator::remove(name),
        other => return Err(BuildError::invalid("property", "action", format!("unknown action '{other}'"))),
    };
    Ok(Mediator::Property(property.with_scope(scope)))
}

fn build_log(_: &MediatorFactory, attributes: &Attributes) -> BuildResult<Mediator> {
    let level: LogLevel = optional_enum(attributes, "log", "level")?;
    let category: LogCategory = optional_enum(attributes, "log", "category")?;
    let mut log = LogMediator::new(level, category);
    if let Some(separator) = optional_str(attributes, "separator") {
        log = log.with_separator(separator);
    }
    if let Some(properties) = attributes.get("properties").and_then(Value::as_array) {
        for property in properties {
            let property = property
                .as_object()
                .ok_or_else(|| BuildError::invalid("log", "properties", "each property must be an object"))?;
            log = log.with_property(
                required_str(property, "log", "name")?,
                required_expr(property, "log", "value")?,
            );
        }
    }
    Ok(Mediator::Log(log))
}

fn build_send(_: &MediatorFactory, attributes: &Attributes) -> BuildResult<Mediator> {
    let endpoint = attributes
        .get("endpoint")
        .map(|definition| endpoint_from("send", definition))
        .transpose()?;
    Ok(Mediator::Send(SendMediator::new(endpoint)))
}

fn build_aggregate(factory: &MediatorFactory, attributes: &Attributes) -> BuildResult<Mediator> {
    let mut condition = CompletionCondition::default();
    if let Some(complete) = attributes.get("completeCondition").and_then(Value::as_object) {
        condition = condition
            .with_min_count(optional_i64(complete, "aggregate", "minMessages", -1)?)
            .with_max_count(optional_i64(complete, "aggregate", "maxMessages", -1)?);
        let timeout_ms = optional_i64(complete, "aggregate", "timeoutMs", 0)?;
        if timeout_ms > 0 {
            condition = condition.with_timeout(Duration::from_millis(timeout_ms as u64));
        }
    }

    let on_complete = attributes
        .get("onComplete")
        .ok_or_else(|| BuildError::missing("aggregate", "onComplete"))?;

    Ok(Mediator::Aggregate(AggregateMediator::build(
        optional_str(attributes, "id").map(str::to_string),
        optional_expr(attributes, "correlation")?,
        optional_str(attributes, "expression").map(str::to_string),
        optional_str(attributes, "enclosing").unwrap_or("parts").to_string(),
        condition,
        factory.target_sequence("aggregate", "onComplete", on_complete)?,
    )))
}

fn build_iterate(factory: &MediatorFactory, attributes: &Attributes) -> BuildResult<Mediator> {
    let expression = required_str(attributes, "iterate", "expression")?;
    if !expression.starts_with('/') {
        return Err(BuildError::invalid("iterate", "expression", "must be a JSON pointer"));
    }
    let target = attributes
        .get("target")
        .ok_or_else(|| BuildError::missing("iterate", "target"))?;

    let mut iterate = IterateMediator::new(expression, factory.target("iterate", target)?)
        .continue_parent(optional_bool(attributes, "continueParent", false));
    if let Some(id) = optional_str(attributes, "id") {
        iterate = iterate.with_id(id);
    }
    if optional_bool(attributes, "preservePayload", false) {
        iterate = iterate.preserving_payload(optional_str(attributes, "attachPath").unwrap_or(expression));
    }
    Ok(Mediator::Iterate(iterate))
}

fn build_clone(factory: &MediatorFactory, attributes: &Attributes) -> BuildResult<Mediator> {
    let definitions = attributes
        .get("targets")
        .and_then(Value::as_array)
        .ok_or_else(|| BuildError::missing("clone", "targets"))?;
    let targets = definitions
        .iter()
        .map(|definition| factory.target("clone", definition))
        .collect::<BuildResult<Vec<_>>>()?;

    let mut clone = CloneMediator::new(targets).continue_parent(optional_bool(attributes, "continueParent", false));
    if let Some(id) = optional_str(attributes, "id") {
        clone = clone.with_id(id);
    }
    Ok(Mediator::Clone(clone))
}

fn build_reliable_sequence(_: &MediatorFactory, attributes: &Attributes) -> BuildResult<Mediator> {
    let single = optional_bool(attributes, "single", false);
    let correlation = optional_expr(attributes, "correlation")?;

    let mut mediator = match (single, correlation) {
        (true, None) => ReliableSequenceMediator::single(),
        (false, Some(correlation)) => ReliableSequenceMediator::correlated(correlation),
        (true, Some(_)) => {
            return Err(BuildError::invalid(
                "RMSequence",
                "single",
                "single and correlation are mutually exclusive",
            ))
        }
        (false, None) => return Err(BuildError::missing("RMSequence", "single|correlation")),
    };

    if let Some(last) = optional_expr(attributes, "lastMessage")? {
        mediator = mediator.with_last_message(last);
    }
    if let Some(version) = optional_str(attributes, "version") {
        let version: RmSpecVersion = version
            .parse()
            .map_err(|reason: String| BuildError::invalid("RMSequence", "version", reason))?;
        mediator = mediator.with_version(version);
    }
    Ok(Mediator::ReliableSequence(mediator))
}
