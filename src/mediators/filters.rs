//! Routing mediators: In/Out gating on the response flag, Switch and Filter.

use super::errors::{BuildError, BuildResult};
use super::expression::ValueSource;
use super::{mediate_children, Mediator, Outcome};
use crate::mediation::MediationEnv;
use crate::message::MessageContext;
use regex::Regex;
use tracing::{debug, trace};

/// Compile a case pattern so that it must match the whole source value
pub(crate) fn anchored_regex(mediator: &str, pattern: &str) -> BuildResult<Regex> {
    Regex::new(&format!("^(?:{pattern})$"))
        .map_err(|e| BuildError::invalid(mediator, "regex", e.to_string()))
}

/// Runs its children for request messages only
#[derive(Debug, Clone, Default)]
pub struct InMediator {
    children: Vec<Mediator>,
}

impl InMediator {
    pub fn new(children: Vec<Mediator>) -> Self {
        Self { children }
    }

    pub fn children(&self) -> &[Mediator] {
        &self.children
    }

    pub fn mediate(&self, ctx: &mut MessageContext, env: &MediationEnv) -> Outcome {
        if ctx.is_response() {
            trace!(message_id = %ctx.message_id(), "In mediator skipped for response");
            return Outcome::Continue;
        }
        mediate_children(&self.children, ctx, env)
    }
}

/// Runs its children for response messages only
#[derive(Debug, Clone, Default)]
pub struct OutMediator {
    children: Vec<Mediator>,
}

impl OutMediator {
    pub fn new(children: Vec<Mediator>) -> Self {
        Self { children }
    }

    pub fn children(&self) -> &[Mediator] {
        &self.children
    }

    pub fn mediate(&self, ctx: &mut MessageContext, env: &MediationEnv) -> Outcome {
        if !ctx.is_response() {
            trace!(message_id = %ctx.message_id(), "Out mediator skipped for request");
            return Outcome::Continue;
        }
        mediate_children(&self.children, ctx, env)
    }
}

#[derive(Debug, Clone)]
pub struct SwitchCase {
    pattern: String,
    regex: Regex,
    pub mediators: Vec<Mediator>,
}

impl SwitchCase {
    pub fn new(pattern: &str, mediators: Vec<Mediator>) -> BuildResult<Self> {
        Ok(Self {
            pattern: pattern.to_string(),
            regex: anchored_regex("switch", pattern)?,
            mediators,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

/// Evaluates a source value and runs exactly one branch
///
/// Cases are tried in declaration order and the first match wins. The default
/// runs when nothing matches or the source yields no value; with no default
/// the message continues untouched.
#[derive(Debug, Clone)]
pub struct SwitchMediator {
    source: ValueSource,
    cases: Vec<SwitchCase>,
    default: Option<Vec<Mediator>>,
}

impl SwitchMediator {
    pub fn new(source: ValueSource, cases: Vec<SwitchCase>, default: Option<Vec<Mediator>>) -> Self {
        Self {
            source,
            cases,
            default,
        }
    }

    pub fn cases(&self) -> &[SwitchCase] {
        &self.cases
    }

    pub fn default_case(&self) -> Option<&[Mediator]> {
        self.default.as_deref()
    }

    pub fn mediate(&self, ctx: &mut MessageContext, env: &MediationEnv) -> Outcome {
        let value = self.source.evaluate_string(ctx);

        if let Some(value) = &value {
            if let Some(case) = self.cases.iter().find(|case| case.matches(value)) {
                debug!(
                    message_id = %ctx.message_id(),
                    source = %self.source,
                    value = %value,
                    case = %case.pattern,
                    "Switch case matched"
                );
                return mediate_children(&case.mediators, ctx, env);
            }
        } else {
            debug!(
                message_id = %ctx.message_id(),
                source = %self.source,
                "Switch source evaluated to nothing"
            );
        }

        match &self.default {
            Some(default) => {
                debug!(message_id = %ctx.message_id(), "Switch default case selected");
                mediate_children(default, ctx, env)
            }
            None => Outcome::Continue,
        }
    }
}

/// Condition evaluated by [`FilterMediator`]
#[derive(Debug, Clone)]
pub enum FilterCondition {
    /// Source value (as text) must fully match the pattern
    Matches { source: ValueSource, regex: Regex },
    /// Source value must be truthy
    Truthy(ValueSource),
}

impl FilterCondition {
    pub fn matches(source: ValueSource, pattern: &str) -> BuildResult<Self> {
        Ok(Self::Matches {
            source,
            regex: anchored_regex("filter", pattern)?,
        })
    }

    pub fn test(&self, ctx: &MessageContext) -> bool {
        match self {
            Self::Matches { source, regex } => source
                .evaluate_string(ctx)
                .is_some_and(|value| regex.is_match(&value)),
            Self::Truthy(source) => source.evaluate_bool(ctx),
        }
    }
}

/// Conditional branch with optional else
#[derive(Debug, Clone)]
pub struct FilterMediator {
    condition: FilterCondition,
    then_branch: Vec<Mediator>,
    else_branch: Vec<Mediator>,
}

impl FilterMediator {
    pub fn new(condition: FilterCondition, then_branch: Vec<Mediator>) -> Self {
        Self {
            condition,
            then_branch,
            else_branch: Vec::new(),
        }
    }

    pub fn with_else(mut self, else_branch: Vec<Mediator>) -> Self {
        self.else_branch = else_branch;
        self
    }

    pub fn then_branch(&self) -> &[Mediator] {
        &self.then_branch
    }

    pub fn else_branch(&self) -> &[Mediator] {
        &self.else_branch
    }

    pub fn mediate(&self, ctx: &mut MessageContext, env: &MediationEnv) -> Outcome {
        if self.condition.test(ctx) {
            mediate_children(&self.then_branch, ctx, env)
        } else {
            mediate_children(&self.else_branch, ctx, env)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mediation::testing::test_env;
    use crate::mediation::SynapseConfiguration;
    use crate::mediators::PropertyMediator;
    use serde_json::json;

    fn mark(value: &str) -> Mediator {
        Mediator::Property(PropertyMediator::set("branch", ValueSource::literal(value)))
    }

    fn switch() -> SwitchMediator {
        SwitchMediator::new(
            ValueSource::parse("/symbol").unwrap(),
            vec![
                SwitchCase::new("IB.*", vec![mark("first")]).unwrap(),
                SwitchCase::new("IBM", vec![mark("second")]).unwrap(),
                SwitchCase::new("MSFT", vec![mark("third")]).unwrap(),
            ],
            Some(vec![mark("default")]),
        )
    }

    #[test]
    fn test_switch_first_match_wins() {
        let (env, _) = test_env(SynapseConfiguration::new());
        let mut ctx = MessageContext::new(json!({"symbol": "IBM"}));
        assert!(switch().mediate(&mut ctx, &env).is_continue());
        assert_eq!(ctx.get_property_string("branch").as_deref(), Some("first"));
    }

    #[test]
    fn test_switch_patterns_are_anchored() {
        let (env, _) = test_env(SynapseConfiguration::new());
        let mut ctx = MessageContext::new(json!({"symbol": "XMSFTX"}));
        switch().mediate(&mut ctx, &env);
        assert_eq!(ctx.get_property_string("branch").as_deref(), Some("default"));
    }

    #[test]
    fn test_switch_missing_source_runs_default() {
        let (env, _) = test_env(SynapseConfiguration::new());
        let mut ctx = MessageContext::new(json!({}));
        switch().mediate(&mut ctx, &env);
        assert_eq!(ctx.get_property_string("branch").as_deref(), Some("default"));
    }

    #[test]
    fn test_in_out_gate_on_response_flag() {
        let (env, _) = test_env(SynapseConfiguration::new());
        let in_mediator = InMediator::new(vec![mark("in")]);
        let out_mediator = OutMediator::new(vec![mark("out")]);

        let mut request = MessageContext::new(json!({}));
        in_mediator.mediate(&mut request, &env);
        out_mediator.mediate(&mut request, &env);
        assert_eq!(request.get_property_string("branch").as_deref(), Some("in"));

        let mut response = MessageContext::new(json!({})).as_response();
        in_mediator.mediate(&mut response, &env);
        out_mediator.mediate(&mut response, &env);
        assert_eq!(response.get_property_string("branch").as_deref(), Some("out"));
    }

    #[test]
    fn test_filter_then_else() {
        let (env, _) = test_env(SynapseConfiguration::new());
        let filter = FilterMediator::new(
            FilterCondition::matches(ValueSource::parse("$header:Priority").unwrap(), "high|urgent")
                .unwrap(),
            vec![mark("fast")],
        )
        .with_else(vec![mark("slow")]);

        let mut urgent = MessageContext::new(json!({}));
        urgent.headers.insert("Priority".to_string(), json!("urgent"));
        filter.mediate(&mut urgent, &env);
        assert_eq!(urgent.get_property_string("branch").as_deref(), Some("fast"));

        let mut normal = MessageContext::new(json!({}));
        filter.mediate(&mut normal, &env);
        assert_eq!(normal.get_property_string("branch").as_deref(), Some("slow"));
    }

    #[test]
    fn test_invalid_pattern_is_build_error() {
        assert!(SwitchCase::new("(unclosed", Vec::new()).is_err());
    }
}
