//! Value expressions evaluated against a message context.
//!
//! Expressions address the parts of a message mediators need to read:
//!
//! | Syntax            | Resolves to                                   |
//! |-------------------|-----------------------------------------------|
//! | `/a/b/0`          | JSON pointer into the payload                 |
//! | `$body`           | the whole payload                             |
//! | `$ctx:name`       | property (local, then global)                 |
//! | `$header:name`    | message header                                |
//! | `$to`, `$action`, `$messageId`, `$correlation`, `$replyTo` | addressing |
//! | anything else     | literal string                                |

use super::errors::{BuildError, BuildResult};
use crate::message::MessageContext;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ValueSource {
    Literal(Value),
    Pointer(String),
    Body,
    Property(String),
    Header(String),
    To,
    ReplyTo,
    Action,
    MessageId,
    Correlation,
}

impl ValueSource {
    pub fn parse(expression: &str) -> BuildResult<Self> {
        let expression = expression.trim();

        if expression.starts_with('/') {
            return Ok(Self::Pointer(expression.to_string()));
        }

        if let Some(name) = expression.strip_prefix("$ctx:") {
            return non_empty(name, expression).map(|n| Self::Property(n.to_string()));
        }

        if let Some(name) = expression.strip_prefix("$header:") {
            return non_empty(name, expression).map(|n| Self::Header(n.to_string()));
        }

        match expression {
            "$body" => Ok(Self::Body),
            "$to" => Ok(Self::To),
            "$replyTo" => Ok(Self::ReplyTo),
            "$action" => Ok(Self::Action),
            "$messageId" => Ok(Self::MessageId),
            "$correlation" => Ok(Self::Correlation),
            other if other.starts_with('$') => Err(BuildError::invalid(
                "expression",
                other,
                "unknown expression prefix",
            )),
            other => Ok(Self::Literal(Value::String(other.to_string()))),
        }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn property(name: impl Into<String>) -> Self {
        Self::Property(name.into())
    }

    pub fn evaluate(&self, ctx: &MessageContext) -> Option<Value> {
        match self {
            Self::Literal(value) => Some(value.clone()),
            Self::Pointer(pointer) => ctx.payload.pointer(pointer).cloned(),
            Self::Body => Some(ctx.payload.clone()),
            Self::Property(name) => ctx.get_property(name).map(|v| v.as_ref().clone()),
            Self::Header(name) => ctx.headers.get(name).cloned(),
            Self::To => ctx.to.as_ref().map(|to| Value::String(to.to_string())),
            Self::ReplyTo => ctx.reply_to.as_ref().map(|r| Value::String(r.to_string())),
            Self::Action => ctx.action.clone().map(Value::String),
            Self::MessageId => Some(Value::String(ctx.message_id().to_string())),
            Self::Correlation => ctx.correlation_key.clone().map(Value::String),
        }
    }

    /// Evaluate and render as text; JSON strings are unquoted
    pub fn evaluate_string(&self, ctx: &MessageContext) -> Option<String> {
        self.evaluate(ctx).and_then(|value| match value {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        })
    }

    /// Truthiness used by boolean filters
    pub fn evaluate_bool(&self, ctx: &MessageContext) -> bool {
        match self.evaluate(ctx) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
            Some(Value::Array(items)) => !items.is_empty(),
            Some(Value::Object(map)) => !map.is_empty(),
        }
    }
}

fn non_empty<'a>(name: &'a str, expression: &str) -> BuildResult<&'a str> {
    if name.is_empty() {
        Err(BuildError::invalid(
            "expression",
            expression,
            "name must not be empty",
        ))
    } else {
        Ok(name)
    }
}

impl fmt::Display for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => write!(f, "{value}"),
            Self::Pointer(pointer) => f.write_str(pointer),
            Self::Body => f.write_str("$body"),
            Self::Property(name) => write!(f, "$ctx:{name}"),
            Self::Header(name) => write!(f, "$header:{name}"),
            Self::To => f.write_str("$to"),
            Self::ReplyTo => f.write_str("$replyTo"),
            Self::Action => f.write_str("$action"),
            Self::MessageId => f.write_str("$messageId"),
            Self::Correlation => f.write_str("$correlation"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            ValueSource::parse("/order/id").unwrap(),
            ValueSource::Pointer("/order/id".to_string())
        );
        assert_eq!(
            ValueSource::parse("$ctx:symbol").unwrap(),
            ValueSource::Property("symbol".to_string())
        );
        assert_eq!(ValueSource::parse("$to").unwrap(), ValueSource::To);
        assert_eq!(
            ValueSource::parse("IBM").unwrap(),
            ValueSource::Literal(json!("IBM"))
        );
        assert!(ValueSource::parse("$nope").is_err());
        assert!(ValueSource::parse("$ctx:").is_err());
    }

    #[test]
    fn test_evaluate_against_context() {
        let mut ctx = MessageContext::new(json!({"order": {"symbol": "IBM", "qty": 3}}))
            .with_to("http://localhost/services/Orders");
        ctx.set_property("flag", json!(true));
        ctx.headers.insert("Priority".to_string(), json!("high"));

        let symbol = ValueSource::parse("/order/symbol").unwrap();
        assert_eq!(symbol.evaluate_string(&ctx).as_deref(), Some("IBM"));

        let qty = ValueSource::parse("/order/qty").unwrap();
        assert_eq!(qty.evaluate_string(&ctx).as_deref(), Some("3"));

        assert!(ValueSource::parse("$ctx:flag").unwrap().evaluate_bool(&ctx));
        assert!(!ValueSource::parse("$ctx:absent").unwrap().evaluate_bool(&ctx));
        assert_eq!(
            ValueSource::parse("$header:Priority")
                .unwrap()
                .evaluate_string(&ctx)
                .as_deref(),
            Some("high")
        );
        assert_eq!(
            ValueSource::To.evaluate_string(&ctx).as_deref(),
            Some("http://localhost/services/Orders")
        );
    }
}
