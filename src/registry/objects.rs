use crate::mediators::SequenceMediator;
use serde_json::Value;
use std::sync::Arc;

/// Typed object produced by mapping raw registry content
#[derive(Debug, Clone)]
pub enum RegistryObject {
    Text(Arc<str>),
    Json(Arc<Value>),
    Sequence(Arc<SequenceMediator>),
}

impl RegistryObject {
    pub fn text(value: impl AsRef<str>) -> Self {
        Self::Text(Arc::from(value.as_ref()))
    }

    pub fn json(value: Value) -> Self {
        Self::Json(Arc::new(value))
    }

    pub fn sequence(sequence: SequenceMediator) -> Self {
        Self::Sequence(Arc::new(sequence))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Json(_) => "json",
            Self::Sequence(_) => "sequence",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&Arc<SequenceMediator>> {
        match self {
            Self::Sequence(sequence) => Some(sequence),
            _ => None,
        }
    }

    /// Same underlying instance, not merely equal content
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => Arc::ptr_eq(a, b),
            (Self::Json(a), Self::Json(b)) => Arc::ptr_eq(a, b),
            (Self::Sequence(a), Self::Sequence(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Property value view used when a local entry is read by mediators
    pub fn to_value(&self) -> Value {
        match self {
            Self::Text(text) => Value::String(text.to_string()),
            Self::Json(value) => value.as_ref().clone(),
            Self::Sequence(sequence) => Value::String(
                sequence.name().unwrap_or("anonymous").to_string(),
            ),
        }
    }
}
