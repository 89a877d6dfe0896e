use super::errors::{RegistryError, RegistryResult};
use super::objects::RegistryObject;
use super::traits::{RawResource, ResourceMapper};
use crate::mediators::MediatorFactory;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub use crate::constants::content_types::{
    JSON as JSON_CONTENT_TYPE, SEQUENCE as SEQUENCE_CONTENT_TYPE, TEXT as TEXT_CONTENT_TYPE,
};

#[derive(Debug, Default)]
pub struct TextMapper;

impl ResourceMapper for TextMapper {
    fn map(&self, raw: &RawResource) -> RegistryResult<RegistryObject> {
        Ok(RegistryObject::text(&raw.body))
    }
}

#[derive(Debug, Default)]
pub struct JsonMapper;

impl ResourceMapper for JsonMapper {
    fn map(&self, raw: &RawResource) -> RegistryResult<RegistryObject> {
        parse_json(raw).map(RegistryObject::json)
    }
}

/// Builds a sequence from a JSON sequence definition
///
/// A definition without a `name` takes the registry key as its name. The built
/// sequence remembers the key it was loaded from.
#[derive(Debug)]
pub struct SequenceMapper {
    factory: Arc<MediatorFactory>,
}

impl SequenceMapper {
    pub fn new(factory: Arc<MediatorFactory>) -> Self {
        Self { factory }
    }
}

impl ResourceMapper for SequenceMapper {
    fn map(&self, raw: &RawResource) -> RegistryResult<RegistryObject> {
        let mut definition = parse_json(raw)?;
        if let Value::Object(attributes) = &mut definition {
            attributes
                .entry("name")
                .or_insert_with(|| Value::String(raw.key.clone()));
        }

        let sequence = self
            .factory
            .build_sequence(&definition)
            .map_err(|e| RegistryError::MappingFailed {
                key: raw.key.clone(),
                reason: e.to_string(),
            })?;
        Ok(RegistryObject::sequence(sequence.with_registry_key(raw.key.clone())))
    }
}

fn parse_json(raw: &RawResource) -> RegistryResult<Value> {
    serde_json::from_str(&raw.body).map_err(|e| RegistryError::MappingFailed {
        key: raw.key.clone(),
        reason: e.to_string(),
    })
}

/// Mappers keyed by content type
///
/// Lookup ignores media type parameters (`application/json; charset=utf-8`
/// resolves to the `application/json` mapper).
#[derive(Debug, Clone, Default)]
pub struct MapperRegistry {
    mappers: HashMap<String, Arc<dyn ResourceMapper>>,
}

impl MapperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text and JSON mappers
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(TEXT_CONTENT_TYPE, Arc::new(TextMapper));
        registry.register(JSON_CONTENT_TYPE, Arc::new(JsonMapper));
        registry
    }

    /// Built-in mappers plus sequence definitions built with `factory`
    pub fn with_defaults(factory: Arc<MediatorFactory>) -> Self {
        let mut registry = Self::with_builtin();
        registry.register(SEQUENCE_CONTENT_TYPE, Arc::new(SequenceMapper::new(factory)));
        registry
    }

    pub fn register(&mut self, content_type: impl Into<String>, mapper: Arc<dyn ResourceMapper>) {
        self.mappers
            .insert(normalize(&content_type.into()).to_string(), mapper);
    }

    pub fn mapper_for(&self, content_type: &str) -> Option<Arc<dyn ResourceMapper>> {
        self.mappers.get(normalize(content_type)).cloned()
    }

    pub fn map(&self, raw: &RawResource) -> RegistryResult<RegistryObject> {
        let mapper = self
            .mapper_for(&raw.content_type)
            .ok_or_else(|| RegistryError::NoMapper {
                content_type: raw.content_type.clone(),
            })?;
        mapper.map(raw)
    }

    pub fn content_types(&self) -> Vec<String> {
        self.mappers.keys().cloned().collect()
    }
}

fn normalize(content_type: &str) -> &str {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_ignores_parameters() {
        let mappers = MapperRegistry::with_builtin();
        let raw = RawResource::new("conf:/a", "application/json; charset=utf-8", r#"{"a": 1}"#);
        let object = mappers.map(&raw).unwrap();
        assert_eq!(object.as_json(), Some(&json!({"a": 1})));
    }

    #[test]
    fn test_unknown_content_type_has_no_mapper() {
        let mappers = MapperRegistry::with_builtin();
        let raw = RawResource::new("conf:/a", "application/xml", "<a/>");
        assert!(matches!(
            mappers.map(&raw),
            Err(RegistryError::NoMapper { .. })
        ));
    }

    #[test]
    fn test_sequence_mapper_names_sequence_after_key() {
        let mappers = MapperRegistry::with_defaults(Arc::new(MediatorFactory::new()));
        let raw = RawResource::new(
            "conf:/sequences/audit",
            SEQUENCE_CONTENT_TYPE,
            r#"{"mediators": [{"type": "drop"}]}"#,
        );

        let object = mappers.map(&raw).unwrap();
        let sequence = object.as_sequence().unwrap();
        assert_eq!(sequence.name(), Some("conf:/sequences/audit"));
        assert_eq!(sequence.registry_key(), Some("conf:/sequences/audit"));
        assert_eq!(sequence.children().len(), 1);
    }

    #[test]
    fn test_malformed_json_fails_mapping() {
        let mappers = MapperRegistry::with_builtin();
        let raw = RawResource::new("conf:/a", JSON_CONTENT_TYPE, "{not json");
        assert!(matches!(
            mappers.map(&raw),
            Err(RegistryError::MappingFailed { .. })
        ));
    }
}
