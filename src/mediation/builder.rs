use super::configuration::SynapseConfiguration;
use crate::mediators::errors::{BuildError, BuildResult};
use crate::mediators::MediatorFactory;
use crate::message::GlobalProperties;
use crate::registry::{RegistryCache, RegistryObject};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Builds a [`SynapseConfiguration`] from a JSON document
///
/// ```json
/// {
///   "mainSequence": "main",
///   "faultSequence": "fault",
///   "sequences": [ { "name": "main", "mediators": [ ... ] } ],
///   "dynamicSequences": { "audit": "conf:/sequences/audit" },
///   "localEntries": { "greeting": "hello", "limits": { "max": 10 } },
///   "properties": { "region": "eu" }
/// }
/// ```
///
/// Every section is optional. Duplicate sequence names and dangling
/// references are build errors.
#[derive(Debug)]
pub struct ConfigurationBuilder<'a> {
    factory: &'a MediatorFactory,
    registry_cache: Option<Arc<RegistryCache>>,
    global_properties: Option<GlobalProperties>,
    validate: bool,
}

impl<'a> ConfigurationBuilder<'a> {
    pub fn new(factory: &'a MediatorFactory) -> Self {
        Self {
            factory,
            registry_cache: None,
            global_properties: None,
            validate: true,
        }
    }

    /// Build and validate `document` with `factory`
    pub fn from_json(document: &Value, factory: &MediatorFactory) -> BuildResult<SynapseConfiguration> {
        ConfigurationBuilder::new(factory).build(document)
    }

    pub fn with_registry_cache(mut self, cache: Arc<RegistryCache>) -> Self {
        self.registry_cache = Some(cache);
        self
    }

    pub fn with_global_properties(mut self, global_properties: GlobalProperties) -> Self {
        self.global_properties = Some(global_properties);
        self
    }

    /// Skip reference validation, for partial documents merged later
    pub fn without_validation(mut self) -> Self {
        self.validate = false;
        self
    }

    pub fn build(self, document: &Value) -> BuildResult<SynapseConfiguration> {
        let root = document
            .as_object()
            .ok_or_else(|| BuildError::Malformed("configuration must be an object".to_string()))?;

        let mut config = SynapseConfiguration::new();
        if let Some(cache) = self.registry_cache {
            config = config.with_registry_cache(cache);
        }
        if let Some(global) = self.global_properties {
            config = config.with_global_properties(global);
        }

        let main = optional_name(root.get("mainSequence"), "mainSequence")?;
        let fault = optional_name(root.get("faultSequence"), "faultSequence")?;
        if main.is_some() || fault.is_some() {
            let main = main.unwrap_or_else(|| config.main_sequence_name().to_string());
            let fault = fault.unwrap_or_else(|| config.fault_sequence_name().to_string());
            config = config.with_sequence_names(main, fault);
        }

        match root.get("sequences") {
            None | Some(Value::Null) => {}
            Some(Value::Array(definitions)) => {
                for definition in definitions {
                    let sequence = self.factory.build_sequence(definition)?;
                    let name = sequence.name().unwrap_or_default().to_string();
                    if config.has_sequence(&name) {
                        return Err(BuildError::DuplicateDefinition { name });
                    }
                    config.add_sequence(sequence);
                }
            }
            Some(_) => {
                return Err(BuildError::Malformed("'sequences' must be an array".to_string()))
            }
        }

        for (name, key) in object_section(root.get("dynamicSequences"), "dynamicSequences")? {
            if config.has_sequence(name) {
                return Err(BuildError::DuplicateDefinition { name: name.clone() });
            }
            let key = key.as_str().ok_or_else(|| {
                BuildError::Malformed(format!("dynamic sequence '{name}' must map to a registry key"))
            })?;
            config.add_dynamic_sequence(name.clone(), key);
        }

        for (key, value) in object_section(root.get("localEntries"), "localEntries")? {
            let entry = match value {
                Value::String(text) => RegistryObject::text(text),
                other => RegistryObject::json(other.clone()),
            };
            config.put_local_entry(key.clone(), entry);
        }

        for (key, value) in object_section(root.get("properties"), "properties")? {
            config.global_properties().set(key.clone(), value.clone());
        }

        if self.validate {
            config.validate()?;
        }

        info!(
            sequences = config.sequence_names().len(),
            main = %config.main_sequence_name(),
            "✅ Mediation configuration built"
        );
        Ok(config)
    }
}

fn optional_name(value: Option<&Value>, section: &str) -> BuildResult<Option<String>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(name)) => Ok(Some(name.clone())),
        Some(_) => Err(BuildError::Malformed(format!("'{section}' must be a string"))),
    }
}

fn object_section<'v>(
    value: Option<&'v Value>,
    section: &str,
) -> BuildResult<Vec<(&'v String, &'v Value)>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Object(map)) => Ok(map.iter().collect()),
        Some(_) => Err(BuildError::Malformed(format!("'{section}' must be an object"))),
    }
}
