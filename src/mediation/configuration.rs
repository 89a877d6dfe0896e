use crate::constants::sequences::{FAULT, MAIN};
use crate::mediators::errors::{BuildError, BuildResult, MediationError, MediationResult};
use crate::mediators::SequenceMediator;
use crate::message::GlobalProperties;
use crate::registry::{RegistryCache, RegistryObject};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Named artifacts shared by every message: sequences, local entries and
/// configuration-level properties
///
/// Static sequences are held directly. Dynamic sequences map a name to a
/// registry key and are resolved through the registry cache on every lookup,
/// so a new registry version is picked up once its lease expires.
#[derive(Debug)]
pub struct SynapseConfiguration {
    sequences: DashMap<String, Arc<SequenceMediator>>,
    dynamic_sequences: DashMap<String, String>,
    local_entries: DashMap<String, RegistryObject>,
    registry_cache: Option<Arc<RegistryCache>>,
    global_properties: GlobalProperties,
    main_sequence: String,
    fault_sequence: String,
}

impl Default for SynapseConfiguration {
    fn default() -> Self {
        Self::new()
    }
}

impl SynapseConfiguration {
    pub fn new() -> Self {
        Self {
            sequences: DashMap::new(),
            dynamic_sequences: DashMap::new(),
            local_entries: DashMap::new(),
            registry_cache: None,
            global_properties: GlobalProperties::new(),
            main_sequence: MAIN.to_string(),
            fault_sequence: FAULT.to_string(),
        }
    }

    pub fn with_registry_cache(mut self, cache: Arc<RegistryCache>) -> Self {
        self.registry_cache = Some(cache);
        self
    }

    pub fn with_sequence_names(
        mut self,
        main_sequence: impl Into<String>,
        fault_sequence: impl Into<String>,
    ) -> Self {
        self.main_sequence = main_sequence.into();
        self.fault_sequence = fault_sequence.into();
        self
    }

    pub fn with_global_properties(mut self, global_properties: GlobalProperties) -> Self {
        self.global_properties = global_properties;
        self
    }

    /// Resolve a sequence by name: static definitions first, then dynamic ones
    pub fn get_sequence(&self, name: &str) -> MediationResult<Arc<SequenceMediator>> {
        if let Some(sequence) = self.sequences.get(name) {
            return Ok(Arc::clone(sequence.value()));
        }

        let Some(key) = self.dynamic_sequences.get(name).map(|key| key.clone()) else {
            return Err(MediationError::SequenceNotFound {
                name: name.to_string(),
            });
        };

        let cache = self
            .registry_cache
            .as_ref()
            .ok_or_else(|| MediationError::ResourceUnavailable { key: key.clone() })?;
        match cache.get_resource(&key) {
            Some(RegistryObject::Sequence(sequence)) => Ok(sequence),
            Some(other) => {
                warn!(
                    sequence = %name,
                    key = %key,
                    kind = other.kind(),
                    "⚠️ Registry entry is not a sequence"
                );
                Err(MediationError::ResourceUnavailable { key })
            }
            None => Err(MediationError::ResourceUnavailable { key }),
        }
    }

    /// Register a named sequence, returning the one it replaces
    ///
    /// A replaced sequence is destroyed so references still holding it
    /// re-resolve. Anonymous sequences cannot be looked up and are ignored.
    pub fn add_sequence(&self, sequence: SequenceMediator) -> Option<Arc<SequenceMediator>> {
        let Some(name) = sequence.name().map(str::to_string) else {
            warn!("⚠️ Anonymous sequence cannot be registered by name, ignored");
            return None;
        };

        let previous = self.sequences.insert(name.clone(), Arc::new(sequence));
        if let Some(previous) = &previous {
            previous.destroy();
        }
        debug!(sequence = %name, replaced = previous.is_some(), "Sequence registered");
        previous
    }

    /// Bind `name` to a sequence stored in the registry under `key`
    pub fn add_dynamic_sequence(&self, name: impl Into<String>, key: impl Into<String>) {
        let name = name.into();
        let key = key.into();
        debug!(sequence = %name, key = %key, "Dynamic sequence registered");
        self.dynamic_sequences.insert(name, key);
    }

    pub fn remove_sequence(&self, name: &str) -> bool {
        let removed_static = match self.sequences.remove(name) {
            Some((_, sequence)) => {
                sequence.destroy();
                true
            }
            None => false,
        };
        let removed_dynamic = self.dynamic_sequences.remove(name).is_some();
        removed_static || removed_dynamic
    }

    pub fn has_sequence(&self, name: &str) -> bool {
        self.sequences.contains_key(name) || self.dynamic_sequences.contains_key(name)
    }

    pub fn is_dynamic_sequence(&self, name: &str) -> bool {
        self.dynamic_sequences.contains_key(name)
    }

    /// Every static and dynamic sequence name, sorted
    pub fn sequence_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sequences
            .iter()
            .map(|entry| entry.key().clone())
            .chain(self.dynamic_sequences.iter().map(|entry| entry.key().clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn main_sequence_name(&self) -> &str {
        &self.main_sequence
    }

    pub fn fault_sequence_name(&self) -> &str {
        &self.fault_sequence
    }

    pub fn main_sequence(&self) -> MediationResult<Arc<SequenceMediator>> {
        self.get_sequence(&self.main_sequence)
    }

    pub fn fault_sequence(&self) -> Option<Arc<SequenceMediator>> {
        self.get_sequence(&self.fault_sequence).ok()
    }

    pub fn has_fault_sequence(&self) -> bool {
        self.has_sequence(&self.fault_sequence)
    }

    /// Define a static local entry
    pub fn put_local_entry(&self, key: impl Into<String>, value: RegistryObject) {
        self.local_entries.insert(key.into(), value);
    }

    /// Local entry for `key`, falling back to the registry cache
    pub fn get_entry(&self, key: &str) -> Option<RegistryObject> {
        if let Some(entry) = self.local_entries.get(key) {
            return Some(entry.value().clone());
        }
        self.registry_cache.as_ref()?.get_resource(key)
    }

    pub fn global_properties(&self) -> &GlobalProperties {
        &self.global_properties
    }

    pub fn registry_cache(&self) -> Option<&Arc<RegistryCache>> {
        self.registry_cache.as_ref()
    }

    /// Check that every referenced sequence is defined and `main` exists
    pub fn validate(&self) -> BuildResult<()> {
        let known: HashSet<String> = self.sequence_names().into_iter().collect();

        for entry in self.sequences.iter() {
            let mut references = Vec::new();
            entry.value().collect_references(&mut references);
            if let Some(missing) = references.into_iter().find(|name| !known.contains(name)) {
                return Err(BuildError::DanglingReference {
                    name: missing,
                    referenced_by: entry.key().clone(),
                });
            }
        }

        if !known.contains(&self.main_sequence) {
            return Err(BuildError::DanglingReference {
                name: self.main_sequence.clone(),
                referenced_by: "configuration".to_string(),
            });
        }
        Ok(())
    }

    /// Destroy every static sequence and drop all definitions
    pub fn destroy(&self) {
        let count = self.sequences.len();
        for entry in self.sequences.iter() {
            entry.value().destroy();
        }
        self.sequences.clear();
        self.dynamic_sequences.clear();
        self.local_entries.clear();
        info!(sequences = count, "Configuration destroyed");
    }
}
