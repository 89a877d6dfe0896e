use super::addressing::EndpointReference;
use super::properties::GlobalProperties;
use crate::constants::properties::{MESSAGE_SEQUENCE, MESSAGE_SEQUENCE_DELIMITER};
use crate::mediators::SequenceMediator;
use crate::rm::headers::RmHeader;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// Continuation executed when a mediator raises a fault
#[derive(Debug, Clone)]
pub enum FaultHandler {
    /// Sequence looked up by name when the fault occurs
    Named(String),
    /// Sequence instance owned by the handler
    Inline(Arc<SequenceMediator>),
}

impl FaultHandler {
    pub fn describe(&self) -> String {
        match self {
            Self::Named(name) => name.clone(),
            Self::Inline(sequence) => sequence
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| "anonymous".to_string()),
        }
    }
}

/// A message travelling through the mediation pipeline
///
/// Owned exclusively by the pipeline for the duration of one traversal. Fan-out
/// mediators use [`MessageContext::clone_for_fanout`] which deep-copies the
/// payload but shares property values.
#[derive(Debug, Clone)]
pub struct MessageContext {
    message_id: String,
    /// Structured message body
    pub payload: Value,
    /// SOAP-style headers keyed by qualified name
    pub headers: BTreeMap<String, Value>,
    pub to: Option<EndpointReference>,
    pub from: Option<EndpointReference>,
    pub reply_to: Option<EndpointReference>,
    pub fault_to: Option<EndpointReference>,
    pub action: Option<String>,
    pub relates_to: Option<String>,
    /// Application supplied key grouping related messages
    pub correlation_key: Option<String>,
    /// Reliable messaging protocol header, if the message carries one
    pub rm_header: Option<RmHeader>,
    properties: HashMap<String, Arc<Value>>,
    global_properties: Option<GlobalProperties>,
    response: bool,
    fault: bool,
    fault_stack: Vec<FaultHandler>,
    paused: bool,
    created_at: DateTime<Utc>,
}

impl MessageContext {
    /// Create a request context with a fresh message id
    pub fn new(payload: Value) -> Self {
        Self {
            message_id: format!("urn:uuid:{}", Uuid::new_v4()),
            payload,
            headers: BTreeMap::new(),
            to: None,
            from: None,
            reply_to: None,
            fault_to: None,
            action: None,
            relates_to: None,
            correlation_key: None,
            rm_header: None,
            properties: HashMap::new(),
            global_properties: None,
            response: false,
            fault: false,
            fault_stack: Vec::new(),
            paused: false,
            created_at: Utc::now(),
        }
    }

    /// Attach the configuration-level property store used for fallback lookups
    pub fn with_global_properties(mut self, global: GlobalProperties) -> Self {
        self.global_properties = Some(global);
        self
    }

    pub fn with_to(mut self, to: impl Into<EndpointReference>) -> Self {
        self.to = Some(to.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<EndpointReference>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_property(key, value);
        self
    }

    pub fn with_rm_header(mut self, header: RmHeader) -> Self {
        self.rm_header = Some(header);
        self
    }

    pub fn as_response(mut self) -> Self {
        self.response = true;
        self
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn set_message_id(&mut self, message_id: impl Into<String>) {
        self.message_id = message_id.into();
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn global_properties(&self) -> Option<&GlobalProperties> {
        self.global_properties.as_ref()
    }

    /// Look up a property locally, then in the shared configuration store
    pub fn get_property(&self, key: &str) -> Option<Arc<Value>> {
        self.properties
            .get(key)
            .cloned()
            .or_else(|| self.global_properties.as_ref()?.get(key))
    }

    /// Property rendered as a string; JSON strings are unquoted
    pub fn get_property_string(&self, key: &str) -> Option<String> {
        self.get_property(key).map(|value| match value.as_ref() {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(key.into(), Arc::new(value.into()));
    }

    /// Store an already shared value without copying it
    pub fn set_shared_property(&mut self, key: impl Into<String>, value: Arc<Value>) {
        self.properties.insert(key.into(), value);
    }

    /// Remove a local property; the shared store is never modified
    pub fn remove_property(&mut self, key: &str) -> Option<Arc<Value>> {
        self.properties.remove(key)
    }

    pub fn has_local_property(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    pub fn local_property_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.properties.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn is_response(&self) -> bool {
        self.response
    }

    pub fn set_response(&mut self, response: bool) {
        self.response = response;
    }

    pub fn is_fault(&self) -> bool {
        self.fault
    }

    pub fn set_fault(&mut self, fault: bool) {
        self.fault = fault;
    }

    /// Position of this message within a split group as `(index, total)`
    pub fn message_sequence(&self) -> Option<(usize, usize)> {
        self.message_sequence_of(MESSAGE_SEQUENCE)
    }

    pub fn set_message_sequence(&mut self, index: usize, total: usize) {
        self.set_message_sequence_of(MESSAGE_SEQUENCE, index, total);
    }

    /// Split position stored under an arbitrary property (id-scoped splitters)
    pub fn message_sequence_of(&self, property: &str) -> Option<(usize, usize)> {
        let raw = self.get_property_string(property)?;
        let (index, total) = raw.split_once(MESSAGE_SEQUENCE_DELIMITER)?;
        Some((index.trim().parse().ok()?, total.trim().parse().ok()?))
    }

    pub fn set_message_sequence_of(&mut self, property: &str, index: usize, total: usize) {
        self.set_property(
            property,
            format!("{index}{MESSAGE_SEQUENCE_DELIMITER}{total}"),
        );
    }

    /// Copy for fan-out: new id, deep-copied payload, shared property values
    pub fn clone_for_fanout(&self) -> Self {
        let mut copy = self.clone();
        copy.message_id = format!("urn:uuid:{}", Uuid::new_v4());
        copy.paused = false;
        copy.created_at = Utc::now();
        copy
    }

    pub fn push_fault_handler(&mut self, handler: FaultHandler) {
        self.fault_stack.push(handler);
    }

    pub fn pop_fault_handler(&mut self) -> Option<FaultHandler> {
        self.fault_stack.pop()
    }

    pub fn fault_stack_depth(&self) -> usize {
        self.fault_stack.len()
    }

    /// Stop the message from being forwarded any further
    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Service addressed by this message (last segment of the `to` address)
    pub fn service_name(&self) -> Option<&str> {
        self.to.as_ref().map(EndpointReference::service_name)
    }
}

impl Default for MessageContext {
    fn default() -> Self {
        Self::new(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_property_lookup_falls_back_to_global_store() {
        let global = GlobalProperties::new();
        global.set("timeout", json!(30));
        global.set("region", json!("eu"));

        let mut ctx = MessageContext::new(json!({})).with_global_properties(global.clone());
        ctx.set_property("region", json!("us"));

        assert_eq!(*ctx.get_property("region").unwrap(), json!("us"));
        assert_eq!(*ctx.get_property("timeout").unwrap(), json!(30));
        assert!(ctx.get_property("missing").is_none());

        ctx.remove_property("region");
        assert_eq!(*ctx.get_property("region").unwrap(), json!("eu"));
        assert!(global.contains("region"));
    }

    #[test]
    fn test_fanout_copy_shares_properties_but_not_payload() {
        let mut ctx = MessageContext::new(json!({"order": {"id": 1}}));
        ctx.set_property("big", json!({"blob": [1, 2, 3]}));

        let mut copy = ctx.clone_for_fanout();
        assert_ne!(copy.message_id(), ctx.message_id());

        copy.payload["order"]["id"] = json!(2);
        assert_eq!(ctx.payload["order"]["id"], json!(1));

        let original = ctx.get_property("big").unwrap();
        let shared = copy.get_property("big").unwrap();
        assert!(Arc::ptr_eq(&original, &shared));
    }

    #[test]
    fn test_message_sequence_round_trip() {
        let mut ctx = MessageContext::default();
        assert_eq!(ctx.message_sequence(), None);

        ctx.set_message_sequence(2, 5);
        assert_eq!(ctx.message_sequence(), Some((2, 5)));

        ctx.set_property(MESSAGE_SEQUENCE, "garbage");
        assert_eq!(ctx.message_sequence(), None);
    }

    #[test]
    fn test_fault_stack_is_lifo() {
        let mut ctx = MessageContext::default();
        ctx.push_fault_handler(FaultHandler::Named("outer".to_string()));
        ctx.push_fault_handler(FaultHandler::Named("inner".to_string()));

        assert_eq!(ctx.fault_stack_depth(), 2);
        assert_eq!(ctx.pop_fault_handler().unwrap().describe(), "inner");
        assert_eq!(ctx.pop_fault_handler().unwrap().describe(), "outer");
        assert!(ctx.pop_fault_handler().is_none());
    }
}
