//! Localized messages for reliable messaging faults.
//!
//! A [`MessageCatalog`] is handed to the components that report faults; there
//! is no process-wide bundle. Templates use positional `{0}`, `{1}` markers.

use std::collections::HashMap;

pub mod keys {
    pub const CREATE_SEQUENCE_REFUSED: &str = "create_sequence_refused";
    pub const RM_DISABLED_FOR_SERVICE: &str = "rm_disabled_for_service";
    pub const UNKNOWN_SEQUENCE: &str = "unknown_sequence";
    pub const SEQUENCE_TERMINATING: &str = "sequence_terminating";
    pub const PROCESSING_FAILED: &str = "processing_failed";
    pub const INVALID_MESSAGE_NUMBER: &str = "invalid_message_number";
    pub const DELIVERY_FAILED: &str = "delivery_failed";
    pub const NO_RELIABLE_SENDER: &str = "no_reliable_sender";
}

#[derive(Debug, Clone)]
pub struct MessageCatalog {
    templates: HashMap<String, String>,
}

impl Default for MessageCatalog {
    fn default() -> Self {
        let mut templates = HashMap::new();
        for (key, template) in [
            (keys::CREATE_SEQUENCE_REFUSED, "CreateSequence refused: {0}"),
            (
                keys::RM_DISABLED_FOR_SERVICE,
                "Reliable messaging is not enabled for service '{0}'",
            ),
            (keys::UNKNOWN_SEQUENCE, "The sequence '{0}' is not known"),
            (
                keys::SEQUENCE_TERMINATING,
                "Sequence '{0}' is terminating and accepts no new messages",
            ),
            (
                keys::PROCESSING_FAILED,
                "Reliable message processing failed: {0}",
            ),
            (keys::INVALID_MESSAGE_NUMBER, "Invalid message number {0} on sequence '{1}'"),
            (
                keys::DELIVERY_FAILED,
                "Message {0} of sequence '{1}' could not be delivered",
            ),
            (
                keys::NO_RELIABLE_SENDER,
                "No reliable sender is attached to handle '{0}'",
            ),
        ] {
            templates.insert(key.to_string(), template.to_string());
        }
        Self { templates }
    }
}

impl MessageCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override or add a template
    pub fn with_message(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
        self.templates.insert(key.into(), template.into());
        self
    }

    /// Render `key` with positional `args`; unknown keys render the key itself
    pub fn format(&self, key: &str, args: &[&str]) -> String {
        let Some(template) = self.templates.get(key) else {
            return if args.is_empty() {
                key.to_string()
            } else {
                format!("{key}: {}", args.join(", "))
            };
        };

        args.iter()
            .enumerate()
            .fold(template.clone(), |text, (index, arg)| {
                text.replace(&format!("{{{index}}}"), arg)
            })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.templates.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_arguments() {
        let catalog = MessageCatalog::new();
        assert_eq!(
            catalog.format(keys::INVALID_MESSAGE_NUMBER, &["0", "urn:uuid:s1"]),
            "Invalid message number 0 on sequence 'urn:uuid:s1'"
        );
    }

    #[test]
    fn test_override_and_unknown_keys() {
        let catalog = MessageCatalog::new().with_message(keys::UNKNOWN_SEQUENCE, "Séquence inconnue: {0}");
        assert_eq!(catalog.format(keys::UNKNOWN_SEQUENCE, &["s1"]), "Séquence inconnue: s1");
        assert_eq!(catalog.format("missing", &["a"]), "missing: a");
    }
}
