//! The self-description an extension publishes at load time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::events;

/// Identity and event map of one extension.
///
/// The wire form is the JSON object returned by the extension's `Register` export:
///
/// ```json
/// { "pluginname": "call-logger", "option": { "EXTERNALINFOSTART": "OnCallStart" } }
/// ```
///
/// Each key of `option` is an event name and each value the exported symbol handling it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionDescriptor {
    /// Unique name of the extension. Also the stem of its data log file.
    #[serde(rename = "pluginname")]
    pub name: String,
    /// Event name to handler symbol.
    #[serde(rename = "option", default)]
    pub event_map: BTreeMap<String, String>,
}

impl ExtensionDescriptor {
    /// Creates a descriptor from a name and `(event, handler symbol)` pairs.
    pub fn new<I, E, H>(name: impl Into<String>, events: I) -> Self
    where
        I: IntoIterator<Item = (E, H)>,
        E: Into<String>,
        H: Into<String>,
    {
        Self {
            name: name.into(),
            event_map: events.into_iter().map(|(e, h)| (e.into(), h.into())).collect(),
        }
    }

    /// Decodes and validates the bytes returned by an extension's `Register` export.
    pub fn decode(bytes: &[u8]) -> Result<Self, DescriptorError> {
        let descriptor: Self = serde_json::from_slice(bytes)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Encodes the descriptor into its wire form.
    pub fn encode(&self) -> Vec<u8> {
        // serializing a string map cannot fail
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Checks the structural rules every descriptor must satisfy.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.name.is_empty() {
            return Err(DescriptorError::EmptyName);
        }
        if self.name.chars().any(|c| matches!(c, '/' | '\\' | '\0')) || self.name == ".." {
            return Err(DescriptorError::InvalidName(self.name.clone()));
        }
        for (event, symbol) in &self.event_map {
            if event.is_empty() {
                return Err(DescriptorError::EmptyEvent);
            }
            if symbol.is_empty() {
                return Err(DescriptorError::EmptySymbol { event: event.clone() });
            }
            if !events::is_known(event) {
                tracing::debug!(target: "evm_plugin::descriptor", extension = %self.name, %event, "descriptor declares a custom event");
            }
        }
        Ok(())
    }

    /// Number of events the extension declares.
    pub fn len(&self) -> usize {
        self.event_map.len()
    }

    /// Whether the extension declares no event at all.
    pub fn is_empty(&self) -> bool {
        self.event_map.is_empty()
    }

    /// Iterates over the declared event names.
    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.event_map.keys().map(String::as_str)
    }

    /// Handler symbol declared for `event`.
    pub fn handler_symbol(&self, event: &str) -> Option<&str> {
        self.event_map.get(event).map(String::as_str)
    }
}

/// Errors decoding or validating an [`ExtensionDescriptor`].
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    /// The bytes are not a valid descriptor object.
    #[error("malformed descriptor: {0}")]
    Malformed(#[from] serde_json::Error),
    /// `pluginname` is empty.
    #[error("descriptor has an empty plugin name")]
    EmptyName,
    /// `pluginname` cannot be used as a log file stem.
    #[error("plugin name {0:?} is not a valid file stem")]
    InvalidName(String),
    /// An event key is empty.
    #[error("descriptor declares an empty event name")]
    EmptyEvent,
    /// A handler symbol is empty.
    #[error("event {event} is bound to an empty handler symbol")]
    EmptySymbol {
        /// The event with the empty symbol.
        event: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_wire_form() {
        let raw = br#"{"pluginname":"watcher","option":{"TXSTART":"OnTx","handle_BLOCK_INFO":"OnBlock"}}"#;
        let descriptor = ExtensionDescriptor::decode(raw).unwrap();
        assert_eq!(descriptor.name, "watcher");
        assert_eq!(descriptor.len(), 2);
        assert_eq!(descriptor.handler_symbol("TXSTART"), Some("OnTx"));
        assert_eq!(descriptor.handler_symbol("handle_BLOCK_INFO"), Some("OnBlock"));
    }

    #[test]
    fn test_missing_option_is_empty_map() {
        let descriptor = ExtensionDescriptor::decode(br#"{"pluginname":"idle"}"#).unwrap();
        assert!(descriptor.is_empty());
    }

    #[test]
    fn test_rejects_invalid_descriptors() {
        assert!(matches!(
            ExtensionDescriptor::decode(b"not json"),
            Err(DescriptorError::Malformed(_))
        ));
        assert!(matches!(
            ExtensionDescriptor::decode(br#"{"option":{}}"#),
            Err(DescriptorError::Malformed(_))
        ));
        assert!(matches!(
            ExtensionDescriptor::decode(br#"{"pluginname":"","option":{}}"#),
            Err(DescriptorError::EmptyName)
        ));
        assert!(matches!(
            ExtensionDescriptor::decode(br#"{"pluginname":"../x","option":{}}"#),
            Err(DescriptorError::InvalidName(_))
        ));
        assert!(matches!(
            ExtensionDescriptor::decode(br#"{"pluginname":"a","option":{"":"H"}}"#),
            Err(DescriptorError::EmptyEvent)
        ));
        assert!(matches!(
            ExtensionDescriptor::decode(br#"{"pluginname":"a","option":{"TXEND":""}}"#),
            Err(DescriptorError::EmptySymbol { .. })
        ));
    }

    #[test]
    fn test_encode_decode_preserves_contract() {
        let descriptor = ExtensionDescriptor::new("a", [("TXEND", "OnEnd")]);
        assert_eq!(ExtensionDescriptor::decode(&descriptor.encode()).unwrap(), descriptor);
    }
}
