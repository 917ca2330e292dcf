//! Message / Batch - the unit of dispatch
//!
//! A batch is an ordered sequence of messages. Interpolation indexes into it by
//! position, so order is preserved end-to-end.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;

use crate::ContractError;

/// A single in-flight message
///
/// Holds the raw payload, an optional decoded structured value, string
/// metadata and an optional item error.
#[derive(Debug, Clone, Default)]
pub struct Message {
    /// Raw payload (always current, even after `set_structured`)
    content: Bytes,

    /// Cached structured view of the payload
    structured: Option<Value>,

    /// Per-message metadata
    metadata: BTreeMap<String, String>,

    /// Failure attached to this message without aborting the batch
    error: Option<Arc<ContractError>>,
}

impl Message {
    /// Create a message from raw bytes
    pub fn new(content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// Create a message from a structured value
    pub fn from_structured(value: Value) -> Self {
        let mut msg = Self::default();
        msg.set_structured(value);
        msg
    }

    /// Builder-style metadata setter
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Raw payload
    pub fn as_bytes(&self) -> &Bytes {
        &self.content
    }

    /// Structured view of the payload, parsing it as JSON if needed
    ///
    /// # Errors
    /// Returns a resolution error if the payload is not valid JSON
    pub fn as_structured(&self) -> Result<Value, ContractError> {
        if let Some(value) = &self.structured {
            return Ok(value.clone());
        }
        serde_json::from_slice(&self.content)
            .map_err(|e| ContractError::resolution(format!("message is not valid JSON: {e}")))
    }

    /// Replace the payload with raw bytes
    pub fn set_bytes(&mut self, content: impl Into<Bytes>) {
        self.content = content.into();
        self.structured = None;
    }

    /// Replace the payload with a structured value
    pub fn set_structured(&mut self, value: Value) {
        self.content = Bytes::from(value.to_string());
        self.structured = Some(value);
    }

    /// Get a metadata value
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Set a metadata value
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Iterate all metadata
    pub fn metadata_iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.metadata.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Item error, if any
    pub fn error(&self) -> Option<&ContractError> {
        self.error.as_deref()
    }

    /// Attach an item error
    pub fn set_error(&mut self, error: ContractError) {
        self.error = Some(Arc::new(error));
    }

    /// Remove the item error
    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// Whether an item error is attached
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Ordered group of messages dispatched together
#[derive(Debug, Clone, Default)]
pub struct Batch {
    messages: Vec<Message>,
}

impl Batch {
    /// Create a batch from messages
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the batch is empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Message at index
    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    /// Mutable message at index
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Message> {
        self.messages.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Message> {
        self.messages.iter_mut()
    }

    /// Indices of messages carrying an item error
    pub fn errored_indices(&self) -> Vec<usize> {
        self.messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.has_error())
            .map(|(i, _)| i)
            .collect()
    }

    /// Consume into the underlying messages
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

impl From<Vec<Message>> for Batch {
    fn from(messages: Vec<Message>) -> Self {
        Self::new(messages)
    }
}

impl FromIterator<Message> for Batch {
    fn from_iter<I: IntoIterator<Item = Message>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl IntoIterator for Batch {
    type Item = Message;
    type IntoIter = std::vec::IntoIter<Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_structured_keeps_bytes_in_sync() {
        let mut msg = Message::new("old");
        msg.set_structured(json!({"a": 1}));
        assert_eq!(msg.as_bytes().as_ref(), br#"{"a":1}"#);
        assert_eq!(msg.as_structured().unwrap(), json!({"a": 1}));

        msg.set_bytes("7");
        assert_eq!(msg.as_structured().unwrap(), json!(7));
    }

    #[test]
    fn test_as_structured_rejects_non_json() {
        let msg = Message::new("not json");
        assert!(matches!(
            msg.as_structured(),
            Err(ContractError::Resolution { .. })
        ));
    }

    #[test]
    fn test_errored_indices() {
        let mut batch: Batch = (0..4).map(|i| Message::new(i.to_string())).collect();
        batch.get_mut(1).unwrap().set_error(ContractError::Cancelled);
        batch.get_mut(3).unwrap().set_error(ContractError::Cancelled);

        assert_eq!(batch.errored_indices(), vec![1, 3]);
        assert_eq!(batch.len(), 4);
    }

    #[test]
    fn test_metadata() {
        let msg = Message::new("x").with_metadata("kafka_key", "k1");
        assert_eq!(msg.metadata("kafka_key"), Some("k1"));
        assert_eq!(msg.metadata("missing"), None);
    }
}
