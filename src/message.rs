//! Messages received from a queue and the outcome of processing them.

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::ListenerExecutionError;

/// System attribute carrying the FIFO message group.
pub const MESSAGE_GROUP_ID: &str = "MessageGroupId";
/// System attribute carrying the FIFO deduplication id.
pub const MESSAGE_DEDUPLICATION_ID: &str = "MessageDeduplicationId";

/// A message as delivered by the backend.
///
/// Messages are immutable once received. The pipeline shares them as
/// `Arc<InboundMessage>`, so every stage observes the very same instance that
/// the poller dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    id: String,
    body: String,
    receipt_handle: String,
    group_id: Option<String>,
    deduplication_id: Option<String>,
    attributes: HashMap<String, String>,
}

impl InboundMessage {
    pub fn builder(id: impl Into<String>, receipt_handle: impl Into<String>) -> InboundMessageBuilder {
        InboundMessageBuilder {
            message: InboundMessage {
                id: id.into(),
                body: String::new(),
                receipt_handle: receipt_handle.into(),
                group_id: None,
                deduplication_id: None,
                attributes: HashMap::new(),
            },
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Token identifying this particular delivery, used to delete the message
    /// or change its visibility.
    pub fn receipt_handle(&self) -> &str {
        &self.receipt_handle
    }

    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    pub fn deduplication_id(&self) -> Option<&str> {
        self.deduplication_id.as_deref()
    }

    /// System attributes and string-valued message attributes.
    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Builder for [`InboundMessage`], used by backend adapters.
#[derive(Debug)]
pub struct InboundMessageBuilder {
    message: InboundMessage,
}

impl InboundMessageBuilder {
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.message.body = body.into();
        self
    }

    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.message.group_id = Some(group_id.into());
        self
    }

    pub fn deduplication_id(mut self, deduplication_id: impl Into<String>) -> Self {
        self.message.deduplication_id = Some(deduplication_id.into());
        self
    }

    /// Adds an attribute. The FIFO group and deduplication attributes also
    /// populate the dedicated fields.
    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match name.as_str() {
            MESSAGE_GROUP_ID => self.message.group_id = Some(value.clone()),
            MESSAGE_DEDUPLICATION_ID => self.message.deduplication_id = Some(value.clone()),
            _ => {}
        }
        self.message.attributes.insert(name, value);
        self
    }

    pub fn build(self) -> InboundMessage {
        self.message
    }
}

/// Result of pushing a processing unit through one or more pipeline stages.
#[derive(Debug)]
pub enum Outcome {
    Success(Vec<Arc<InboundMessage>>),
    Failure(ListenerExecutionError),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// The messages of the unit, whichever way it went.
    pub fn messages(&self) -> &[Arc<InboundMessage>] {
        match self {
            Outcome::Success(messages) => messages,
            Outcome::Failure(error) => error.messages(),
        }
    }

    pub fn error(&self) -> Option<&ListenerExecutionError> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(error) => Some(error),
        }
    }
}

impl From<Result<Vec<Arc<InboundMessage>>, ListenerExecutionError>> for Outcome {
    fn from(result: Result<Vec<Arc<InboundMessage>>, ListenerExecutionError>) -> Self {
        match result {
            Ok(messages) => Outcome::Success(messages),
            Err(error) => Outcome::Failure(error),
        }
    }
}
