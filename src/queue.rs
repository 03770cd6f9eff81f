//! Resolution of the immutable per-queue facts a poller and its pipeline need.

use std::collections::HashMap;
use std::sync::Arc;

use crate::client::QueueClient;
use crate::errors::{BackendError, QueueResolutionError};

/// Queue attribute holding the dead-letter configuration.
pub const REDRIVE_POLICY: &str = "RedrivePolicy";
/// Queue attribute marking a FIFO queue.
pub const FIFO_QUEUE: &str = "FifoQueue";

const FIFO_SUFFIX: &str = ".fifo";

/// What to do when a registered queue does not exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueueNotFoundStrategy {
    /// Report the backend error and fail initialization.
    #[default]
    Fail,
    /// Create the queue and carry on.
    Create,
}

/// Resolved facts about one queue.
///
/// Created once per queue when the container initializes and shared
/// read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueAttributes {
    name: String,
    url: String,
    has_redrive_policy: bool,
    is_fifo: bool,
    attributes: HashMap<String, String>,
}

impl QueueAttributes {
    pub fn new(name: impl Into<String>, url: impl Into<String>, attributes: HashMap<String, String>) -> Self {
        let name = name.into();
        let has_redrive_policy = attributes
            .get(REDRIVE_POLICY)
            .is_some_and(|policy| !policy.trim().is_empty());
        let is_fifo = is_fifo_name(&name)
            || attributes
                .get(FIFO_QUEUE)
                .is_some_and(|value| value.eq_ignore_ascii_case("true"));

        QueueAttributes {
            name,
            url: url.into(),
            has_redrive_policy,
            is_fifo,
            attributes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn has_redrive_policy(&self) -> bool {
        self.has_redrive_policy
    }

    pub fn is_fifo(&self) -> bool {
        self.is_fifo
    }

    /// Attribute values fetched at resolution time.
    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Turns a registered queue name or URL into [`QueueAttributes`].
pub struct QueueAttributesResolver {
    client: Arc<dyn QueueClient>,
    not_found_strategy: QueueNotFoundStrategy,
    attribute_names: Vec<String>,
}

impl QueueAttributesResolver {
    pub fn new(client: Arc<dyn QueueClient>, not_found_strategy: QueueNotFoundStrategy) -> Self {
        QueueAttributesResolver {
            client,
            not_found_strategy,
            attribute_names: Vec::new(),
        }
    }

    /// Extra attributes to fetch next to the redrive policy.
    pub fn with_attribute_names(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.attribute_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub async fn resolve(&self, queue: &str) -> Result<QueueAttributes, QueueResolutionError> {
        let name = queue_name_of(queue).to_string();
        let url = self
            .resolve_url(queue, &name)
            .await
            .map_err(|err| QueueResolutionError::new(queue, err))?;

        let names = self.requested_attribute_names();
        let attributes = self
            .client
            .get_queue_attributes(&url, &names)
            .await
            .map_err(|err| QueueResolutionError::new(queue, err))?;

        tracing::debug!(queue = %name, url = %url, "resolved queue attributes");
        Ok(QueueAttributes::new(name, url, attributes))
    }

    async fn resolve_url(&self, queue: &str, name: &str) -> Result<String, BackendError> {
        if is_url(queue) {
            return Ok(queue.to_string());
        }

        match self.client.resolve_queue_url(name).await {
            Err(err) if err.is_queue_does_not_exist() && self.not_found_strategy == QueueNotFoundStrategy::Create => {
                tracing::info!(queue = %name, "queue not found, creating it");
                let mut attributes = HashMap::new();
                if is_fifo_name(name) {
                    attributes.insert(FIFO_QUEUE.to_string(), "true".to_string());
                }
                self.client.create_queue(name, attributes).await
            }
            other => other,
        }
    }

    fn requested_attribute_names(&self) -> Vec<String> {
        let mut names = vec![REDRIVE_POLICY.to_string()];
        for name in &self.attribute_names {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }
}

fn is_url(queue: &str) -> bool {
    queue.starts_with("https://") || queue.starts_with("http://")
}

fn is_fifo_name(name: &str) -> bool {
    name.ends_with(FIFO_SUFFIX)
}

/// The queue name of a registered queue, which may be given as a URL.
pub(crate) fn queue_name_of(queue: &str) -> &str {
    if is_url(queue) {
        queue.trim_end_matches('/').rsplit('/').next().unwrap_or(queue)
    } else {
        queue
    }
}
