use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::message::InboundMessage;

/// Boxed error returned by listeners, error handlers and backend adapters.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error types for listener container operations.
///
/// Only configuration, lifecycle and queue resolution problems surface here.
/// Polling and acknowledgement failures are logged and retried inside the
/// container, and listener failures travel through the pipeline as
/// [`ListenerExecutionError`].
#[derive(Debug, Error)]
pub enum ListenerContainerError {
    /// A mandatory collaborator is missing or an option is out of range.
    #[error("invalid listener container configuration: {0}")]
    Configuration(String),

    /// The requested lifecycle operation is not allowed in the current state.
    #[error("cannot {operation} a listener container that is {state}")]
    IllegalState {
        operation: &'static str,
        state: &'static str,
    },

    /// The queue name was never registered with the container.
    #[error("queue {0} is not registered with this container")]
    UnknownQueue(String),

    #[error(transparent)]
    QueueResolution(#[from] QueueResolutionError),
}

/// Failure to resolve the URL or the attributes of a queue.
///
/// The backend error is kept as the source so the original cause can be
/// inspected when container initialization fails.
#[derive(Debug, Error)]
#[error("failed to resolve attributes for queue {queue}")]
pub struct QueueResolutionError {
    queue: String,
    #[source]
    source: BackendError,
}

impl QueueResolutionError {
    pub fn new(queue: impl Into<String>, source: BackendError) -> Self {
        QueueResolutionError {
            queue: queue.into(),
            source,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn backend_error(&self) -> &BackendError {
        &self.source
    }
}

/// Errors reported by a [`QueueClient`](crate::client::QueueClient).
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend has no queue with this name.
    #[error("queue {0} does not exist")]
    QueueDoesNotExist(String),

    /// Any other failure of a backend call.
    #[error("{operation} failed: {source}")]
    Service {
        operation: &'static str,
        #[source]
        source: BoxError,
    },
}

impl BackendError {
    pub fn service(operation: &'static str, source: impl Into<BoxError>) -> Self {
        BackendError::Service {
            operation,
            source: source.into(),
        }
    }

    pub fn is_queue_does_not_exist(&self) -> bool {
        matches!(self, BackendError::QueueDoesNotExist(_))
    }
}

/// A failed processing unit.
///
/// Always carries the exact messages that were being processed so that the
/// error handler, the acknowledgement handler and the after-processing
/// interceptors can act on them no matter which stage failed.
#[derive(Error)]
#[error("listener failed to process {} message(s): {cause}", .messages.len())]
pub struct ListenerExecutionError {
    messages: Vec<Arc<InboundMessage>>,
    #[source]
    cause: BoxError,
}

impl ListenerExecutionError {
    pub fn new(messages: Vec<Arc<InboundMessage>>, cause: impl Into<BoxError>) -> Self {
        ListenerExecutionError {
            messages,
            cause: cause.into(),
        }
    }

    /// Normalizes an arbitrary error into an execution error for `messages`.
    ///
    /// A nested `ListenerExecutionError` is unwrapped to its cause; the result
    /// always carries `messages`, never the messages of the nested error.
    pub fn wrap(messages: Vec<Arc<InboundMessage>>, error: BoxError) -> Self {
        match error.downcast::<ListenerExecutionError>() {
            Ok(execution_error) => ListenerExecutionError::new(messages, execution_error.cause),
            Err(cause) => ListenerExecutionError::new(messages, cause),
        }
    }

    pub fn messages(&self) -> &[Arc<InboundMessage>] {
        &self.messages
    }

    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.cause.as_ref()
    }

    pub fn into_parts(self) -> (Vec<Arc<InboundMessage>>, BoxError) {
        (self.messages, self.cause)
    }
}

impl fmt::Debug for ListenerExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<&str> = self.messages.iter().map(|m| m.id()).collect();
        f.debug_struct("ListenerExecutionError")
            .field("message_ids", &ids)
            .field("cause", &self.cause)
            .finish()
    }
}

/// Raised when a before-processing interceptor returns no messages.
#[derive(Debug, Error)]
#[error("interceptor {0} returned no messages")]
pub struct InterceptorReturnedNothing(pub &'static str);

/// Raised when a listener panics while processing a unit.
#[derive(Debug, Error)]
#[error("listener panicked: {0}")]
pub struct ListenerPanicked(pub String);
