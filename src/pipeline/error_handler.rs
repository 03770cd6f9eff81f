use async_trait::async_trait;

use crate::errors::{BoxError, ListenerExecutionError};
use crate::pipeline::context::ProcessingContext;

/// Recovery hook for failed processing units.
///
/// Returning `Ok(())` recovers the unit: the acknowledgement handler then
/// treats it as a success. Returning an error keeps the unit failed; the
/// pipeline normalizes that error into a [`ListenerExecutionError`] that
/// still carries the unit's messages.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle(&self, error: ListenerExecutionError, context: &ProcessingContext) -> Result<(), BoxError>;
}

/// Logs the failure and keeps the unit failed.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingErrorHandler;

#[async_trait]
impl ErrorHandler for LoggingErrorHandler {
    async fn handle(&self, error: ListenerExecutionError, context: &ProcessingContext) -> Result<(), BoxError> {
        let message_ids: Vec<&str> = error.messages().iter().map(|m| m.id()).collect();
        tracing::error!(
            queue = %context.queue().name(),
            ?message_ids,
            error = %error.cause(),
            "listener failed to process messages"
        );
        Err(Box::new(error))
    }
}
