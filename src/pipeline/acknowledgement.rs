use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::{BackendError, ListenerExecutionError};
use crate::message::InboundMessage;
use crate::pipeline::context::ProcessingContext;

/// When messages are deleted from the queue after processing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DeletionPolicy {
    /// Delete whatever the outcome.
    Always,
    /// Never delete automatically. The listener acknowledges explicitly.
    Never,
    /// Delete on success, and on failure only when the queue has no redrive
    /// policy to move the message to a dead-letter queue.
    #[default]
    NoRedrive,
    /// Delete on success only.
    OnSuccess,
}

impl fmt::Display for DeletionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeletionPolicy::Always => "ALWAYS",
            DeletionPolicy::Never => "NEVER",
            DeletionPolicy::NoRedrive => "NO_REDRIVE",
            DeletionPolicy::OnSuccess => "ON_SUCCESS",
        };
        f.write_str(name)
    }
}

/// What happens to a processed unit on the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcknowledgementAction {
    Delete,
    /// Leave the messages for redelivery or dead-lettering.
    Leave,
}

impl AcknowledgementAction {
    pub fn decide(policy: DeletionPolicy, succeeded: bool, has_redrive_policy: bool) -> Self {
        match (policy, succeeded) {
            (DeletionPolicy::Never, _) => AcknowledgementAction::Leave,
            (_, true) => AcknowledgementAction::Delete,
            (DeletionPolicy::Always, false) => AcknowledgementAction::Delete,
            (DeletionPolicy::NoRedrive, false) if !has_redrive_policy => AcknowledgementAction::Delete,
            (DeletionPolicy::NoRedrive, false) | (DeletionPolicy::OnSuccess, false) => AcknowledgementAction::Leave,
        }
    }
}

/// Reconciles the outcome of a unit with the backend.
///
/// Errors are reported to the pipeline, which logs them; they never change
/// the outcome of the unit.
#[async_trait]
pub trait AcknowledgementHandler: Send + Sync {
    async fn on_success(
        &self,
        messages: &[Arc<InboundMessage>],
        context: &ProcessingContext,
    ) -> Result<(), BackendError>;

    async fn on_error(
        &self,
        messages: &[Arc<InboundMessage>],
        error: &ListenerExecutionError,
        context: &ProcessingContext,
    ) -> Result<(), BackendError>;
}

/// Applies a [`DeletionPolicy`] using the unit's acknowledgement handle.
#[derive(Debug, Clone, Copy)]
pub struct DeletionPolicyAcknowledgementHandler {
    policy: DeletionPolicy,
}

impl DeletionPolicyAcknowledgementHandler {
    pub fn new(policy: DeletionPolicy) -> Self {
        DeletionPolicyAcknowledgementHandler { policy }
    }

    pub fn policy(&self) -> DeletionPolicy {
        self.policy
    }

    async fn apply(
        &self,
        action: AcknowledgementAction,
        messages: &[Arc<InboundMessage>],
        context: &ProcessingContext,
    ) -> Result<(), BackendError> {
        match action {
            AcknowledgementAction::Delete => {
                context.acknowledgement().acknowledge().await?;
                tracing::debug!(
                    queue = %context.queue().name(),
                    count = messages.len(),
                    "deleted processed messages"
                );
            }
            AcknowledgementAction::Leave => {}
        }
        Ok(())
    }
}

#[async_trait]
impl AcknowledgementHandler for DeletionPolicyAcknowledgementHandler {
    async fn on_success(
        &self,
        messages: &[Arc<InboundMessage>],
        context: &ProcessingContext,
    ) -> Result<(), BackendError> {
        let action = AcknowledgementAction::decide(self.policy, true, context.queue().has_redrive_policy());
        self.apply(action, messages, context).await
    }

    async fn on_error(
        &self,
        messages: &[Arc<InboundMessage>],
        error: &ListenerExecutionError,
        context: &ProcessingContext,
    ) -> Result<(), BackendError> {
        let action = AcknowledgementAction::decide(self.policy, false, context.queue().has_redrive_policy());
        if action == AcknowledgementAction::Leave && self.policy != DeletionPolicy::Never {
            tracing::warn!(
                queue = %context.queue().name(),
                policy = %self.policy,
                count = messages.len(),
                error = %error.cause(),
                "leaving failed messages on the queue"
            );
        }
        self.apply(action, messages, context).await
    }
}
