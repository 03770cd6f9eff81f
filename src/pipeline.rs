//! The staged processing of received messages.
//!
//! A [`MessageProcessingPipeline`] runs every processing unit (one message,
//! or one batch in batch mode) through a fixed sequence of stages:
//!
//! 1. before-processing interceptors, in registration order
//! 2. listener invocation
//! 3. error handler, for failed units only
//! 4. acknowledgement handler, which applies the [`DeletionPolicy`]
//! 5. after-processing interceptors, in registration order
//!
//! Each stage only starts once the previous one has finished for that unit.
//! Whatever stage fails, later stages can still reach the unit's messages
//! through the [`ListenerExecutionError`](crate::errors::ListenerExecutionError).

use std::sync::Arc;

use crate::message::{InboundMessage, Outcome};

mod acknowledgement;
mod context;
mod error_handler;
mod interceptor;
mod listener;
mod stages;

pub use acknowledgement::{
    AcknowledgementAction, AcknowledgementHandler, DeletionPolicy, DeletionPolicyAcknowledgementHandler,
};
pub use context::{Acknowledgement, Extensions, ProcessingContext, Visibility};
pub use error_handler::{ErrorHandler, LoggingErrorHandler};
pub use interceptor::{MessageInterceptor, VisibilityExtensionInterceptor};
pub use listener::{
    AckListenerFn, BatchMessageListener, Listener, ListenerFn, MessageListener, listener_fn, listener_fn_with_ack,
};
pub use stages::MessageProcessingStage;

use stages::{
    AcknowledgementHandlerStage, AfterProcessingInterceptorStage, BeforeProcessingInterceptorStage,
    ErrorHandlerStage, ListenerInvocationStage,
};

/// Ordered stages shared by every queue of one listener registration.
pub struct MessageProcessingPipeline {
    stages: Vec<Box<dyn MessageProcessingStage>>,
    batch: bool,
}

impl MessageProcessingPipeline {
    pub fn builder(listener: Listener) -> MessageProcessingPipelineBuilder {
        MessageProcessingPipelineBuilder {
            listener,
            interceptors: Vec::new(),
            error_handler: Arc::new(LoggingErrorHandler),
            acknowledgement_handler: Arc::new(DeletionPolicyAcknowledgementHandler::new(DeletionPolicy::default())),
        }
    }

    /// Whether a unit is a whole receive batch rather than a single message.
    pub fn is_batch(&self) -> bool {
        self.batch
    }

    /// Runs one unit through every stage and returns its final outcome.
    pub async fn process(&self, messages: Vec<Arc<InboundMessage>>, context: &mut ProcessingContext) -> Outcome {
        let mut outcome = Outcome::Success(messages);
        for stage in &self.stages {
            outcome = stage.process(outcome, context).await;
        }
        outcome
    }
}

/// Builder for [`MessageProcessingPipeline`].
pub struct MessageProcessingPipelineBuilder {
    listener: Listener,
    interceptors: Vec<Arc<dyn MessageInterceptor>>,
    error_handler: Arc<dyn ErrorHandler>,
    acknowledgement_handler: Arc<dyn AcknowledgementHandler>,
}

impl MessageProcessingPipelineBuilder {
    pub fn interceptor(mut self, interceptor: Arc<dyn MessageInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn interceptors(mut self, interceptors: impl IntoIterator<Item = Arc<dyn MessageInterceptor>>) -> Self {
        self.interceptors.extend(interceptors);
        self
    }

    /// Replaces the default [`LoggingErrorHandler`].
    pub fn error_handler(mut self, error_handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = error_handler;
        self
    }

    pub fn acknowledgement_handler(mut self, acknowledgement_handler: Arc<dyn AcknowledgementHandler>) -> Self {
        self.acknowledgement_handler = acknowledgement_handler;
        self
    }

    /// Shorthand for a [`DeletionPolicyAcknowledgementHandler`].
    pub fn deletion_policy(self, policy: DeletionPolicy) -> Self {
        self.acknowledgement_handler(Arc::new(DeletionPolicyAcknowledgementHandler::new(policy)))
    }

    pub fn build(self) -> MessageProcessingPipeline {
        let batch = self.listener.is_batch();
        let stages: Vec<Box<dyn MessageProcessingStage>> = vec![
            Box::new(BeforeProcessingInterceptorStage::new(self.interceptors.clone())),
            Box::new(ListenerInvocationStage::new(self.listener)),
            Box::new(ErrorHandlerStage::new(self.error_handler)),
            Box::new(AcknowledgementHandlerStage::new(self.acknowledgement_handler)),
            Box::new(AfterProcessingInterceptorStage::new(self.interceptors)),
        ];

        MessageProcessingPipeline { stages, batch }
    }
}
