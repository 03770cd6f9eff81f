//! The fixed stages of a [`MessageProcessingPipeline`](super::MessageProcessingPipeline).
//!
//! Every stage receives the outcome of the previous one and returns the
//! outcome for the next. Stages that do not apply to the incoming outcome
//! pass it through untouched.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use crate::errors::{BoxError, InterceptorReturnedNothing, ListenerExecutionError, ListenerPanicked};
use crate::message::{InboundMessage, Outcome};
use crate::pipeline::acknowledgement::AcknowledgementHandler;
use crate::pipeline::context::{Acknowledgement, ProcessingContext};
use crate::pipeline::error_handler::ErrorHandler;
use crate::pipeline::interceptor::MessageInterceptor;
use crate::pipeline::listener::Listener;

/// One step of message processing.
#[async_trait]
pub trait MessageProcessingStage: Send + Sync {
    async fn process(&self, outcome: Outcome, context: &mut ProcessingContext) -> Outcome;
}

pub(crate) struct BeforeProcessingInterceptorStage {
    interceptors: Vec<Arc<dyn MessageInterceptor>>,
}

impl BeforeProcessingInterceptorStage {
    pub(crate) fn new(interceptors: Vec<Arc<dyn MessageInterceptor>>) -> Self {
        BeforeProcessingInterceptorStage { interceptors }
    }
}

#[async_trait]
impl MessageProcessingStage for BeforeProcessingInterceptorStage {
    async fn process(&self, outcome: Outcome, context: &mut ProcessingContext) -> Outcome {
        let Outcome::Success(mut messages) = outcome else {
            return outcome;
        };

        for interceptor in &self.interceptors {
            let input = messages.clone();
            match interceptor.intercept(messages, context).await {
                Some(intercepted) => messages = intercepted,
                None => {
                    return Outcome::Failure(ListenerExecutionError::new(
                        input,
                        InterceptorReturnedNothing(interceptor.name()),
                    ));
                }
            }
        }

        Outcome::Success(messages)
    }
}

pub(crate) struct ListenerInvocationStage {
    listener: Listener,
}

impl ListenerInvocationStage {
    pub(crate) fn new(listener: Listener) -> Self {
        ListenerInvocationStage { listener }
    }

    async fn invoke(&self, messages: &[Arc<InboundMessage>], acknowledgement: &Acknowledgement) -> Result<(), BoxError> {
        match &self.listener {
            Listener::Single(listener) => {
                for message in messages {
                    listener.on_message(Arc::clone(message), acknowledgement.clone()).await?;
                }
                Ok(())
            }
            Listener::Batch(listener) => listener.on_messages(messages.to_vec(), acknowledgement.clone()).await,
        }
    }
}

#[async_trait]
impl MessageProcessingStage for ListenerInvocationStage {
    async fn process(&self, outcome: Outcome, context: &mut ProcessingContext) -> Outcome {
        let Outcome::Success(messages) = outcome else {
            return outcome;
        };

        let acknowledgement = context.acknowledgement().clone();
        let result = AssertUnwindSafe(self.invoke(&messages, &acknowledgement))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(())) => Outcome::Success(messages),
            Ok(Err(cause)) => Outcome::Failure(ListenerExecutionError::wrap(messages, cause)),
            Err(panic) => Outcome::Failure(ListenerExecutionError::new(
                messages,
                ListenerPanicked(panic_message(panic.as_ref())),
            )),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

pub(crate) struct ErrorHandlerStage {
    error_handler: Arc<dyn ErrorHandler>,
}

impl ErrorHandlerStage {
    pub(crate) fn new(error_handler: Arc<dyn ErrorHandler>) -> Self {
        ErrorHandlerStage { error_handler }
    }
}

#[async_trait]
impl MessageProcessingStage for ErrorHandlerStage {
    async fn process(&self, outcome: Outcome, context: &mut ProcessingContext) -> Outcome {
        let Outcome::Failure(error) = outcome else {
            return outcome;
        };

        let messages = error.messages().to_vec();
        match self.error_handler.handle(error, context).await {
            Ok(()) => {
                tracing::debug!(queue = %context.queue().name(), "error handler recovered the failure");
                Outcome::Success(messages)
            }
            Err(cause) => Outcome::Failure(ListenerExecutionError::wrap(messages, cause)),
        }
    }
}

pub(crate) struct AcknowledgementHandlerStage {
    acknowledgement_handler: Arc<dyn AcknowledgementHandler>,
}

impl AcknowledgementHandlerStage {
    pub(crate) fn new(acknowledgement_handler: Arc<dyn AcknowledgementHandler>) -> Self {
        AcknowledgementHandlerStage { acknowledgement_handler }
    }
}

#[async_trait]
impl MessageProcessingStage for AcknowledgementHandlerStage {
    async fn process(&self, outcome: Outcome, context: &mut ProcessingContext) -> Outcome {
        let result = match &outcome {
            Outcome::Success(messages) => self.acknowledgement_handler.on_success(messages, context).await,
            Outcome::Failure(error) => {
                self.acknowledgement_handler
                    .on_error(error.messages(), error, context)
                    .await
            }
        };

        if let Err(e) = result {
            tracing::error!(
                queue = %context.queue().name(),
                error = %e,
                "failed to acknowledge processed messages"
            );
        }
        outcome
    }
}

pub(crate) struct AfterProcessingInterceptorStage {
    interceptors: Vec<Arc<dyn MessageInterceptor>>,
}

impl AfterProcessingInterceptorStage {
    pub(crate) fn new(interceptors: Vec<Arc<dyn MessageInterceptor>>) -> Self {
        AfterProcessingInterceptorStage { interceptors }
    }
}

#[async_trait]
impl MessageProcessingStage for AfterProcessingInterceptorStage {
    async fn process(&self, outcome: Outcome, context: &mut ProcessingContext) -> Outcome {
        for interceptor in &self.interceptors {
            interceptor
                .after_processing(outcome.messages(), outcome.error(), context)
                .await;
        }
        outcome
    }
}
