use std::future::Future;
use std::sync::Arc;

use crate::errors::BoxError;
use crate::message::InboundMessage;
use crate::pipeline::{
    Acknowledgement, BatchMessageListener, DeletionPolicy, ErrorHandler, Listener, MessageInterceptor, MessageListener,
    listener_fn, listener_fn_with_ack,
};

/// A listener bound to one or more queues.
///
/// ```rust
/// use sqs_listener::container::ListenerRegistration;
/// use sqs_listener::pipeline::DeletionPolicy;
///
/// let registration = ListenerRegistration::new(["orders", "orders-priority"])
///     .deletion_policy(DeletionPolicy::OnSuccess)
///     .handler_fn(|message, _: ()| async move {
///         println!("order {}", message.body());
///         Ok(())
///     }, ());
/// assert_eq!(registration.queue_names().len(), 2);
/// ```
#[derive(Clone)]
pub struct ListenerRegistration {
    pub(crate) queue_names: Vec<String>,
    pub(crate) deletion_policy: DeletionPolicy,
    pub(crate) listener: Option<Listener>,
    pub(crate) interceptors: Vec<Arc<dyn MessageInterceptor>>,
    pub(crate) error_handler: Option<Arc<dyn ErrorHandler>>,
}

impl ListenerRegistration {
    /// Queue names or queue URLs to listen to.
    pub fn new(queue_names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        ListenerRegistration {
            queue_names: queue_names.into_iter().map(Into::into).collect(),
            deletion_policy: DeletionPolicy::default(),
            listener: None,
            interceptors: Vec::new(),
            error_handler: None,
        }
    }

    pub fn deletion_policy(mut self, policy: DeletionPolicy) -> Self {
        self.deletion_policy = policy;
        self
    }

    pub fn listener(mut self, listener: impl MessageListener + 'static) -> Self {
        self.listener = Some(Listener::single(listener));
        self
    }

    pub fn batch_listener(mut self, listener: impl BatchMessageListener + 'static) -> Self {
        self.listener = Some(Listener::batch(listener));
        self
    }

    /// Registers an async function with a shared resource as the listener.
    ///
    /// The function never sees the acknowledgement, so it cannot be combined
    /// with [`DeletionPolicy::Never`]; use [`Self::handler_fn_with_ack`] there.
    pub fn handler_fn<RFn, Fut, TShared>(mut self, rv_fn: RFn, shared_resources: TShared) -> Self
    where
        RFn: Fn(Arc<InboundMessage>, TShared) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
        TShared: Send + Sync + Clone + 'static,
    {
        self.listener = Some(listener_fn(rv_fn, shared_resources));
        self
    }

    /// Registers an async function that also receives the unit's
    /// acknowledgement, so it can delete messages itself.
    pub fn handler_fn_with_ack<RFn, Fut, TShared>(mut self, rv_fn: RFn, shared_resources: TShared) -> Self
    where
        RFn: Fn(Arc<InboundMessage>, Acknowledgement, TShared) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
        TShared: Send + Sync + Clone + 'static,
    {
        self.listener = Some(listener_fn_with_ack(rv_fn, shared_resources));
        self
    }

    /// Interceptor applied to this registration only, after the
    /// container-wide ones.
    pub fn interceptor(mut self, interceptor: impl MessageInterceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Overrides the container-wide error handler for this registration.
    pub fn error_handler(mut self, error_handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Some(Arc::new(error_handler));
        self
    }

    pub fn queue_names(&self) -> &[String] {
        &self.queue_names
    }

    pub fn policy(&self) -> DeletionPolicy {
        self.deletion_policy
    }
}
