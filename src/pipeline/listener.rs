use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::BoxError;
use crate::message::InboundMessage;
use crate::pipeline::context::Acknowledgement;

/// Application handler invoked once per message.
#[async_trait]
pub trait MessageListener: Send + Sync {
    /// Processes one message.
    ///
    /// Returning an error hands the message to the error handler and then to
    /// the acknowledgement handler as a failure. `acknowledgement` only needs
    /// to be used when the listener is registered with
    /// [`DeletionPolicy::Never`](crate::pipeline::DeletionPolicy::Never).
    async fn on_message(&self, message: Arc<InboundMessage>, acknowledgement: Acknowledgement) -> Result<(), BoxError>;

    /// Whether the listener can delete messages through its
    /// `acknowledgement`. Listeners that never see it cannot be registered
    /// with `DeletionPolicy::Never`.
    fn acknowledges(&self) -> bool {
        true
    }
}

/// Application handler invoked once per received batch.
#[async_trait]
pub trait BatchMessageListener: Send + Sync {
    async fn on_messages(
        &self,
        messages: Vec<Arc<InboundMessage>>,
        acknowledgement: Acknowledgement,
    ) -> Result<(), BoxError>;
}

/// The handler of a listener registration.
#[derive(Clone)]
pub enum Listener {
    /// Every received message is its own processing unit.
    Single(Arc<dyn MessageListener>),
    /// Everything returned by one receive call is processed as one unit.
    Batch(Arc<dyn BatchMessageListener>),
}

impl Listener {
    pub fn single(listener: impl MessageListener + 'static) -> Self {
        Listener::Single(Arc::new(listener))
    }

    pub fn batch(listener: impl BatchMessageListener + 'static) -> Self {
        Listener::Batch(Arc::new(listener))
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Listener::Batch(_))
    }

    /// See [`MessageListener::acknowledges`]. Batch listeners always get the
    /// acknowledgement.
    pub fn acknowledges(&self) -> bool {
        match self {
            Listener::Single(listener) => listener.acknowledges(),
            Listener::Batch(_) => true,
        }
    }
}

/// [`MessageListener`] built from an async function and a shared resource.
///
/// The shared resource is cloned for every message, so it is usually an
/// `Arc` or a cheap handle such as a connection pool.
///
/// # Type Parameters
///
/// * `RFn` - The message handler function type
/// * `Fut` - The future returned by the handler function
/// * `TShared` - The type of shared resources passed to the handler
pub struct ListenerFn<RFn, Fut, TShared>
where
    RFn: Fn(Arc<InboundMessage>, TShared) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    TShared: Send + Sync + Clone + 'static,
{
    rv_fn: RFn,
    shared_resources: TShared,
}

impl<RFn, Fut, TShared> ListenerFn<RFn, Fut, TShared>
where
    RFn: Fn(Arc<InboundMessage>, TShared) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    TShared: Send + Sync + Clone + 'static,
{
    pub fn new(rv_fn: RFn, shared_resources: TShared) -> Self {
        ListenerFn {
            rv_fn,
            shared_resources,
        }
    }
}

#[async_trait]
impl<RFn, Fut, TShared> MessageListener for ListenerFn<RFn, Fut, TShared>
where
    RFn: Fn(Arc<InboundMessage>, TShared) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    TShared: Send + Sync + Clone + 'static,
{
    async fn on_message(&self, message: Arc<InboundMessage>, _acknowledgement: Acknowledgement) -> Result<(), BoxError> {
        (self.rv_fn)(message, self.shared_resources.clone()).await
    }

    fn acknowledges(&self) -> bool {
        false
    }
}

/// [`MessageListener`] built from an async function that also receives the
/// unit's [`Acknowledgement`], for listeners that delete messages themselves.
pub struct AckListenerFn<RFn, Fut, TShared>
where
    RFn: Fn(Arc<InboundMessage>, Acknowledgement, TShared) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    TShared: Send + Sync + Clone + 'static,
{
    rv_fn: RFn,
    shared_resources: TShared,
}

impl<RFn, Fut, TShared> AckListenerFn<RFn, Fut, TShared>
where
    RFn: Fn(Arc<InboundMessage>, Acknowledgement, TShared) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    TShared: Send + Sync + Clone + 'static,
{
    pub fn new(rv_fn: RFn, shared_resources: TShared) -> Self {
        AckListenerFn {
            rv_fn,
            shared_resources,
        }
    }
}

#[async_trait]
impl<RFn, Fut, TShared> MessageListener for AckListenerFn<RFn, Fut, TShared>
where
    RFn: Fn(Arc<InboundMessage>, Acknowledgement, TShared) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    TShared: Send + Sync + Clone + 'static,
{
    async fn on_message(&self, message: Arc<InboundMessage>, acknowledgement: Acknowledgement) -> Result<(), BoxError> {
        (self.rv_fn)(message, acknowledgement, self.shared_resources.clone()).await
    }
}

/// Wraps an async function and a shared resource into a single-message [`Listener`].
///
/// ```rust
/// use sqs_listener::pipeline::listener_fn;
///
/// let listener = listener_fn(
///     |message, prefix: String| async move {
///         println!("{prefix}: {}", message.body());
///         Ok(())
///     },
///     "orders".to_string(),
/// );
/// assert!(!listener.is_batch());
/// ```
pub fn listener_fn<RFn, Fut, TShared>(rv_fn: RFn, shared_resources: TShared) -> Listener
where
    RFn: Fn(Arc<InboundMessage>, TShared) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    TShared: Send + Sync + Clone + 'static,
{
    Listener::single(ListenerFn::new(rv_fn, shared_resources))
}

/// Like [`listener_fn`], but the function also receives the unit's
/// [`Acknowledgement`].
///
/// ```rust
/// use sqs_listener::pipeline::listener_fn_with_ack;
///
/// let listener = listener_fn_with_ack(
///     |message, acknowledgement, _: ()| async move {
///         println!("{}", message.body());
///         acknowledgement.acknowledge().await?;
///         Ok(())
///     },
///     (),
/// );
/// assert!(listener.acknowledges());
/// ```
pub fn listener_fn_with_ack<RFn, Fut, TShared>(rv_fn: RFn, shared_resources: TShared) -> Listener
where
    RFn: Fn(Arc<InboundMessage>, Acknowledgement, TShared) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    TShared: Send + Sync + Clone + 'static,
{
    Listener::single(AckListenerFn::new(rv_fn, shared_resources))
}
