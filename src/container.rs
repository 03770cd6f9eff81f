//! Lifecycle management of the pollers of every registered queue.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use futures::future::{join_all, try_join_all};

use crate::client::QueueClient;
use crate::errors::ListenerContainerError;
use crate::pipeline::{
    DeletionPolicy, ErrorHandler, MessageInterceptor, MessageProcessingPipeline, VisibilityExtensionInterceptor,
};
use crate::poller::{InFlightBudget, PollerHandle, PollerOptions, QueuePoller};
use crate::queue::{QueueAttributes, QueueAttributesResolver, queue_name_of};

mod options;
mod registration;

pub use options::ContainerOptions;
pub use registration::ListenerRegistration;

/// Lifecycle states of a [`SqsMessageListenerContainer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    New,
    Initialized,
    Running,
    Stopped,
    /// Terminal.
    Destroyed,
}

impl ContainerState {
    fn as_str(&self) -> &'static str {
        match self {
            ContainerState::New => "new",
            ContainerState::Initialized => "initialized",
            ContainerState::Running => "running",
            ContainerState::Stopped => "stopped",
            ContainerState::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one queue needs to run, behind its own lock.
struct QueueUnit {
    attributes: Arc<QueueAttributes>,
    pipeline: Arc<MessageProcessingPipeline>,
    client: Arc<dyn QueueClient>,
    options: PollerOptions,
    budget: InFlightBudget,
    poller: tokio::sync::Mutex<Option<PollerHandle>>,
    running: AtomicBool,
}

impl QueueUnit {
    async fn start(&self) {
        let mut poller = self.poller.lock().await;
        if poller.is_some() {
            return;
        }
        let handle = QueuePoller::new(
            Arc::clone(&self.attributes),
            Arc::clone(&self.client),
            Arc::clone(&self.pipeline),
            self.options,
            self.budget.clone(),
        )
        .spawn();
        *poller = Some(handle);
        self.running.store(true, Ordering::SeqCst);
    }

    async fn stop(&self, timeout: std::time::Duration, abort_on_timeout: bool) {
        let mut poller = self.poller.lock().await;
        if let Some(handle) = poller.take() {
            handle.stop(timeout, abort_on_timeout).await;
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Owns one poller and pipeline per registered queue.
///
/// ```rust,no_run
/// use sqs_listener::client::SqsQueueClient;
/// use sqs_listener::container::{ListenerRegistration, SqsMessageListenerContainer};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let container = SqsMessageListenerContainer::builder()
///     .client(SqsQueueClient::from_env().await)
///     .listener(ListenerRegistration::new(["orders"]).handler_fn(
///         |message, _: ()| async move {
///             println!("received {}", message.body());
///             Ok(())
///         },
///         (),
///     ))
///     .build();
///
/// container.start().await?;
/// tokio::signal::ctrl_c().await?;
/// container.destroy().await?;
/// # Ok(())
/// # }
/// ```
pub struct SqsMessageListenerContainer {
    client: Option<Arc<dyn QueueClient>>,
    options: ContainerOptions,
    registrations: Vec<ListenerRegistration>,
    interceptors: Vec<Arc<dyn MessageInterceptor>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    state: Mutex<ContainerState>,
    lifecycle: tokio::sync::Mutex<()>,
    queues: RwLock<HashMap<String, Arc<QueueUnit>>>,
}

impl SqsMessageListenerContainer {
    pub fn builder() -> SqsMessageListenerContainerBuilder {
        SqsMessageListenerContainerBuilder::default()
    }

    pub fn state(&self) -> ContainerState {
        *self.lock_state()
    }

    pub fn options(&self) -> &ContainerOptions {
        &self.options
    }

    /// Validates the configuration and resolves the attributes of every
    /// registered queue. Does nothing once the container is initialized.
    pub async fn initialize(&self) -> Result<(), ListenerContainerError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.initialize_locked().await
    }

    /// Starts polling every registered queue, initializing first if needed.
    /// On a running container this restarts queues stopped with
    /// [`Self::stop_queue`]; queues already polling are left alone.
    pub async fn start(&self) -> Result<(), ListenerContainerError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.initialize_locked().await?;

        let units = self.units();
        join_all(units.iter().map(|unit| unit.start())).await;
        self.set_state(ContainerState::Running);
        tracing::info!(queues = units.len(), "listener container started");
        Ok(())
    }

    /// Stops polling every queue and waits for in-flight messages, up to the
    /// stop timeout per queue. The container can be started again.
    pub async fn stop(&self) -> Result<(), ListenerContainerError> {
        let _lifecycle = self.lifecycle.lock().await;
        match self.state() {
            ContainerState::Destroyed => return Err(self.illegal_state("stop")),
            ContainerState::New => return Ok(()),
            _ => {}
        }

        self.stop_units(false).await;
        self.set_state(ContainerState::Stopped);
        tracing::info!("listener container stopped");
        Ok(())
    }

    /// Stops the container, aborts whatever outlives the stop timeout and
    /// releases every queue. The container cannot be used afterwards.
    pub async fn destroy(&self) -> Result<(), ListenerContainerError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.state() == ContainerState::Destroyed {
            return Ok(());
        }

        self.stop_units(true).await;
        self.queues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.set_state(ContainerState::Destroyed);
        tracing::info!("listener container destroyed");
        Ok(())
    }

    /// Starts polling one queue without touching the others.
    pub async fn start_queue(&self, queue: &str) -> Result<(), ListenerContainerError> {
        {
            let _lifecycle = self.lifecycle.lock().await;
            self.initialize_locked().await?;
        }
        self.unit(queue)?.start().await;
        tracing::info!(queue = %queue, "queue started");
        Ok(())
    }

    /// Stops polling one queue and waits for its in-flight messages, up to
    /// the stop timeout.
    pub async fn stop_queue(&self, queue: &str) -> Result<(), ListenerContainerError> {
        if self.state() == ContainerState::Destroyed {
            return Err(self.illegal_state("stop a queue of"));
        }
        self.unit(queue)?
            .stop(self.options.stop_timeout, false)
            .await;
        Ok(())
    }

    /// Whether the queue is polling, or still draining after a stop request.
    pub fn is_running(&self, queue: &str) -> bool {
        self.unit(queue)
            .map(|unit| unit.running.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Number of messages of the queue currently being processed.
    pub fn in_flight(&self, queue: &str) -> Option<usize> {
        self.unit(queue).ok().map(|unit| unit.budget.in_flight())
    }

    /// Resolved attributes of a registered queue.
    pub fn queue_attributes(&self, queue: &str) -> Option<Arc<QueueAttributes>> {
        self.unit(queue).ok().map(|unit| Arc::clone(&unit.attributes))
    }

    async fn initialize_locked(&self) -> Result<(), ListenerContainerError> {
        match self.state() {
            ContainerState::New => {}
            ContainerState::Destroyed => return Err(self.illegal_state("initialize")),
            _ => return Ok(()),
        }

        let client = self
            .client
            .clone()
            .ok_or_else(|| ListenerContainerError::Configuration("a queue client is required".to_string()))?;
        if self.registrations.is_empty() {
            return Err(ListenerContainerError::Configuration(
                "at least one listener registration is required".to_string(),
            ));
        }
        self.options.validate()?;

        let resolver = QueueAttributesResolver::new(Arc::clone(&client), self.options.queue_not_found_strategy)
            .with_attribute_names(self.options.queue_attribute_names.iter().cloned());

        let mut pending = Vec::new();
        for registration in &self.registrations {
            let pipeline = Arc::new(self.build_pipeline(registration)?);
            for queue in &registration.queue_names {
                pending.push((queue.as_str(), Arc::clone(&pipeline)));
            }
        }

        let resolved = try_join_all(pending.iter().map(|(queue, _)| resolver.resolve(queue))).await?;

        let mut units = HashMap::new();
        for (attributes, (_, pipeline)) in resolved.into_iter().zip(pending) {
            let name = attributes.name().to_string();
            if units.contains_key(&name) {
                return Err(ListenerContainerError::Configuration(format!(
                    "queue {name} is registered more than once"
                )));
            }
            let options = PollerOptions::from(&self.options);
            let unit = QueueUnit {
                attributes: Arc::new(attributes),
                pipeline,
                client: Arc::clone(&client),
                budget: InFlightBudget::new(options.max_in_flight),
                options,
                poller: tokio::sync::Mutex::new(None),
                running: AtomicBool::new(false),
            };
            units.insert(name, Arc::new(unit));
        }

        *self.queues.write().unwrap_or_else(PoisonError::into_inner) = units;
        self.set_state(ContainerState::Initialized);
        tracing::info!(queues = ?self.registered_queue_names(), "listener container initialized");
        Ok(())
    }

    fn build_pipeline(&self, registration: &ListenerRegistration) -> Result<MessageProcessingPipeline, ListenerContainerError> {
        let listener = registration.listener.clone().ok_or_else(|| {
            ListenerContainerError::Configuration(format!(
                "no listener registered for queues {:?}",
                registration.queue_names
            ))
        })?;
        if registration.queue_names.is_empty() {
            return Err(ListenerContainerError::Configuration(
                "a listener registration needs at least one queue".to_string(),
            ));
        }
        if registration.deletion_policy == DeletionPolicy::Never {
            if !listener.acknowledges() {
                return Err(ListenerContainerError::Configuration(format!(
                    "deletion policy NEVER needs a listener that receives the acknowledgement, queues {:?}",
                    registration.queue_names
                )));
            }
            tracing::warn!(
                queues = ?registration.queue_names,
                "deletion policy NEVER: messages are only deleted when the listener acknowledges them"
            );
        }

        let mut builder = MessageProcessingPipeline::builder(listener).deletion_policy(registration.deletion_policy);
        if let Some(min_time_to_process) = self.options.min_time_to_process {
            builder = builder.interceptor(Arc::new(VisibilityExtensionInterceptor::new(
                min_time_to_process,
                self.options.visibility_extension,
            )));
        }
        builder = builder
            .interceptors(self.interceptors.iter().cloned())
            .interceptors(registration.interceptors.iter().cloned());
        if let Some(error_handler) = registration.error_handler.clone().or_else(|| self.error_handler.clone()) {
            builder = builder.error_handler(error_handler);
        }

        Ok(builder.build())
    }

    async fn stop_units(&self, abort_on_timeout: bool) {
        let timeout = self.options.stop_timeout;
        join_all(
            self.units()
                .iter()
                .map(|unit| unit.stop(timeout, abort_on_timeout)),
        )
        .await;
    }

    fn unit(&self, queue: &str) -> Result<Arc<QueueUnit>, ListenerContainerError> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(queue_name_of(queue))
            .cloned()
            .ok_or_else(|| ListenerContainerError::UnknownQueue(queue.to_string()))
    }

    fn units(&self) -> Vec<Arc<QueueUnit>> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn registered_queue_names(&self) -> Vec<String> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn lock_state(&self) -> MutexGuard<'_, ContainerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ContainerState) {
        *self.lock_state() = state;
    }

    fn illegal_state(&self, operation: &'static str) -> ListenerContainerError {
        ListenerContainerError::IllegalState {
            operation,
            state: self.state().as_str(),
        }
    }
}

/// Builder for [`SqsMessageListenerContainer`].
#[derive(Default)]
pub struct SqsMessageListenerContainerBuilder {
    client: Option<Arc<dyn QueueClient>>,
    options: ContainerOptions,
    registrations: Vec<ListenerRegistration>,
    interceptors: Vec<Arc<dyn MessageInterceptor>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
}

impl SqsMessageListenerContainerBuilder {
    pub fn client(self, client: impl QueueClient + 'static) -> Self {
        self.shared_client(Arc::new(client))
    }

    pub fn shared_client(mut self, client: Arc<dyn QueueClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn options(mut self, options: ContainerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn listener(mut self, registration: ListenerRegistration) -> Self {
        self.registrations.push(registration);
        self
    }

    /// Interceptor applied to every registration, in the order added.
    pub fn interceptor(mut self, interceptor: impl MessageInterceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Error handler of every registration that has none of its own.
    pub fn error_handler(mut self, error_handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Some(Arc::new(error_handler));
        self
    }

    pub fn build(self) -> SqsMessageListenerContainer {
        SqsMessageListenerContainer {
            client: self.client,
            options: self.options,
            registrations: self.registrations,
            interceptors: self.interceptors,
            error_handler: self.error_handler,
            state: Mutex::new(ContainerState::New),
            lifecycle: tokio::sync::Mutex::new(()),
            queues: RwLock::new(HashMap::new()),
        }
    }
}
