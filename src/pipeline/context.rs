use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::future::join_all;

use crate::client::QueueClient;
use crate::errors::BackendError;
use crate::message::InboundMessage;
use crate::queue::QueueAttributes;

/// Receipt handles of one processing unit together with the client and queue
/// they belong to.
struct UnitHandles {
    client: Arc<dyn QueueClient>,
    queue_url: String,
    receipt_handles: Vec<String>,
}

impl UnitHandles {
    /// Runs `operation` for every receipt handle concurrently and reports the
    /// first failure, if any.
    async fn for_each<'a, F, Fut>(&'a self, operation: F) -> Result<(), BackendError>
    where
        F: Fn(&'a dyn QueueClient, &'a str, &'a str) -> Fut,
        Fut: Future<Output = Result<(), BackendError>>,
    {
        let results = join_all(
            self.receipt_handles
                .iter()
                .map(|handle| operation(self.client.as_ref(), &self.queue_url, handle)),
        )
        .await;
        results.into_iter().collect()
    }
}

/// Handle used to delete the messages of a processing unit.
///
/// Listeners registered with [`DeletionPolicy::Never`](crate::pipeline::DeletionPolicy::Never)
/// receive this handle and must call [`acknowledge`](Acknowledgement::acknowledge)
/// themselves. A unit is deleted at most once, whoever asks first.
#[derive(Clone)]
pub struct Acknowledgement {
    handles: Arc<UnitHandles>,
    acknowledged: Arc<AtomicBool>,
}

impl Acknowledgement {
    /// Deletes every message of the unit from the queue.
    ///
    /// Calling this again after a first attempt is a no-op, even when the
    /// first attempt failed.
    pub async fn acknowledge(&self) -> Result<(), BackendError> {
        if self.acknowledged.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.handles
            .for_each(|client, queue_url, receipt_handle| client.delete_message(queue_url, receipt_handle))
            .await
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Acknowledgement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acknowledgement")
            .field("queue_url", &self.handles.queue_url)
            .field("messages", &self.handles.receipt_handles.len())
            .field("acknowledged", &self.is_acknowledged())
            .finish()
    }
}

/// Handle used to change the visibility timeout of the messages of a unit.
#[derive(Clone)]
pub struct Visibility {
    handles: Arc<UnitHandles>,
}

impl Visibility {
    /// Hides the messages from other consumers for `timeout`, counted from now.
    pub async fn change_visibility(&self, timeout: Duration) -> Result<(), BackendError> {
        self.handles
            .for_each(|client, queue_url, receipt_handle| {
                client.change_message_visibility(queue_url, receipt_handle, timeout)
            })
            .await
    }
}

/// Type-keyed storage for interceptor state.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Stores `value`, returning the previous value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|previous| previous.downcast::<T>().ok())
            .map(|previous| *previous)
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.map.get(&TypeId::of::<T>()).and_then(|value| value.downcast_ref::<T>())
    }

    pub fn get_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.map
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }
}

/// State threaded through the stages of one pipeline execution.
pub struct ProcessingContext {
    queue: Arc<QueueAttributes>,
    original_messages: Vec<Arc<InboundMessage>>,
    acknowledgement: Acknowledgement,
    visibility: Visibility,
    extensions: Extensions,
    started_at: Instant,
}

impl ProcessingContext {
    pub fn new(queue: Arc<QueueAttributes>, client: Arc<dyn QueueClient>, messages: &[Arc<InboundMessage>]) -> Self {
        let handles = Arc::new(UnitHandles {
            client,
            queue_url: queue.url().to_string(),
            receipt_handles: messages.iter().map(|m| m.receipt_handle().to_string()).collect(),
        });

        ProcessingContext {
            queue,
            original_messages: messages.to_vec(),
            acknowledgement: Acknowledgement {
                handles: Arc::clone(&handles),
                acknowledged: Arc::new(AtomicBool::new(false)),
            },
            visibility: Visibility { handles },
            extensions: Extensions::default(),
            started_at: Instant::now(),
        }
    }

    pub fn queue(&self) -> &QueueAttributes {
        &self.queue
    }

    /// The messages exactly as they entered the pipeline, before any
    /// interceptor replaced them.
    pub fn original_messages(&self) -> &[Arc<InboundMessage>] {
        &self.original_messages
    }

    pub fn acknowledgement(&self) -> &Acknowledgement {
        &self.acknowledgement
    }

    pub fn visibility(&self) -> &Visibility {
        &self.visibility
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Time since the unit entered the pipeline.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}
