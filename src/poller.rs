//! The receive loop of one queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};

use crate::client::{QueueClient, ReceiveRequest};
use crate::container::ContainerOptions;
use crate::message::{InboundMessage, Outcome};
use crate::pipeline::{MessageProcessingPipeline, ProcessingContext};
use crate::queue::QueueAttributes;

/// Pause after an empty receive when long polling is disabled.
const EMPTY_RECEIVE_PAUSE: Duration = Duration::from_millis(100);

/// Bounds the number of messages of one queue that are being processed.
///
/// Each dispatched message holds one permit until its pipeline execution
/// completes, whatever the outcome. The poller only receives as many
/// messages as it holds permits for, so an exhausted budget stops polling
/// until work drains.
#[derive(Debug, Clone)]
pub struct InFlightBudget {
    semaphore: Arc<Semaphore>,
    max: usize,
}

impl InFlightBudget {
    pub fn new(max: usize) -> Self {
        InFlightBudget {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Messages currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.max - self.semaphore.available_permits()
    }

    /// Waits for one permit, then takes whatever else is free without
    /// waiting, up to `up_to` permits in total.
    async fn reserve(&self, up_to: usize) -> Result<Vec<OwnedSemaphorePermit>, AcquireError> {
        let first = Arc::clone(&self.semaphore).acquire_owned().await?;
        let mut permits = vec![first];
        while permits.len() < up_to {
            match Arc::clone(&self.semaphore).try_acquire_owned() {
                Ok(permit) => permits.push(permit),
                Err(_) => break,
            }
        }
        Ok(permits)
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PollerOptions {
    pub(crate) max_in_flight: usize,
    max_messages_per_poll: usize,
    wait_time: Duration,
    visibility_timeout: Option<Duration>,
    backoff: Duration,
}

impl From<&ContainerOptions> for PollerOptions {
    fn from(options: &ContainerOptions) -> Self {
        PollerOptions {
            max_in_flight: options.max_in_flight_messages_per_queue,
            max_messages_per_poll: options.max_messages_per_poll,
            wait_time: options.poll_wait_time,
            visibility_timeout: options.message_visibility,
            backoff: options.backoff,
        }
    }
}

/// Receives messages from one queue and feeds them to its pipeline.
pub(crate) struct QueuePoller {
    queue: Arc<QueueAttributes>,
    client: Arc<dyn QueueClient>,
    pipeline: Arc<MessageProcessingPipeline>,
    options: PollerOptions,
    budget: InFlightBudget,
}

impl QueuePoller {
    pub(crate) fn new(
        queue: Arc<QueueAttributes>,
        client: Arc<dyn QueueClient>,
        pipeline: Arc<MessageProcessingPipeline>,
        options: PollerOptions,
        budget: InFlightBudget,
    ) -> Self {
        QueuePoller {
            budget,
            queue,
            client,
            pipeline,
            options,
        }
    }

    /// Starts the receive loop on the tokio runtime.
    pub(crate) fn spawn(self) -> PollerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let queue_name = self.queue.name().to_string();
        let task = tokio::spawn(Arc::new(self).run(stop_rx));

        PollerHandle {
            queue_name,
            stop_tx,
            task,
        }
    }

    async fn run(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) -> JoinSet<()> {
        let mut in_flight = JoinSet::new();
        tracing::info!(
            queue = %self.queue.name(),
            max_in_flight = self.budget.max(),
            "poller started"
        );

        loop {
            if *stop_rx.borrow() {
                break;
            }

            let permits = tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_join_result(self.queue.name(), joined);
                    continue;
                }
                reserved = self.budget.reserve(self.options.max_messages_per_poll) => match reserved {
                    Ok(permits) => permits,
                    Err(_) => break,
                },
            };

            let request = ReceiveRequest {
                max_messages: permits.len(),
                wait_time: self.options.wait_time,
                visibility_timeout: self.options.visibility_timeout,
            };
            let received = tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                received = self.client.receive_messages(self.queue.url(), request) => received,
            };

            match received {
                Ok(messages) if messages.is_empty() => {
                    drop(permits);
                    if self.options.wait_time.is_zero() {
                        tokio::time::sleep(EMPTY_RECEIVE_PAUSE).await;
                    }
                }
                Ok(messages) => self.dispatch(messages, permits, &mut in_flight),
                Err(e) => {
                    drop(permits);
                    tracing::error!(
                        queue = %self.queue.name(),
                        error = %e,
                        backoff = ?self.options.backoff,
                        "failed to receive messages, backing off"
                    );
                    tokio::select! {
                        _ = stop_rx.changed() => break,
                        _ = tokio::time::sleep(self.options.backoff) => {}
                    }
                }
            }
        }

        tracing::info!(
            queue = %self.queue.name(),
            in_flight = in_flight.len(),
            "poller stopped receiving"
        );
        in_flight
    }

    fn dispatch(
        self: &Arc<Self>,
        messages: Vec<InboundMessage>,
        mut permits: Vec<OwnedSemaphorePermit>,
        in_flight: &mut JoinSet<()>,
    ) {
        if messages.len() > permits.len() {
            tracing::warn!(
                queue = %self.queue.name(),
                received = messages.len(),
                requested = permits.len(),
                "received more messages than requested, leaving the excess for redelivery"
            );
        }
        let messages: Vec<Arc<InboundMessage>> = messages.into_iter().take(permits.len()).map(Arc::new).collect();
        permits.truncate(messages.len());
        tracing::debug!(queue = %self.queue.name(), count = messages.len(), "received messages");

        if self.pipeline.is_batch() {
            let poller = Arc::clone(self);
            in_flight.spawn(async move {
                poller.execute(messages).await;
                drop(permits);
            });
        } else if self.queue.is_fifo() {
            for (messages, permits) in group_by_message_group(messages, permits) {
                in_flight.spawn(Arc::clone(self).execute_in_order(messages, permits));
            }
        } else {
            for (message, permit) in messages.into_iter().zip(permits) {
                let poller = Arc::clone(self);
                in_flight.spawn(async move {
                    poller.execute(vec![message]).await;
                    drop(permit);
                });
            }
        }
    }

    async fn execute(&self, messages: Vec<Arc<InboundMessage>>) -> Outcome {
        let mut context = ProcessingContext::new(Arc::clone(&self.queue), Arc::clone(&self.client), &messages);
        self.pipeline.process(messages, &mut context).await
    }

    /// Processes the messages of one FIFO group one after the other. After a
    /// failure the rest of the group is left for redelivery so that it is
    /// never processed out of order.
    async fn execute_in_order(self: Arc<Self>, messages: Vec<Arc<InboundMessage>>, permits: Vec<OwnedSemaphorePermit>) {
        let mut permits = permits.into_iter();
        let mut remaining = messages.into_iter();

        while let Some(message) = remaining.next() {
            let group_id = message.group_id().map(str::to_string);
            let outcome = self.execute(vec![message]).await;
            drop(permits.next());

            if !outcome.is_success() && remaining.len() > 0 {
                tracing::warn!(
                    queue = %self.queue.name(),
                    group_id = group_id.as_deref().unwrap_or_default(),
                    skipped = remaining.len(),
                    "message group failed, leaving the rest of the group for redelivery"
                );
                break;
            }
        }
    }
}

/// Splits a receive result by FIFO message group, keeping the received order
/// within each group and one permit per message.
fn group_by_message_group(
    messages: Vec<Arc<InboundMessage>>,
    permits: Vec<OwnedSemaphorePermit>,
) -> Vec<(Vec<Arc<InboundMessage>>, Vec<OwnedSemaphorePermit>)> {
    let mut groups: Vec<(Option<String>, Vec<Arc<InboundMessage>>, Vec<OwnedSemaphorePermit>)> = Vec::new();

    for (message, permit) in messages.into_iter().zip(permits) {
        let key = message.group_id().map(str::to_string);
        match groups.iter_mut().find(|(group, _, _)| *group == key) {
            Some((_, messages, permits)) => {
                messages.push(message);
                permits.push(permit);
            }
            None => groups.push((key, vec![message], vec![permit])),
        }
    }

    groups
        .into_iter()
        .map(|(_, messages, permits)| (messages, permits))
        .collect()
}

fn log_join_result(queue: &str, joined: Result<(), JoinError>) {
    match joined {
        Ok(()) => {}
        Err(e) if e.is_panic() => tracing::error!(queue = %queue, error = %e, "message processing task panicked"),
        Err(e) => tracing::debug!(queue = %queue, error = %e, "message processing task cancelled"),
    }
}

/// Control handle of a running [`QueuePoller`].
pub(crate) struct PollerHandle {
    queue_name: String,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<JoinSet<()>>,
}

impl PollerHandle {
    /// Stops receiving immediately and waits up to `timeout` for in-flight
    /// messages to finish processing.
    ///
    /// Returns whether everything finished in time. Work still running after
    /// the timeout is aborted when `abort_on_timeout` is set and otherwise
    /// left to complete in the background.
    pub(crate) async fn stop(self, timeout: Duration, abort_on_timeout: bool) -> bool {
        let queue = self.queue_name;
        // The receiver may already be gone if the loop exited on its own.
        let _ = self.stop_tx.send(true);

        let mut in_flight = match self.task.await {
            Ok(in_flight) => in_flight,
            Err(e) => {
                tracing::error!(queue = %queue, error = %e, "poller task failed");
                return false;
            }
        };

        let drained = tokio::time::timeout(timeout, async {
            while let Some(joined) = in_flight.join_next().await {
                log_join_result(&queue, joined);
            }
        })
        .await
        .is_ok();

        if !drained {
            tracing::warn!(
                queue = %queue,
                remaining = in_flight.len(),
                ?timeout,
                "in-flight messages did not finish before the stop timeout"
            );
            if abort_on_timeout {
                in_flight.abort_all();
            } else {
                in_flight.detach_all();
            }
        }

        tracing::info!(queue = %queue, drained, "poller stopped");
        drained
    }
}
