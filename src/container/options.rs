use std::time::Duration;

use crate::client::{MAX_MESSAGES_PER_RECEIVE, MAX_WAIT_TIME};
use crate::errors::ListenerContainerError;
use crate::queue::QueueNotFoundStrategy;

/// Configuration shared by every queue of a listener container.
///
/// # Fields
/// - `max_in_flight_messages_per_queue`: Upper bound of messages processed concurrently per queue.
/// - `max_messages_per_poll`: The maximum number of messages to receive in a single request.
/// - `poll_wait_time`: The wait time for long polling.
/// - `message_visibility`: Visibility timeout requested on receive, queue default when `None`.
/// - `backoff`: Pause after a failed receive before polling again.
/// - `stop_timeout`: How long stopping a queue waits for in-flight messages.
/// - `min_time_to_process`: Processing time after which visibility gets extended.
/// - `visibility_extension`: Visibility granted by each extension.
/// - `queue_not_found_strategy`: Whether missing queues are created.
/// - `queue_attribute_names`: Extra queue attributes fetched at startup.
#[derive(Debug, Clone)]
pub struct ContainerOptions {
    pub max_in_flight_messages_per_queue: usize,
    pub max_messages_per_poll: usize,
    pub poll_wait_time: Duration,
    pub message_visibility: Option<Duration>,
    pub backoff: Duration,
    pub stop_timeout: Duration,
    pub min_time_to_process: Option<Duration>,
    pub visibility_extension: Duration,
    pub queue_not_found_strategy: QueueNotFoundStrategy,
    pub queue_attribute_names: Vec<String>,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        ContainerOptions {
            max_in_flight_messages_per_queue: 10,
            max_messages_per_poll: 10,
            poll_wait_time: Duration::from_secs(20),
            message_visibility: None,
            backoff: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(20),
            min_time_to_process: None,
            visibility_extension: Duration::from_secs(30),
            queue_not_found_strategy: QueueNotFoundStrategy::default(),
            queue_attribute_names: Vec::new(),
        }
    }
}

impl ContainerOptions {
    pub fn with_max_in_flight_messages_per_queue(mut self, max: usize) -> Self {
        self.max_in_flight_messages_per_queue = max;
        self
    }

    pub fn with_max_messages_per_poll(mut self, max: usize) -> Self {
        self.max_messages_per_poll = max;
        self
    }

    pub fn with_poll_wait_time(mut self, wait_time: Duration) -> Self {
        self.poll_wait_time = wait_time;
        self
    }

    pub fn with_message_visibility(mut self, visibility: Duration) -> Self {
        self.message_visibility = Some(visibility);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Extends the visibility of messages by `extension` once they have been
    /// processing for `min_time_to_process`.
    pub fn with_visibility_extension(mut self, min_time_to_process: Duration, extension: Duration) -> Self {
        self.min_time_to_process = Some(min_time_to_process);
        self.visibility_extension = extension;
        self
    }

    pub fn with_queue_not_found_strategy(mut self, strategy: QueueNotFoundStrategy) -> Self {
        self.queue_not_found_strategy = strategy;
        self
    }

    pub fn with_queue_attribute_names(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.queue_attribute_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<(), ListenerContainerError> {
        if self.max_in_flight_messages_per_queue == 0 {
            return Err(invalid("max_in_flight_messages_per_queue must be at least 1"));
        }
        if !(1..=MAX_MESSAGES_PER_RECEIVE).contains(&self.max_messages_per_poll) {
            return Err(invalid(format!(
                "max_messages_per_poll must be between 1 and {MAX_MESSAGES_PER_RECEIVE}"
            )));
        }
        if self.poll_wait_time > MAX_WAIT_TIME {
            return Err(invalid(format!(
                "poll_wait_time must not exceed {} seconds",
                MAX_WAIT_TIME.as_secs()
            )));
        }
        if self.min_time_to_process.is_some_and(|min| min.is_zero()) {
            return Err(invalid("min_time_to_process must be greater than zero"));
        }
        if self.min_time_to_process.is_some() && self.visibility_extension.is_zero() {
            return Err(invalid("visibility_extension must be greater than zero"));
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> ListenerContainerError {
    ListenerContainerError::Configuration(reason.into())
}
