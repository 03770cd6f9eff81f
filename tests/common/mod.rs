#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqs_listener::client::{QueueClient, ReceiveRequest};
use sqs_listener::errors::{BackendError, BoxError};
use sqs_listener::message::InboundMessage;
use sqs_listener::pipeline::{Acknowledgement, MessageListener};
use sqs_listener::queue::{QueueAttributes, REDRIVE_POLICY};

pub const REDRIVE: &str = r#"{"deadLetterTargetArn":"arn:aws:sqs:us-east-1:000000000000:dlq","maxReceiveCount":"3"}"#;

/// A backend call recorded by [`MockQueueClient`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ResolveQueueUrl(String),
    CreateQueue(String, HashMap<String, String>),
    GetQueueAttributes(String, Vec<String>),
    Receive { url: String, max_messages: usize },
    Delete { url: String, receipt_handle: String },
    ChangeVisibility { url: String, receipt_handle: String, timeout: Duration },
}

#[derive(Default)]
struct State {
    queues: HashMap<String, (String, HashMap<String, String>)>,
    messages: HashMap<String, VecDeque<InboundMessage>>,
    calls: Vec<(Instant, Call)>,
    failing_receives: usize,
    fail_deletes: bool,
}

/// In-memory queue backend recording every call made to it.
#[derive(Clone, Default)]
pub struct MockQueueClient {
    state: Arc<Mutex<State>>,
}

pub fn url_of(queue: &str) -> String {
    format!("https://sqs.us-east-1.amazonaws.com/000000000000/{queue}")
}

impl MockQueueClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue(self, name: &str) -> Self {
        self.add_queue(name, HashMap::new());
        self
    }

    pub fn with_redrive_queue(self, name: &str) -> Self {
        let mut attributes = HashMap::new();
        attributes.insert(REDRIVE_POLICY.to_string(), REDRIVE.to_string());
        self.add_queue(name, attributes);
        self
    }

    pub fn add_queue(&self, name: &str, attributes: HashMap<String, String>) {
        let mut state = self.state.lock().unwrap();
        state.queues.insert(name.to_string(), (url_of(name), attributes));
        state.messages.entry(url_of(name)).or_default();
    }

    pub fn push(&self, queue: &str, message: InboundMessage) {
        let mut state = self.state.lock().unwrap();
        state.messages.entry(url_of(queue)).or_default().push_back(message);
    }

    pub fn push_bodies(&self, queue: &str, bodies: &[&str]) {
        for (index, body) in bodies.iter().enumerate() {
            self.push(queue, message(&format!("{queue}-{index}"), body));
        }
    }

    pub fn remaining(&self, queue: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.messages.get(&url_of(queue)).map_or(0, VecDeque::len)
    }

    /// Makes the next `count` receive calls fail.
    pub fn fail_next_receives(&self, count: usize) {
        self.state.lock().unwrap().failing_receives = count;
    }

    pub fn fail_deletes(&self) {
        self.state.lock().unwrap().fail_deletes = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.iter().map(|(_, call)| call.clone()).collect()
    }

    pub fn timed_calls(&self) -> Vec<(Instant, Call)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Delete { receipt_handle, .. } => Some(receipt_handle),
                _ => None,
            })
            .collect()
    }

    pub fn receives(&self) -> Vec<usize> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Receive { max_messages, .. } => Some(max_messages),
                _ => None,
            })
            .collect()
    }

    pub fn visibility_changes(&self) -> usize {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, Call::ChangeVisibility { .. }))
            .count()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push((Instant::now(), call));
    }
}

#[async_trait]
impl QueueClient for MockQueueClient {
    async fn resolve_queue_url(&self, queue_name: &str) -> Result<String, BackendError> {
        self.record(Call::ResolveQueueUrl(queue_name.to_string()));
        let state = self.state.lock().unwrap();
        state
            .queues
            .get(queue_name)
            .map(|(url, _)| url.clone())
            .ok_or_else(|| BackendError::QueueDoesNotExist(queue_name.to_string()))
    }

    async fn create_queue(
        &self,
        queue_name: &str,
        attributes: HashMap<String, String>,
    ) -> Result<String, BackendError> {
        self.record(Call::CreateQueue(queue_name.to_string(), attributes.clone()));
        self.add_queue(queue_name, attributes);
        Ok(url_of(queue_name))
    }

    async fn get_queue_attributes(
        &self,
        queue_url: &str,
        attribute_names: &[String],
    ) -> Result<HashMap<String, String>, BackendError> {
        self.record(Call::GetQueueAttributes(queue_url.to_string(), attribute_names.to_vec()));
        let state = self.state.lock().unwrap();
        let (_, attributes) = state
            .queues
            .values()
            .find(|(url, _)| url == queue_url)
            .ok_or_else(|| BackendError::QueueDoesNotExist(queue_url.to_string()))?;
        Ok(attributes
            .iter()
            .filter(|(name, _)| attribute_names.contains(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect())
    }

    async fn receive_messages(
        &self,
        queue_url: &str,
        request: ReceiveRequest,
    ) -> Result<Vec<InboundMessage>, BackendError> {
        self.record(Call::Receive {
            url: queue_url.to_string(),
            max_messages: request.max_messages,
        });

        let received = {
            let mut state = self.state.lock().unwrap();
            if state.failing_receives > 0 {
                state.failing_receives -= 1;
                return Err(BackendError::service("ReceiveMessage", "service unavailable"));
            }
            let queue = state.messages.entry(queue_url.to_string()).or_default();
            let count = request.max_messages.min(queue.len());
            queue.drain(..count).collect::<Vec<_>>()
        };

        if received.is_empty() {
            tokio::time::sleep(request.wait_time).await;
        }
        Ok(received)
    }

    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> Result<(), BackendError> {
        self.record(Call::Delete {
            url: queue_url.to_string(),
            receipt_handle: receipt_handle.to_string(),
        });
        if self.state.lock().unwrap().fail_deletes {
            return Err(BackendError::service("DeleteMessage", "access denied"));
        }
        Ok(())
    }

    async fn change_message_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout: Duration,
    ) -> Result<(), BackendError> {
        self.record(Call::ChangeVisibility {
            url: queue_url.to_string(),
            receipt_handle: receipt_handle.to_string(),
            timeout: visibility_timeout,
        });
        Ok(())
    }
}

pub fn message(id: &str, body: &str) -> InboundMessage {
    InboundMessage::builder(id, format!("rh-{id}")).body(body).build()
}

pub fn queue_attributes(name: &str, has_redrive_policy: bool) -> Arc<QueueAttributes> {
    let mut attributes = HashMap::new();
    if has_redrive_policy {
        attributes.insert(REDRIVE_POLICY.to_string(), REDRIVE.to_string());
    }
    Arc::new(QueueAttributes::new(name, url_of(name), attributes))
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Listener driven by message bodies: bodies starting with `fail` return an
/// error, bodies starting with `panic` panic, anything else succeeds.
#[derive(Clone, Default)]
pub struct ScriptedListener {
    seen: Arc<Mutex<Vec<String>>>,
    gate: Option<Arc<tokio::sync::Semaphore>>,
    delay: Duration,
    acknowledge: bool,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl ScriptedListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks every invocation until the gate hands out a permit.
    pub fn gated(mut self, gate: Arc<tokio::sync::Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Acknowledges every message explicitly before returning.
    pub fn acknowledging(mut self) -> Self {
        self.acknowledge = true;
        self
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageListener for ScriptedListener {
    async fn on_message(&self, message: Arc<InboundMessage>, acknowledgement: Acknowledgement) -> Result<(), BoxError> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.seen.lock().unwrap().push(message.body().to_string());

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.acknowledge {
            acknowledgement.acknowledge().await?;
        }
        if message.body().starts_with("panic") {
            panic!("listener panicked on {}", message.id());
        }
        if message.body().starts_with("fail") {
            return Err(format!("cannot process {}", message.id()).into());
        }
        Ok(())
    }
}
