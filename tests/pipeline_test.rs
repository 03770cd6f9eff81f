mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::{MockQueueClient, ScriptedListener, message, queue_attributes};
use sqs_listener::errors::{BackendError, BoxError, InterceptorReturnedNothing, ListenerExecutionError, ListenerPanicked};
use sqs_listener::message::{InboundMessage, Outcome};
use sqs_listener::pipeline::{
    Acknowledgement, AcknowledgementHandler, BatchMessageListener, DeletionPolicy, ErrorHandler, Listener,
    MessageInterceptor, MessageProcessingPipeline, ProcessingContext, VisibilityExtensionInterceptor,
};
use sqs_listener::queue::QueueAttributes;

type Log = Arc<Mutex<Vec<String>>>;

async fn run(
    pipeline: &MessageProcessingPipeline,
    client: &MockQueueClient,
    queue: Arc<QueueAttributes>,
    messages: &[Arc<InboundMessage>],
) -> Outcome {
    let mut context = ProcessingContext::new(queue, Arc::new(client.clone()), messages);
    pipeline.process(messages.to_vec(), &mut context).await
}

fn unit(bodies: &[&str]) -> Vec<Arc<InboundMessage>> {
    bodies
        .iter()
        .enumerate()
        .map(|(index, body)| Arc::new(message(&index.to_string(), body)))
        .collect()
}

struct RecordingInterceptor {
    name: &'static str,
    log: Log,
}

#[async_trait]
impl MessageInterceptor for RecordingInterceptor {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn intercept(
        &self,
        messages: Vec<Arc<InboundMessage>>,
        _context: &mut ProcessingContext,
    ) -> Option<Vec<Arc<InboundMessage>>> {
        self.log.lock().unwrap().push(format!("intercept:{}", self.name));
        Some(messages)
    }

    async fn after_processing(
        &self,
        _messages: &[Arc<InboundMessage>],
        error: Option<&ListenerExecutionError>,
        _context: &mut ProcessingContext,
    ) {
        let result = if error.is_some() { "err" } else { "ok" };
        self.log.lock().unwrap().push(format!("after:{}:{result}", self.name));
    }
}

struct RecordingListener {
    log: Log,
}

#[async_trait]
impl sqs_listener::pipeline::MessageListener for RecordingListener {
    async fn on_message(&self, message: Arc<InboundMessage>, _acknowledgement: Acknowledgement) -> Result<(), BoxError> {
        self.log.lock().unwrap().push("listener".to_string());
        if message.body() == "fail" {
            return Err("listener failed".into());
        }
        Ok(())
    }
}

/// Records what it sees and either recovers or re-signals the failure.
struct RecordingErrorHandler {
    log: Log,
    recover: bool,
    seen: Arc<Mutex<Vec<Arc<InboundMessage>>>>,
}

impl RecordingErrorHandler {
    fn new(log: &Log, recover: bool) -> Self {
        RecordingErrorHandler {
            log: Arc::clone(log),
            recover,
            seen: Arc::default(),
        }
    }
}

#[async_trait]
impl ErrorHandler for RecordingErrorHandler {
    async fn handle(&self, error: ListenerExecutionError, _context: &ProcessingContext) -> Result<(), BoxError> {
        self.log.lock().unwrap().push("error-handler".to_string());
        self.seen.lock().unwrap().extend(error.messages().iter().cloned());
        if self.recover { Ok(()) } else { Err(Box::new(error)) }
    }
}

#[derive(Default)]
struct RecordingAcknowledgementHandler {
    log: Log,
    failed: Arc<Mutex<Vec<Arc<InboundMessage>>>>,
}

#[async_trait]
impl AcknowledgementHandler for RecordingAcknowledgementHandler {
    async fn on_success(
        &self,
        _messages: &[Arc<InboundMessage>],
        _context: &ProcessingContext,
    ) -> Result<(), BackendError> {
        self.log.lock().unwrap().push("ack:success".to_string());
        Ok(())
    }

    async fn on_error(
        &self,
        messages: &[Arc<InboundMessage>],
        _error: &ListenerExecutionError,
        _context: &ProcessingContext,
    ) -> Result<(), BackendError> {
        self.log.lock().unwrap().push("ack:error".to_string());
        self.failed.lock().unwrap().extend(messages.iter().cloned());
        Ok(())
    }
}

fn recording_pipeline(log: &Log, error_handler: RecordingErrorHandler) -> MessageProcessingPipeline {
    let interceptor = |name: &'static str| -> Arc<dyn MessageInterceptor> {
        Arc::new(RecordingInterceptor {
            name,
            log: Arc::clone(log),
        })
    };
    MessageProcessingPipeline::builder(Listener::single(RecordingListener { log: Arc::clone(log) }))
        .interceptor(interceptor("first"))
        .interceptor(interceptor("second"))
        .error_handler(Arc::new(error_handler))
        .acknowledgement_handler(Arc::new(RecordingAcknowledgementHandler {
            log: Arc::clone(log),
            ..Default::default()
        }))
        .build()
}

#[tokio::test]
async fn stages_run_in_order_for_successful_message() {
    let log = Log::default();
    let pipeline = recording_pipeline(&log, RecordingErrorHandler::new(&log, false));
    let client = MockQueueClient::new().with_queue("orders");

    let outcome = run(&pipeline, &client, queue_attributes("orders", false), &unit(&["ok"])).await;

    assert!(outcome.is_success());
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "intercept:first",
            "intercept:second",
            "listener",
            "ack:success",
            "after:first:ok",
            "after:second:ok"
        ]
    );
}

#[tokio::test]
async fn stages_run_in_order_for_failed_message() {
    let log = Log::default();
    let pipeline = recording_pipeline(&log, RecordingErrorHandler::new(&log, false));
    let client = MockQueueClient::new().with_queue("orders");

    let outcome = run(&pipeline, &client, queue_attributes("orders", false), &unit(&["fail"])).await;

    assert!(!outcome.is_success());
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "intercept:first",
            "intercept:second",
            "listener",
            "error-handler",
            "ack:error",
            "after:first:err",
            "after:second:err"
        ]
    );
}

#[tokio::test]
async fn failed_messages_reach_later_stages_unchanged() {
    let log = Log::default();
    let error_handler = RecordingErrorHandler::new(&log, false);
    let handled = Arc::clone(&error_handler.seen);
    let acknowledgement_handler = RecordingAcknowledgementHandler::default();
    let acknowledged = Arc::clone(&acknowledgement_handler.failed);
    let pipeline = MessageProcessingPipeline::builder(Listener::batch(FailingBatchListener))
        .error_handler(Arc::new(error_handler))
        .acknowledgement_handler(Arc::new(acknowledgement_handler))
        .build();
    let client = MockQueueClient::new().with_queue("orders");
    let messages = unit(&["a", "b", "c"]);

    let outcome = run(&pipeline, &client, queue_attributes("orders", false), &messages).await;

    let error = outcome.error().expect("unit failed");
    for carried in [
        error.messages().to_vec(),
        handled.lock().unwrap().clone(),
        acknowledged.lock().unwrap().clone(),
    ] {
        assert_eq!(carried.len(), messages.len());
        assert!(carried.iter().zip(&messages).all(|(a, b)| Arc::ptr_eq(a, b)));
    }
}

struct FailingBatchListener;

#[async_trait]
impl BatchMessageListener for FailingBatchListener {
    async fn on_messages(
        &self,
        _messages: Vec<Arc<InboundMessage>>,
        _acknowledgement: Acknowledgement,
    ) -> Result<(), BoxError> {
        Err("batch rejected".into())
    }
}

struct RejectingInterceptor;

#[async_trait]
impl MessageInterceptor for RejectingInterceptor {
    fn name(&self) -> &'static str {
        "rejecting"
    }

    async fn intercept(
        &self,
        _messages: Vec<Arc<InboundMessage>>,
        _context: &mut ProcessingContext,
    ) -> Option<Vec<Arc<InboundMessage>>> {
        None
    }
}

#[tokio::test]
async fn interceptor_returning_nothing_fails_the_unit() {
    let log = Log::default();
    let after = Arc::new(RecordingInterceptor {
        name: "after",
        log: Arc::clone(&log),
    });
    let pipeline = MessageProcessingPipeline::builder(Listener::single(RecordingListener { log: Arc::clone(&log) }))
        .interceptor(Arc::new(RejectingInterceptor))
        .interceptor(after)
        .deletion_policy(DeletionPolicy::OnSuccess)
        .build();
    let client = MockQueueClient::new().with_queue("orders");
    let messages = unit(&["ok"]);

    let outcome = run(&pipeline, &client, queue_attributes("orders", false), &messages).await;

    let error = outcome.error().expect("unit failed");
    let rejected = error
        .cause()
        .downcast_ref::<InterceptorReturnedNothing>()
        .expect("interceptor failure");
    assert_eq!(rejected.0, "rejecting");
    assert!(Arc::ptr_eq(&error.messages()[0], &messages[0]));
    assert_eq!(*log.lock().unwrap(), vec!["after:after:err"]);
    assert!(client.deletes().is_empty());
}

#[tokio::test]
async fn recovered_failure_is_deleted_on_success_policy() {
    let log = Log::default();
    let pipeline = MessageProcessingPipeline::builder(Listener::single(ScriptedListener::new()))
        .error_handler(Arc::new(RecordingErrorHandler::new(&log, true)))
        .deletion_policy(DeletionPolicy::OnSuccess)
        .build();
    let client = MockQueueClient::new().with_queue("orders");

    let outcome = run(&pipeline, &client, queue_attributes("orders", true), &unit(&["fail"])).await;

    assert!(outcome.is_success());
    assert_eq!(client.deletes(), vec!["rh-0"]);
    assert_eq!(*log.lock().unwrap(), vec!["error-handler"]);
}

#[tokio::test]
async fn deletion_failure_does_not_change_the_outcome() {
    let pipeline = MessageProcessingPipeline::builder(Listener::single(ScriptedListener::new()))
        .deletion_policy(DeletionPolicy::Always)
        .build();
    let client = MockQueueClient::new().with_queue("orders");
    client.fail_deletes();

    let outcome = run(&pipeline, &client, queue_attributes("orders", false), &unit(&["ok"])).await;

    assert!(outcome.is_success());
    assert_eq!(client.deletes(), vec!["rh-0"]);
}

#[tokio::test]
async fn listener_panic_becomes_a_failure() {
    let pipeline = MessageProcessingPipeline::builder(Listener::single(ScriptedListener::new()))
        .deletion_policy(DeletionPolicy::OnSuccess)
        .build();
    let client = MockQueueClient::new().with_queue("orders");

    let outcome = run(&pipeline, &client, queue_attributes("orders", false), &unit(&["panic"])).await;

    let error = outcome.error().expect("unit failed");
    let panicked = error
        .cause()
        .downcast_ref::<ListenerPanicked>()
        .expect("panic recorded as the cause");
    assert!(panicked.0.contains("listener panicked on 0"));
    assert!(client.deletes().is_empty());
}

#[tokio::test]
async fn deletion_policies_against_the_backend() {
    let cases = [
        (DeletionPolicy::Always, "ok", false, 1),
        (DeletionPolicy::Always, "fail", true, 1),
        (DeletionPolicy::OnSuccess, "ok", true, 1),
        (DeletionPolicy::OnSuccess, "fail", false, 0),
        (DeletionPolicy::NoRedrive, "ok", true, 1),
        (DeletionPolicy::NoRedrive, "fail", false, 1),
        (DeletionPolicy::NoRedrive, "fail", true, 0),
        (DeletionPolicy::Never, "ok", false, 0),
        (DeletionPolicy::Never, "fail", false, 0),
    ];

    for (policy, body, has_redrive_policy, expected) in cases {
        let pipeline = MessageProcessingPipeline::builder(Listener::single(ScriptedListener::new()))
            .deletion_policy(policy)
            .build();
        let client = MockQueueClient::new().with_queue("orders");

        run(&pipeline, &client, queue_attributes("orders", has_redrive_policy), &unit(&[body])).await;

        assert_eq!(
            client.deletes().len(),
            expected,
            "{policy} body={body} redrive={has_redrive_policy}"
        );
    }
}

#[tokio::test]
async fn explicit_acknowledgement_deletes_at_most_once() {
    for policy in [DeletionPolicy::Never, DeletionPolicy::Always] {
        let pipeline = MessageProcessingPipeline::builder(Listener::single(ScriptedListener::new().acknowledging()))
            .deletion_policy(policy)
            .build();
        let client = MockQueueClient::new().with_queue("orders");

        let outcome = run(&pipeline, &client, queue_attributes("orders", false), &unit(&["ok"])).await;

        assert!(outcome.is_success());
        assert_eq!(client.deletes(), vec!["rh-0"], "{policy}");
    }
}

#[tokio::test]
async fn batch_unit_is_deleted_together() {
    let pipeline = MessageProcessingPipeline::builder(Listener::batch(FailingBatchListener))
        .deletion_policy(DeletionPolicy::Always)
        .build();
    let client = MockQueueClient::new().with_queue("orders");

    let outcome = run(&pipeline, &client, queue_attributes("orders", false), &unit(&["a", "b", "c"])).await;

    assert!(!outcome.is_success());
    let mut deletes = client.deletes();
    deletes.sort();
    assert_eq!(deletes, vec!["rh-0", "rh-1", "rh-2"]);
}

#[tokio::test]
async fn visibility_is_extended_while_the_listener_runs() {
    let extension = Duration::from_secs(30);
    let pipeline = MessageProcessingPipeline::builder(Listener::single(
        ScriptedListener::new().delayed(Duration::from_millis(120)),
    ))
    .interceptor(Arc::new(VisibilityExtensionInterceptor::new(Duration::from_millis(20), extension)))
    .build();
    let client = MockQueueClient::new().with_queue("orders");

    let outcome = run(&pipeline, &client, queue_attributes("orders", false), &unit(&["ok"])).await;
    assert!(outcome.is_success());

    let extended = client.visibility_changes();
    assert!(extended >= 2, "visibility extended {extended} times");
    assert!(client.calls().iter().all(|call| match call {
        common::Call::ChangeVisibility { timeout, .. } => *timeout == extension,
        _ => true,
    }));

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(client.visibility_changes(), extended);
}

struct NestedErrorListener;

#[async_trait]
impl sqs_listener::pipeline::MessageListener for NestedErrorListener {
    async fn on_message(&self, _message: Arc<InboundMessage>, _acknowledgement: Acknowledgement) -> Result<(), BoxError> {
        Err(Box::new(ListenerExecutionError::new(vec![], "downstream failed")))
    }
}

#[tokio::test]
async fn nested_execution_error_keeps_the_unit_messages() {
    let log = Log::default();
    let error_handler = RecordingErrorHandler::new(&log, false);
    let handled = Arc::clone(&error_handler.seen);
    let acknowledgement_handler = RecordingAcknowledgementHandler::default();
    let acknowledged = Arc::clone(&acknowledgement_handler.failed);
    let pipeline = MessageProcessingPipeline::builder(Listener::single(NestedErrorListener))
        .error_handler(Arc::new(error_handler))
        .acknowledgement_handler(Arc::new(acknowledgement_handler))
        .build();
    let client = MockQueueClient::new().with_queue("orders");
    let messages = unit(&["ok"]);

    let outcome = run(&pipeline, &client, queue_attributes("orders", false), &messages).await;

    let error = outcome.error().expect("unit failed");
    assert_eq!(error.cause().to_string(), "downstream failed");
    for carried in [
        outcome.messages().to_vec(),
        handled.lock().unwrap().clone(),
        acknowledged.lock().unwrap().clone(),
    ] {
        assert_eq!(carried.len(), 1);
        assert!(Arc::ptr_eq(&carried[0], &messages[0]));
    }
}

/// Holds the unit in the after-processing stage for a while.
struct SlowAfterProcessing(Duration);

#[async_trait]
impl MessageInterceptor for SlowAfterProcessing {
    async fn after_processing(
        &self,
        _messages: &[Arc<InboundMessage>],
        _error: Option<&ListenerExecutionError>,
        _context: &mut ProcessingContext,
    ) {
        tokio::time::sleep(self.0).await;
    }
}

#[tokio::test]
async fn visibility_is_not_extended_once_deleted() {
    let pipeline = MessageProcessingPipeline::builder(Listener::single(
        ScriptedListener::new().delayed(Duration::from_millis(60)),
    ))
    .interceptor(Arc::new(SlowAfterProcessing(Duration::from_millis(100))))
    .interceptor(Arc::new(VisibilityExtensionInterceptor::new(
        Duration::from_millis(20),
        Duration::from_secs(30),
    )))
    .deletion_policy(DeletionPolicy::Always)
    .build();
    let client = MockQueueClient::new().with_queue("orders");

    let outcome = run(&pipeline, &client, queue_attributes("orders", false), &unit(&["ok"])).await;
    assert!(outcome.is_success());

    let calls = client.calls();
    let deleted_at = calls
        .iter()
        .position(|call| matches!(call, common::Call::Delete { .. }))
        .expect("message deleted");
    assert!(client.visibility_changes() >= 1);
    assert!(
        !calls[deleted_at..]
            .iter()
            .any(|call| matches!(call, common::Call::ChangeVisibility { .. })),
        "visibility changed after delete: {calls:?}"
    );
}
