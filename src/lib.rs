//! # SQS Listener
//!
//! An asynchronous AWS SQS listener container. It polls one or more queues,
//! hands every received message to an application listener under a
//! per-queue concurrency budget, and deletes or keeps each message according
//! to a configurable deletion policy.
//!
//! ## Features
//!
//! - Asynchronous polling with tokio, one receive loop per queue
//! - Backpressure: a queue is only polled while its in-flight budget has room
//! - Ordered processing pipeline: interceptors, listener, error handler,
//!   acknowledgement, after-processing interceptors
//! - Deletion policies `ALWAYS`, `NEVER`, `ON_SUCCESS` and `NO_REDRIVE`
//! - Visibility extension for slow listeners
//! - Single-message and batch listeners, plus closure listeners with shared resources
//! - Per-queue start and stop with graceful draining
//! - Receive errors are logged and retried after a backoff, never fatal
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sqs_listener::{
//!     client::SqsQueueClient,
//!     container::{ContainerOptions, ListenerRegistration, SqsMessageListenerContainer},
//!     pipeline::DeletionPolicy,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = SqsQueueClient::from_env().await;
//!     let shared_data = "shared state".to_string();
//!
//!     let container = SqsMessageListenerContainer::builder()
//!         .client(client)
//!         .options(ContainerOptions::default().with_max_in_flight_messages_per_queue(20))
//!         .listener(
//!             ListenerRegistration::new(["orders"])
//!                 .deletion_policy(DeletionPolicy::OnSuccess)
//!                 .handler_fn(
//!                     |message, shared| async move {
//!                         println!("Processing message: {} with shared: {}", message.body(), shared);
//!                         Ok(())
//!                     },
//!                     shared_data,
//!                 ),
//!         )
//!         .build();
//!
//!     container.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     container.stop().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod container;
pub mod errors;
pub mod message;
pub mod pipeline;
pub mod poller;
pub mod queue;

pub use client::{QueueClient, SqsQueueClient};
pub use container::{ContainerOptions, ContainerState, ListenerRegistration, SqsMessageListenerContainer};
pub use errors::{BoxError, ListenerContainerError, ListenerExecutionError};
pub use message::{InboundMessage, Outcome};
pub use pipeline::DeletionPolicy;
pub use queue::{QueueAttributes, QueueNotFoundStrategy};
