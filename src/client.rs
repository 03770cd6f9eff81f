use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_sqs::config::SharedCredentialsProvider;
use aws_sdk_sqs::types::{Message, MessageSystemAttributeName, QueueAttributeName};

use crate::errors::BackendError;
use crate::message::InboundMessage;

/// Largest number of messages a single receive call may return.
pub const MAX_MESSAGES_PER_RECEIVE: usize = 10;

/// Longest long-polling wait accepted by a receive call.
pub const MAX_WAIT_TIME: Duration = Duration::from_secs(20);

/// Parameters of one receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveRequest {
    pub max_messages: usize,
    pub wait_time: Duration,
    pub visibility_timeout: Option<Duration>,
}

/// The operations the listener container needs from a queue backend.
///
/// All calls are stateless, so one client is shared by every poller and
/// every processing unit of a container.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Returns the URL of the named queue or [`BackendError::QueueDoesNotExist`].
    async fn resolve_queue_url(&self, queue_name: &str) -> Result<String, BackendError>;

    /// Creates a queue and returns its URL.
    async fn create_queue(
        &self,
        queue_name: &str,
        attributes: HashMap<String, String>,
    ) -> Result<String, BackendError>;

    /// Fetches the named queue attributes in one call. Attributes the queue
    /// does not have are absent from the result.
    async fn get_queue_attributes(
        &self,
        queue_url: &str,
        attribute_names: &[String],
    ) -> Result<HashMap<String, String>, BackendError>;

    async fn receive_messages(
        &self,
        queue_url: &str,
        request: ReceiveRequest,
    ) -> Result<Vec<InboundMessage>, BackendError>;

    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> Result<(), BackendError>;

    async fn change_message_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout: Duration,
    ) -> Result<(), BackendError>;
}

/// [`QueueClient`] backed by the AWS SQS SDK.
#[derive(Debug, Clone)]
pub struct SqsQueueClient {
    client: aws_sdk_sqs::Client,
}

impl SqsQueueClient {
    /// Creates a client using credentials and configuration from the environment.
    ///
    /// This loads AWS configuration from environment variables such as
    /// `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_REGION` and `AWS_PROFILE`.
    ///
    /// ```rust,no_run
    /// use sqs_listener::client::SqsQueueClient;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let client = SqsQueueClient::from_env().await;
    /// }
    /// ```
    pub async fn from_env() -> Self {
        let config = aws_config::load_from_env().await;
        SqsQueueClient {
            client: aws_sdk_sqs::Client::new(&config),
        }
    }

    /// Creates a client with explicitly provided credentials and region.
    ///
    /// Useful for applications that manage credentials dynamically or need
    /// different credentials than those in the environment.
    pub fn with_credentials(access_key_id: &str, secret_access_key: &str, region: &str) -> Self {
        let credentials =
            aws_sdk_sqs::config::Credentials::new(access_key_id, secret_access_key, None, None, "aws");

        let config = aws_sdk_sqs::config::Builder::new()
            .region(Region::new(region.to_string()))
            .credentials_provider(SharedCredentialsProvider::new(credentials))
            .build();

        SqsQueueClient {
            client: aws_sdk_sqs::Client::from_conf(config),
        }
    }

    /// The underlying SDK client.
    pub fn inner(&self) -> &aws_sdk_sqs::Client {
        &self.client
    }
}

impl From<aws_sdk_sqs::Client> for SqsQueueClient {
    fn from(client: aws_sdk_sqs::Client) -> Self {
        SqsQueueClient { client }
    }
}

#[async_trait]
impl QueueClient for SqsQueueClient {
    async fn resolve_queue_url(&self, queue_name: &str) -> Result<String, BackendError> {
        let output = self
            .client
            .get_queue_url()
            .queue_name(queue_name)
            .send()
            .await
            .map_err(|err| {
                let missing = err
                    .as_service_error()
                    .is_some_and(|service_error| service_error.is_queue_does_not_exist());
                if missing {
                    BackendError::QueueDoesNotExist(queue_name.to_string())
                } else {
                    BackendError::service("GetQueueUrl", err)
                }
            })?;

        output
            .queue_url
            .ok_or_else(|| BackendError::service("GetQueueUrl", "response carried no queue url"))
    }

    async fn create_queue(
        &self,
        queue_name: &str,
        attributes: HashMap<String, String>,
    ) -> Result<String, BackendError> {
        let attributes = attributes
            .into_iter()
            .map(|(name, value)| (QueueAttributeName::from(name.as_str()), value))
            .collect::<HashMap<_, _>>();

        let output = self
            .client
            .create_queue()
            .queue_name(queue_name)
            .set_attributes(Some(attributes))
            .send()
            .await
            .map_err(|err| BackendError::service("CreateQueue", err))?;

        output
            .queue_url
            .ok_or_else(|| BackendError::service("CreateQueue", "response carried no queue url"))
    }

    async fn get_queue_attributes(
        &self,
        queue_url: &str,
        attribute_names: &[String],
    ) -> Result<HashMap<String, String>, BackendError> {
        let names = attribute_names
            .iter()
            .map(|name| QueueAttributeName::from(name.as_str()))
            .collect::<Vec<_>>();

        let output = self
            .client
            .get_queue_attributes()
            .queue_url(queue_url)
            .set_attribute_names(Some(names))
            .send()
            .await
            .map_err(|err| BackendError::service("GetQueueAttributes", err))?;

        Ok(output
            .attributes
            .unwrap_or_default()
            .into_iter()
            .map(|(name, value)| (name.as_str().to_string(), value))
            .collect())
    }

    async fn receive_messages(
        &self,
        queue_url: &str,
        request: ReceiveRequest,
    ) -> Result<Vec<InboundMessage>, BackendError> {
        let output = self
            .client
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(request.max_messages.min(MAX_MESSAGES_PER_RECEIVE) as i32)
            .wait_time_seconds(request.wait_time.min(MAX_WAIT_TIME).as_secs() as i32)
            .set_visibility_timeout(request.visibility_timeout.map(duration_to_seconds))
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(|err| BackendError::service("ReceiveMessage", err))?;

        Ok(output
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(to_inbound_message)
            .collect())
    }

    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> Result<(), BackendError> {
        self.client
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|err| BackendError::service("DeleteMessage", err))?;
        Ok(())
    }

    async fn change_message_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout: Duration,
    ) -> Result<(), BackendError> {
        self.client
            .change_message_visibility()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(duration_to_seconds(visibility_timeout))
            .send()
            .await
            .map_err(|err| BackendError::service("ChangeMessageVisibility", err))?;
        Ok(())
    }
}

fn duration_to_seconds(duration: Duration) -> i32 {
    i32::try_from(duration.as_secs()).unwrap_or(i32::MAX)
}

fn to_inbound_message(message: Message) -> Option<InboundMessage> {
    let (Some(id), Some(receipt_handle)) = (message.message_id, message.receipt_handle) else {
        tracing::warn!("skipping received message without id or receipt handle");
        return None;
    };

    let mut builder = InboundMessage::builder(id, receipt_handle).body(message.body.unwrap_or_default());

    for (name, value) in message.attributes.unwrap_or_default() {
        builder = builder.attribute(name.as_str(), value);
    }
    for (name, value) in message.message_attributes.unwrap_or_default() {
        if let Some(text) = value.string_value {
            builder = builder.attribute(name, text);
        }
    }

    Some(builder.build())
}
