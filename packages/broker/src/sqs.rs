//! Amazon SQS client.

use std::time::Duration;

use aws_sdk_sqs::Client;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::operation::delete_message::DeleteMessageError;
use aws_sdk_sqs::types::MessageSystemAttributeName;

use crate::{AckToken, BrokerConfig, MessageQueue, QueueError, ReceivedMessage};

/// SQS allows at most 10 messages per receive.
const MAX_BATCH: usize = 10;
/// SQS caps long polls at 20 seconds.
const MAX_WAIT_SECONDS: u64 = 20;

/// Shared SQS queue client. The queue URL is resolved once at connect time.
#[derive(Clone)]
pub struct SqsQueue {
    client: Client,
    queue_url: String,
}

impl SqsQueue {
    /// Load AWS configuration for the configured region and resolve the queue.
    pub async fn connect(config: &BrokerConfig) -> Result<Self, QueueError> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let aws_config = loader.load().await;

        Self::with_client(Client::new(&aws_config), &config.queue_name).await
    }

    /// Resolve `queue_name` using an existing client.
    pub async fn with_client(client: Client, queue_name: &str) -> Result<Self, QueueError> {
        let output = client
            .get_queue_url()
            .queue_name(queue_name)
            .send()
            .await
            .map_err(|e| {
                QueueError::Unavailable(format!(
                    "Failed to resolve queue {}: {}",
                    queue_name,
                    DisplayErrorContext(&e)
                ))
            })?;

        let queue_url = output
            .queue_url()
            .ok_or_else(|| QueueError::Unavailable(format!("No URL for queue {}", queue_name)))?
            .to_string();

        tracing::info!("Resolved SQS queue {} to {}", queue_name, queue_url);

        Ok(Self { client, queue_url })
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

impl MessageQueue for SqsQueue {
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let max = max_messages.clamp(1, MAX_BATCH) as i32;
        let wait_seconds = wait.as_secs().min(MAX_WAIT_SECONDS) as i32;

        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max)
            .wait_time_seconds(wait_seconds)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .map_err(|e| QueueError::Sqs(DisplayErrorContext(&e).to_string()))?;

        let mut batch = Vec::new();
        for message in output.messages() {
            let Some(receipt) = message.receipt_handle() else {
                tracing::warn!("Ignoring SQS message without a receipt handle");
                continue;
            };
            let receive_count = message
                .attributes()
                .and_then(|a| a.get(&MessageSystemAttributeName::ApproximateReceiveCount))
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);

            batch.push(ReceivedMessage {
                message_id: message.message_id().unwrap_or_default().to_string(),
                body: message.body().unwrap_or_default().to_string(),
                token: AckToken::new(receipt),
                receive_count,
            });
        }

        Ok(batch)
    }

    async fn acknowledge(&self, token: &AckToken) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(token.as_str())
            .send()
            .await
            .map_err(|e| {
                let invalid = matches!(
                    e.as_service_error(),
                    Some(
                        DeleteMessageError::ReceiptHandleIsInvalid(_)
                            | DeleteMessageError::InvalidIdFormat(_)
                    )
                );
                let detail = DisplayErrorContext(&e).to_string();
                if invalid {
                    QueueError::InvalidAcknowledgment(detail)
                } else {
                    QueueError::Sqs(detail)
                }
            })?;

        Ok(())
    }

    async fn publish(&self, body: String) -> Result<String, QueueError> {
        let output = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| QueueError::Sqs(DisplayErrorContext(&e).to_string()))?;

        Ok(output.message_id().unwrap_or_default().to_string())
    }
}
