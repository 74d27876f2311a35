//! SQS implementation of the queue transport

use async_trait::async_trait;
use aws_sdk_sqs::{
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    types::DeleteMessageBatchRequestEntry,
    Client,
};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::QueueTransport;
use crate::config::QueueConfig;
use crate::error::TransportError;
use crate::event::{RawMessage, Receipt};

/// Most messages SQS returns or deletes per call.
pub const SQS_MAX_BATCH: usize = 10;

/// Longest SQS long-poll.
pub const SQS_MAX_WAIT_SECS: i32 = 20;

/// Longest SQS visibility timeout (12 hours).
pub const SQS_MAX_VISIBILITY_SECS: i32 = 43_200;

/// Service error codes worth retrying on the next cycle
const RETRYABLE_CODES: &[&str] = &[
    "ThrottlingException",
    "RequestThrottled",
    "ServiceUnavailable",
    "InternalError",
    "InternalFailure",
    "KmsThrottled",
];

/// Queue transport backed by an SQS queue URL
pub struct SqsQueue {
    client: Client,
    queue_url: String,
    wait_time_secs: i32,
}

impl SqsQueue {
    pub fn new(client: Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
            wait_time_secs: 1,
        }
    }

    /// Build a client from the default AWS chain, honoring a custom endpoint (LocalStack).
    pub async fn from_config(config: &QueueConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_sqs::config::Region::new(config.region.clone()));

        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        let aws_config = loader.load().await;
        let client = Client::new(&aws_config);

        info!(
            queue_url = %config.queue_url,
            region = %config.region,
            endpoint = ?config.endpoint_url,
            "SQS client initialized"
        );

        Self::new(client, config.queue_url.clone()).with_wait_time(config.wait_time_secs)
    }

    /// Long-poll duration for the first page of a batch, clamped to 0..=20 seconds
    pub fn with_wait_time(mut self, seconds: u64) -> Self {
        self.wait_time_secs = i32::try_from(seconds)
            .unwrap_or(SQS_MAX_WAIT_SECS)
            .clamp(0, SQS_MAX_WAIT_SECS);
        self
    }
}

#[async_trait]
impl QueueTransport for SqsQueue {
    async fn receive_batch(
        &self,
        max: usize,
        lease: Duration,
    ) -> Result<Vec<RawMessage>, TransportError> {
        let visibility = visibility_secs(lease);
        let mut messages = Vec::with_capacity(max.min(SQS_MAX_BATCH * 10));
        let mut leased_at: Option<Instant> = None;

        // SQS caps each call at 10 messages, so a batch is a run of pages.
        // Only the first page waits; later pages return whatever is ready.
        while messages.len() < max {
            if let Some(started) = leased_at {
                if lease_budget_spent(started.elapsed(), lease) {
                    debug!(
                        received = messages.len(),
                        "Stopping early, the first page's lease is half spent"
                    );
                    break;
                }
            }

            let page_size = (max - messages.len()).min(SQS_MAX_BATCH) as i32;
            let wait = if messages.is_empty() {
                self.wait_time_secs
            } else {
                0
            };

            let response = match self
                .client
                .receive_message()
                .queue_url(&self.queue_url)
                .max_number_of_messages(page_size)
                .visibility_timeout(visibility)
                .wait_time_seconds(wait)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    let err = classify_sdk_error("receive", e);
                    if err.recoverable && !messages.is_empty() {
                        warn!(
                            error = %err,
                            received = messages.len(),
                            "Receive interrupted, keeping messages already leased"
                        );
                        break;
                    }
                    return Err(err);
                },
            };

            let page = response.messages.unwrap_or_default();
            if page.is_empty() {
                break;
            }
            leased_at.get_or_insert_with(Instant::now);

            for msg in page {
                let Some(handle) = msg.receipt_handle else {
                    warn!(message_id = ?msg.message_id, "SQS message without receipt handle skipped");
                    continue;
                };

                let mut message = RawMessage::new(msg.body.unwrap_or_default(), Receipt::new(handle));
                if let Some(id) = msg.message_id {
                    message = message.with_message_id(id);
                }
                messages.push(message);
            }
        }

        debug!(count = messages.len(), queue_url = %self.queue_url, "Received messages from SQS");
        Ok(messages)
    }

    async fn acknowledge(&self, receipts: &[Receipt]) -> Result<usize, TransportError> {
        let mut deleted = 0;

        for chunk in receipts.chunks(SQS_MAX_BATCH) {
            let entries = chunk
                .iter()
                .enumerate()
                .map(|(i, receipt)| {
                    DeleteMessageBatchRequestEntry::builder()
                        .id(i.to_string())
                        .receipt_handle(receipt.as_str())
                        .build()
                        .map_err(|e| TransportError::fatal("acknowledge", e.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?;

            let response = self
                .client
                .delete_message_batch()
                .queue_url(&self.queue_url)
                .set_entries(Some(entries))
                .send()
                .await
                .map_err(|e| classify_sdk_error("acknowledge", e))?;

            deleted += response.successful().len();

            for failure in response.failed() {
                warn!(
                    entry = %failure.id(),
                    code = %failure.code(),
                    message = ?failure.message(),
                    "SQS refused to delete message"
                );
            }
        }

        Ok(deleted)
    }
}

fn visibility_secs(lease: Duration) -> i32 {
    i32::try_from(lease.as_secs())
        .unwrap_or(SQS_MAX_VISIBILITY_SECS)
        .clamp(0, SQS_MAX_VISIBILITY_SECS)
}

/// Paging stops once half the lease has elapsed since the first page
/// arrived; beyond that, early messages may become visible again and come
/// back in a later page of the same batch.
fn lease_budget_spent(elapsed: Duration, lease: Duration) -> bool {
    elapsed >= lease / 2
}

/// Split SDK failures into "try again next cycle" and "give up"
fn classify_sdk_error<E, R>(operation: &'static str, err: SdkError<E, R>) -> TransportError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let recoverable = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        },
        SdkError::ServiceError(ctx) => ctx
            .err()
            .code()
            .is_some_and(|code| RETRYABLE_CODES.contains(&code)),
        _ => false,
    };

    let message = DisplayErrorContext(&err).to_string();
    if recoverable {
        TransportError::recoverable(operation, message)
    } else {
        TransportError::fatal(operation, message)
    }
}
