//! Queue side of the pump: the transport port and the batch fetcher on top of it
//!
//! The transport does the I/O; [`BatchFetcher`] applies the batching policy
//! (batch size, lease window) and decides which transport failures are just
//! "nothing to read right now".

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::TransportError;
use crate::event::{RawMessage, Receipt};

pub mod sqs;

pub use sqs::SqsQueue;

/// Default number of messages requested per cycle.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default lease (visibility timeout). Deliberately short: a crashed or slow
/// cycle gets its messages redelivered quickly.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(1);

/// A queue that hands out leased messages and deletes them on request
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Receive up to `max` messages, each hidden from other consumers for `lease`.
    ///
    /// An empty vector means the queue has nothing to offer right now.
    async fn receive_batch(
        &self,
        max: usize,
        lease: Duration,
    ) -> Result<Vec<RawMessage>, TransportError>;

    /// Delete delivered messages so they are never redelivered.
    ///
    /// Returns the number of receipts the queue accepted.
    async fn acknowledge(&self, receipts: &[Receipt]) -> Result<usize, TransportError>;
}

#[async_trait]
impl<T: QueueTransport + ?Sized> QueueTransport for Arc<T> {
    async fn receive_batch(
        &self,
        max: usize,
        lease: Duration,
    ) -> Result<Vec<RawMessage>, TransportError> {
        (**self).receive_batch(max, lease).await
    }

    async fn acknowledge(&self, receipts: &[Receipt]) -> Result<usize, TransportError> {
        (**self).acknowledge(receipts).await
    }
}

/// Pulls bounded batches from a [`QueueTransport`]
pub struct BatchFetcher<Q> {
    transport: Q,
    lease: Duration,
}

impl<Q: QueueTransport> BatchFetcher<Q> {
    pub fn new(transport: Q) -> Self {
        Self {
            transport,
            lease: DEFAULT_LEASE,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Fetch up to `max` messages without acknowledging them.
    ///
    /// Recoverable transport failures are logged and read as an empty batch.
    #[instrument(skip(self), fields(lease_secs = self.lease.as_secs()))]
    pub async fn fetch(&self, max: usize) -> Result<Vec<RawMessage>, TransportError> {
        if max == 0 {
            return Ok(Vec::new());
        }

        match self.transport.receive_batch(max, self.lease).await {
            Ok(messages) => {
                debug!(count = messages.len(), "Fetched messages");
                Ok(messages)
            },
            Err(e) if e.recoverable => {
                warn!(error = %e, "Recoverable queue error, treating as empty fetch");
                Ok(Vec::new())
            },
            Err(e) => Err(e),
        }
    }

    /// Acknowledge receipts; a no-op for an empty slice.
    pub async fn acknowledge(&self, receipts: &[Receipt]) -> Result<usize, TransportError> {
        if receipts.is_empty() {
            return Ok(0);
        }
        self.transport.acknowledge(receipts).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedQueue {
        replies: Mutex<Vec<Result<Vec<RawMessage>, TransportError>>>,
        requests: Mutex<Vec<(usize, Duration)>>,
    }

    impl ScriptedQueue {
        fn new(replies: Vec<Result<Vec<RawMessage>, TransportError>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl QueueTransport for ScriptedQueue {
        async fn receive_batch(
            &self,
            max: usize,
            lease: Duration,
        ) -> Result<Vec<RawMessage>, TransportError> {
            self.requests.lock().unwrap().push((max, lease));
            self.replies.lock().unwrap().remove(0)
        }

        async fn acknowledge(&self, receipts: &[Receipt]) -> Result<usize, TransportError> {
            Ok(receipts.len())
        }
    }

    fn msg(n: usize) -> RawMessage {
        RawMessage::new(format!("body-{n}"), Receipt::new(format!("r-{n}")))
    }

    #[tokio::test]
    async fn test_fetch_passes_max_and_lease() {
        let queue = Arc::new(ScriptedQueue::new(vec![Ok(vec![msg(1), msg(2)])]));
        let fetcher = BatchFetcher::new(queue.clone()).with_lease(Duration::from_secs(5));

        let messages = fetcher.fetch(1000).await.unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(
            queue.requests.lock().unwrap().as_slice(),
            &[(1000, Duration::from_secs(5))]
        );
    }

    #[tokio::test]
    async fn test_recoverable_error_reads_as_empty() {
        let queue = ScriptedQueue::new(vec![Err(TransportError::recoverable("receive", "timeout"))]);
        let fetcher = BatchFetcher::new(queue);

        assert!(fetcher.fetch(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fatal_error_propagates() {
        let queue = ScriptedQueue::new(vec![Err(TransportError::fatal("receive", "no such queue"))]);
        let fetcher = BatchFetcher::new(queue);

        let err = fetcher.fetch(10).await.unwrap_err();
        assert!(!err.recoverable);
    }

    #[tokio::test]
    async fn test_zero_max_skips_transport() {
        let queue = Arc::new(ScriptedQueue::new(Vec::new()));
        let fetcher = BatchFetcher::new(queue.clone());

        assert!(fetcher.fetch(0).await.unwrap().is_empty());
        assert!(queue.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_acknowledge_empty_is_noop() {
        let fetcher = BatchFetcher::new(ScriptedQueue::new(Vec::new()));
        assert_eq!(fetcher.acknowledge(&[]).await.unwrap(), 0);
    }
}
