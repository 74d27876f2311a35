//! The ETL loop: fetch -> parse -> load -> acknowledge, forever
//!
//! One task runs one cycle at a time. Per cycle:
//!
//! 1. Fetch up to `batch_size` leased messages.
//! 2. Parse each one. Failures are reported and dropped from the batch.
//! 3. Load the surviving records in a single transaction.
//! 4. After the commit, acknowledge those messages so the queue forgets them.
//!
//! A batch whose load fails is never acknowledged; its messages come back once
//! their lease expires. Delivery is at-least-once.
//!
//! State machine:
//!
//! ```text
//! Starting -> Running <-> IdleBackoff
//!                |            |
//!                +-> Stopping <+ -> Stopped
//! ```
//!
//! Cancellation is honored between cycles, while waiting on the queue and
//! while idling; never between a load and its acknowledgment.

use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::EtlResult;
use crate::event::{Batch, Receipt};
use crate::observer::{EtlObserver, TracingObserver};
use crate::parser::parse;
use crate::queue::{BatchFetcher, QueueTransport, DEFAULT_BATCH_SIZE};
use crate::store::BatchLoader;

/// Default pause after a cycle with nothing to load.
pub const DEFAULT_IDLE_BACKOFF: Duration = Duration::from_secs(1);

/// What the loop does after a cycle that produced no records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdlePolicy {
    /// Sleep, then poll again. Suits a daemon that runs indefinitely.
    Backoff(Duration),
    /// Treat an empty cycle as "work complete" and shut down.
    StopWhenDrained,
}

impl Default for IdlePolicy {
    fn default() -> Self {
        IdlePolicy::Backoff(DEFAULT_IDLE_BACKOFF)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Starting,
    Running,
    IdleBackoff,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    Drained,
    Fatal,
}

/// Counters for a single cycle
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub received: usize,
    pub parsed: usize,
    pub rejected: usize,
    pub loaded: u64,
    pub acknowledged: usize,
    pub load_failed: bool,
}

/// Totals over the lifetime of one [`EtlLoop::run`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub received: u64,
    pub loaded: u64,
    pub parse_failures: u64,
    pub load_failures: u64,
    pub acknowledged: u64,
    pub stop_reason: Option<StopReason>,
}

impl RunSummary {
    fn record(&mut self, report: &CycleReport) {
        self.cycles += 1;
        self.received += report.received as u64;
        self.loaded += report.loaded;
        self.parse_failures += report.rejected as u64;
        self.load_failures += u64::from(report.load_failed);
        self.acknowledged += report.acknowledged as u64;
    }
}

/// Drives the consume-transform-load cycle over a queue and a store
pub struct EtlLoop<Q, L> {
    fetcher: BatchFetcher<Q>,
    loader: L,
    observer: Arc<dyn EtlObserver>,
    batch_size: usize,
    idle_policy: IdlePolicy,
    ack_malformed: bool,
    today: fn() -> NaiveDate,
    state: LoopState,
    summary: RunSummary,
}

fn utc_today() -> NaiveDate {
    Utc::now().date_naive()
}

impl<Q: QueueTransport, L: BatchLoader> EtlLoop<Q, L> {
    /// The loop takes ownership of `loader` and closes it when `run` returns.
    pub fn new(fetcher: BatchFetcher<Q>, loader: L) -> Self {
        Self {
            fetcher,
            loader,
            observer: Arc::new(TracingObserver),
            batch_size: DEFAULT_BATCH_SIZE,
            idle_policy: IdlePolicy::default(),
            ack_malformed: true,
            today: utc_today,
            state: LoopState::Starting,
            summary: RunSummary::default(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn EtlObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_idle_policy(mut self, policy: IdlePolicy) -> Self {
        self.idle_policy = policy;
        self
    }

    pub fn with_ack_malformed(mut self, ack: bool) -> Self {
        self.ack_malformed = ack;
        self
    }

    /// Source of the `create_date` stamped on records (UTC today by default)
    pub fn with_clock(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Run until cancelled, drained (per [`IdlePolicy`]) or a fatal error.
    ///
    /// The store connection is closed before this returns, on every path.
    pub async fn run(mut self, cancel: CancellationToken) -> EtlResult<RunSummary> {
        self.observer.started();

        let outcome = self.drive(&cancel).await;

        self.transition(LoopState::Stopping);
        if let Err(e) = self.loader.close().await {
            warn!(error = %e, "Store connection did not close cleanly");
        }
        self.transition(LoopState::Stopped);

        match outcome {
            Ok(reason) => {
                self.summary.stop_reason = Some(reason);
                self.observer.stopped(reason);
                Ok(self.summary)
            },
            Err(e) => {
                self.observer.fatal(&e);
                self.observer.stopped(StopReason::Fatal);
                Err(e)
            },
        }
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> EtlResult<StopReason> {
        self.transition(LoopState::Running);

        loop {
            match self.state {
                LoopState::Running => {
                    if cancel.is_cancelled() {
                        return Ok(StopReason::Cancelled);
                    }

                    let Some(report) = self.run_cycle(cancel).await? else {
                        return Ok(StopReason::Cancelled);
                    };

                    if report.parsed == 0 {
                        self.transition(LoopState::IdleBackoff);
                    }
                },
                LoopState::IdleBackoff => match self.idle_policy {
                    IdlePolicy::StopWhenDrained => return Ok(StopReason::Drained),
                    IdlePolicy::Backoff(interval) => {
                        tokio::select! {
                            _ = cancel.cancelled() => return Ok(StopReason::Cancelled),
                            _ = tokio::time::sleep(interval) => self.transition(LoopState::Running),
                        }
                    },
                },
                LoopState::Starting | LoopState::Stopping | LoopState::Stopped => {
                    self.transition(LoopState::Running);
                },
            }
        }
    }

    /// One fetch -> parse -> load -> acknowledge pass.
    ///
    /// Returns `None` if cancelled while waiting on the queue.
    #[instrument(skip_all, fields(cycle = self.summary.cycles + 1))]
    async fn run_cycle(&mut self, cancel: &CancellationToken) -> EtlResult<Option<CycleReport>> {
        let messages = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            fetched = self.fetcher.fetch(self.batch_size) => fetched?,
        };

        let mut report = CycleReport {
            received: messages.len(),
            ..CycleReport::default()
        };

        let processed_on = (self.today)();
        let mut batch = Batch::with_capacity(messages.len());

        for message in messages {
            match parse(&message, processed_on) {
                Ok(record) => batch.push(message.receipt, record),
                Err(e) => {
                    self.observer.parse_failed(&e);
                    batch.reject(message.receipt);
                },
            }
        }

        report.parsed = batch.len();
        report.rejected = batch.rejected().len();

        if self.ack_malformed {
            report.acknowledged +=
                acknowledge(&self.fetcher, self.observer.as_ref(), batch.rejected()).await;
        }

        if batch.is_empty() {
            self.observer.idle();
        } else {
            match self.loader.load(batch.records()).await {
                Ok(loaded) => {
                    report.loaded = loaded;
                    report.acknowledged +=
                        acknowledge(&self.fetcher, self.observer.as_ref(), batch.receipts()).await;
                },
                Err(e) => {
                    report.load_failed = true;
                    self.observer.load_failed(&e, batch.len());
                },
            }
        }

        self.summary.record(&report);
        if report.received > 0 {
            self.observer.cycle_completed(&report);
        }

        Ok(Some(report))
    }

    fn transition(&mut self, next: LoopState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "ETL loop state change");
            self.state = next;
        }
    }
}

/// Acknowledge `receipts`, reporting instead of propagating failures: an
/// unacknowledged message is only redelivered, never lost.
async fn acknowledge<Q: QueueTransport>(
    fetcher: &BatchFetcher<Q>,
    observer: &dyn EtlObserver,
    receipts: &[Receipt],
) -> usize {
    if receipts.is_empty() {
        return 0;
    }

    match fetcher.acknowledge(receipts).await {
        Ok(acknowledged) => acknowledged,
        Err(e) => {
            observer.ack_failed(&e, receipts.len());
            0
        },
    }
}
