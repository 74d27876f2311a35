//! In-memory stand-ins for the queue, the store and the log sink
//!
//! - [`MemoryQueue`]: leases messages, deletes them on acknowledgment, and can
//!   redeliver anything unacknowledged on the next receive
//! - [`MemoryStore`]: applies batches atomically, can be told to fail
//! - [`RecordingObserver`]: keeps every reported event for assertions

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use chrono::NaiveDate;
use login_etl::{
    error::{EtlError, LoadError, ParseError, TransportError},
    event::{NormalizedRecord, RawMessage, Receipt},
    observer::EtlObserver,
    pipeline::{CycleReport, StopReason},
    queue::QueueTransport,
    store::BatchLoader,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("login_etl=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn fixed_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
}

pub fn login_body(user: &str, ip: &str, device_id: &str, app_version: &str) -> String {
    serde_json::json!({
        "user_id": user,
        "device_type": "android",
        "ip": ip,
        "device_id": device_id,
        "locale": "en-US",
        "app_version": app_version,
    })
    .to_string()
}

pub fn valid_bodies(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| login_body(&format!("user-{i}"), &format!("10.0.0.{i}"), &format!("dev-{i}"), "2.3.0"))
        .collect()
}

// ============================================================================
// Queue
// ============================================================================

#[derive(Default)]
struct QueueState {
    pending: VecDeque<RawMessage>,
    in_flight: HashMap<Receipt, RawMessage>,
    acknowledged: Vec<Receipt>,
    receive_calls: usize,
    leases: Vec<Duration>,
    next_receipt: usize,
    receive_errors: VecDeque<TransportError>,
    ack_error: Option<TransportError>,
}

/// Queue whose leases expire at the next receive when `redeliver` is on
#[derive(Clone, Default)]
pub struct MemoryQueue {
    state: Arc<Mutex<QueueState>>,
    redeliver: bool,
}

impl MemoryQueue {
    pub fn with_bodies<I, S>(bodies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queue = Self::default();
        for body in bodies {
            queue.send(body);
        }
        queue
    }

    pub fn redelivering(mut self) -> Self {
        self.redeliver = true;
        self
    }

    pub fn send(&self, body: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        state.next_receipt += 1;
        let receipt = Receipt::new(format!("receipt-{}", state.next_receipt));
        state.pending.push_back(RawMessage::new(body, receipt));
    }

    pub fn fail_next_receive(&self, error: TransportError) {
        self.state.lock().unwrap().receive_errors.push_back(error);
    }

    pub fn fail_acknowledgments(&self, error: TransportError) {
        self.state.lock().unwrap().ack_error = Some(error);
    }

    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().unwrap().in_flight.len()
    }

    pub fn acknowledged(&self) -> usize {
        self.state.lock().unwrap().acknowledged.len()
    }

    pub fn receive_calls(&self) -> usize {
        self.state.lock().unwrap().receive_calls
    }

    pub fn leases(&self) -> Vec<Duration> {
        self.state.lock().unwrap().leases.clone()
    }
}

#[async_trait]
impl QueueTransport for MemoryQueue {
    async fn receive_batch(
        &self,
        max: usize,
        lease: Duration,
    ) -> Result<Vec<RawMessage>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.receive_calls += 1;
        state.leases.push(lease);

        if let Some(error) = state.receive_errors.pop_front() {
            return Err(error);
        }

        if self.redeliver {
            let expired: Vec<_> = state.in_flight.drain().map(|(_, m)| m).collect();
            state.pending.extend(expired);
        }

        let take = max.min(state.pending.len());
        let messages: Vec<RawMessage> = state.pending.drain(..take).collect();
        for message in &messages {
            state.in_flight.insert(message.receipt.clone(), message.clone());
        }

        Ok(messages)
    }

    async fn acknowledge(&self, receipts: &[Receipt]) -> Result<usize, TransportError> {
        let mut state = self.state.lock().unwrap();

        if let Some(error) = state.ack_error.clone() {
            return Err(error);
        }

        let mut deleted = 0;
        for receipt in receipts {
            if state.in_flight.remove(receipt).is_some() {
                state.acknowledged.push(receipt.clone());
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Default)]
struct StoreState {
    rows: Vec<NormalizedRecord>,
    load_calls: Vec<usize>,
    failures_left: usize,
    close_calls: usize,
}

/// Store that commits whole batches or nothing
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn fail_next_loads(&self, count: usize) {
        self.state.lock().unwrap().failures_left = count;
    }

    pub fn rows(&self) -> Vec<NormalizedRecord> {
        self.state.lock().unwrap().rows.clone()
    }

    pub fn load_calls(&self) -> Vec<usize> {
        self.state.lock().unwrap().load_calls.clone()
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().unwrap().close_calls
    }
}

#[async_trait]
impl BatchLoader for MemoryStore {
    async fn load(&mut self, records: &[NormalizedRecord]) -> Result<u64, LoadError> {
        let mut state = self.state.lock().unwrap();
        state.load_calls.push(records.len());

        // Stage everything, fail halfway through if asked, publish only at the end
        let mut staged = Vec::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            if state.failures_left > 0 && i == records.len() / 2 {
                state.failures_left -= 1;
                return Err(LoadError::Rejected(format!("simulated failure at row {i}")));
            }
            staged.push(record.clone());
        }

        state.rows.extend(staged);
        Ok(records.len() as u64)
    }

    async fn close(&mut self) -> Result<(), LoadError> {
        self.state.lock().unwrap().close_calls += 1;
        Ok(())
    }
}

// ============================================================================
// Observer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Started,
    Cycle(CycleReport),
    ParseFailed { raw: String, cause: String },
    LoadFailed { records: usize },
    AckFailed { receipts: usize },
    Idle,
    Stopped(StopReason),
    Fatal(String),
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Event>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn parse_failures(&self) -> Vec<(String, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::ParseFailed { raw, cause } => Some((raw, cause)),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, matcher: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| matcher(e)).count()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl EtlObserver for RecordingObserver {
    fn started(&self) {
        self.push(Event::Started);
    }

    fn cycle_completed(&self, report: &CycleReport) {
        self.push(Event::Cycle(report.clone()));
    }

    fn parse_failed(&self, error: &ParseError) {
        self.push(Event::ParseFailed {
            raw: error.raw.clone(),
            cause: error.to_string(),
        });
    }

    fn load_failed(&self, _error: &LoadError, records: usize) {
        self.push(Event::LoadFailed { records });
    }

    fn ack_failed(&self, _error: &TransportError, receipts: usize) {
        self.push(Event::AckFailed { receipts });
    }

    fn idle(&self) {
        self.push(Event::Idle);
    }

    fn stopped(&self, reason: StopReason) {
        self.push(Event::Stopped(reason));
    }

    fn fatal(&self, error: &EtlError) {
        self.push(Event::Fatal(error.to_string()));
    }
}
