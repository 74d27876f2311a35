//! Observability port for the ETL loop
//!
//! The loop reports lifecycle and failure events to an injected
//! [`EtlObserver`] instead of a global logger, so tests can assert on exactly
//! what was reported. [`TracingObserver`] is the production implementation.

use tracing::{error, info, warn};

use crate::error::{EtlError, LoadError, ParseError, TransportError};
use crate::pipeline::{CycleReport, StopReason};

/// Receiver of ETL loop events
pub trait EtlObserver: Send + Sync {
    fn started(&self) {}

    fn cycle_completed(&self, _report: &CycleReport) {}

    /// A message was dropped from its batch. `error.raw` holds the payload.
    fn parse_failed(&self, _error: &ParseError) {}

    fn load_failed(&self, _error: &LoadError, _records: usize) {}

    fn ack_failed(&self, _error: &TransportError, _receipts: usize) {}

    /// A cycle produced nothing to load
    fn idle(&self) {}

    fn stopped(&self, _reason: StopReason) {}

    fn fatal(&self, _error: &EtlError) {}
}

/// Reports events as structured `tracing` events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl EtlObserver for TracingObserver {
    fn started(&self) {
        info!("ETL process started");
    }

    fn cycle_completed(&self, report: &CycleReport) {
        info!(
            received = report.received,
            parsed = report.parsed,
            rejected = report.rejected,
            loaded = report.loaded,
            acknowledged = report.acknowledged,
            "Cycle completed"
        );
    }

    fn parse_failed(&self, error: &ParseError) {
        error!(
            error = %error,
            message_id = ?error.message_id,
            raw = %error.raw,
            "Dropping message that failed to parse"
        );
    }

    fn load_failed(&self, error: &LoadError, records: usize) {
        error!(error = %error, records, "Batch load failed, transaction rolled back");
    }

    fn ack_failed(&self, error: &TransportError, receipts: usize) {
        warn!(
            error = %error,
            receipts,
            "Failed to acknowledge messages, they will be redelivered"
        );
    }

    fn idle(&self) {
        info!("No messages found in the queue");
    }

    fn stopped(&self, reason: StopReason) {
        match reason {
            StopReason::Cancelled => info!("ETL process stopped by shutdown signal"),
            StopReason::Drained => info!("ETL process stopped, queue drained"),
            StopReason::Fatal => error!("ETL process stopped after a fatal error"),
        }
    }

    fn fatal(&self, error: &EtlError) {
        error!(error = ?error, "Unexpected error during ETL process");
    }
}
