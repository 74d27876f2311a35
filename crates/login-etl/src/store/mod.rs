//! Store side of the pump: the all-or-nothing batch loader port

use async_trait::async_trait;

use crate::error::LoadError;
use crate::event::NormalizedRecord;

pub mod postgres;

pub use postgres::PgBatchLoader;

/// Persists whole batches atomically.
///
/// A loader owns its store connection for the lifetime of the ETL loop.
#[async_trait]
pub trait BatchLoader: Send {
    /// Write every record or none of them. Returns the number of rows written.
    async fn load(&mut self, records: &[NormalizedRecord]) -> Result<u64, LoadError>;

    /// Release the underlying connection. Called exactly once, on loop exit.
    async fn close(&mut self) -> Result<(), LoadError> {
        Ok(())
    }
}
