//! Login ETL Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Drains user-login events from an SQS queue, masks the personally
//! identifiable fields, and loads the flattened records into PostgreSQL in
//! atomic batches.
//!
//! # Architecture
//!
//! - **Queue** ([`queue`]): `QueueTransport` port, SQS implementation, and the
//!   `BatchFetcher` that applies batch size and lease policy
//! - **Parser** ([`parser`]): raw message -> `NormalizedRecord` or `ParseError`
//! - **Store** ([`store`]): `BatchLoader` port and the PostgreSQL loader
//! - **Pipeline** ([`pipeline`]): the `EtlLoop` state machine tying it together
//! - **Observer** ([`observer`]): injected sink for lifecycle and failure events
//!
//! Delivery is at-least-once: messages are acknowledged only after their batch
//! commits, and anything unacknowledged is redelivered by the queue.
//!
//! # Example
//!
//! ```no_run
//! use login_etl::{
//!     config::Config,
//!     pipeline::EtlLoop,
//!     queue::{BatchFetcher, SqsQueue},
//!     store::PgBatchLoader,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let queue = SqsQueue::from_config(&config.queue).await;
//!     let loader = PgBatchLoader::connect(&config.database).await?;
//!
//!     let summary = EtlLoop::new(BatchFetcher::new(queue), loader)
//!         .with_batch_size(config.pipeline.batch_size)
//!         .run(CancellationToken::new())
//!         .await?;
//!
//!     println!("loaded {} records", summary.loaded);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod observer;
pub mod parser;
pub mod pipeline;
pub mod queue;
pub mod store;

// Re-export commonly used types
pub use error::{EtlError, EtlResult, LoadError, ParseError, TransportError};
pub use event::{NormalizedRecord, RawMessage, Receipt};
pub use pipeline::{EtlLoop, IdlePolicy, RunSummary, StopReason};
