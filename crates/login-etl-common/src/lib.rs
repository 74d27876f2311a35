//! Login ETL Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities for the login ETL workspace.
//!
//! # Overview
//!
//! - **Masking**: one-way SHA-256 redaction of sensitive fields
//! - **Logging**: process-wide `tracing` subscriber setup
//!
//! # Example
//!
//! ```
//! use login_etl_common::masking::mask;
//!
//! let digest = mask("1.2.3.4");
//! assert_eq!(digest.len(), 64);
//! ```

pub mod logging;
pub mod masking;

pub use masking::mask;
