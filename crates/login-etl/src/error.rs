//! Error taxonomy for the ETL pump
//!
//! - [`ParseError`]: one message could not become a record. Non-fatal, the
//!   message is dropped from the batch.
//! - [`LoadError`]: the store rejected a batch. Non-fatal at the loop level,
//!   the transaction is rolled back.
//! - [`TransportError`]: the queue misbehaved. Recoverable failures read as an
//!   empty fetch, anything else is fatal.
//! - [`EtlError`]: whatever terminates the loop.

use thiserror::Error;

/// Result type alias for fatal-path operations
pub type EtlResult<T> = std::result::Result<T, EtlError>;

/// Why a raw message body could not be turned into a record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Body is not decodable as a JSON object
    #[error("malformed message body: {0}")]
    Malformed(String),

    #[error("missing required field `{0}`")]
    MissingField(String),

    /// Field present but null, of the wrong type, or unusable
    #[error("invalid field shape: {0}")]
    InvalidShape(String),
}

/// A message that was rejected by the parser, with the offending body attached
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}")]
pub struct ParseError {
    /// Raw message body as received (lossy if it was not UTF-8)
    pub raw: String,
    /// Queue-assigned id of the message, when the transport reports one
    pub message_id: Option<String>,
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub fn new(raw: impl Into<String>, kind: ParseErrorKind) -> Self {
        Self {
            raw: raw.into(),
            message_id: None,
            kind,
        }
    }

    /// Attach the id of the message the body came from
    pub fn for_message(mut self, message_id: Option<&str>) -> Self {
        self.message_id = message_id.map(str::to_string);
        self
    }

    /// Classify a `serde_json` decode failure against the body it came from
    pub fn from_json(raw: &str, err: &serde_json::Error) -> Self {
        use serde_json::error::Category;

        let message = err.to_string();
        let kind = match err.classify() {
            Category::Io | Category::Syntax | Category::Eof => ParseErrorKind::Malformed(message),
            Category::Data => match missing_field_name(&message) {
                Some(field) => ParseErrorKind::MissingField(field.to_string()),
                None => ParseErrorKind::InvalidShape(message),
            },
        };

        Self::new(raw, kind)
    }
}

/// serde reports missing fields as "missing field `name` at line .. column .."
fn missing_field_name(message: &str) -> Option<&str> {
    let rest = message.strip_prefix("missing field `")?;
    rest.split('`').next()
}

/// A batch the store refused to persist; nothing from it was committed
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("database error while loading batch: {0}")]
    Database(#[from] sqlx::Error),

    #[error("batch rejected: {0}")]
    Rejected(String),
}

/// Failure talking to the queue transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("queue {operation} failed: {message}")]
pub struct TransportError {
    pub operation: &'static str,
    pub message: String,
    /// Recoverable errors are treated as "nothing to fetch right now"
    pub recoverable: bool,
}

impl TransportError {
    pub fn recoverable(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
            recoverable: true,
        }
    }

    pub fn fatal(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
            recoverable: false,
        }
    }
}

/// Errors that terminate the ETL loop
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Queue transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
