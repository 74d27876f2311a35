//! Data model: raw queue messages, decoded login events and normalized records

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Opaque acknowledgment handle issued by the queue for one delivery
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Receipt(String);

impl Receipt {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One message as delivered by the queue transport
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub message_id: Option<String>,
    pub body: String,
    pub receipt: Receipt,
}

impl RawMessage {
    pub fn new(body: impl Into<String>, receipt: Receipt) -> Self {
        Self {
            message_id: None,
            body: body.into(),
            receipt,
        }
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }
}

/// Typed view of a login event body. Extra fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginEventPayload {
    pub user_id: String,
    pub device_type: String,
    pub ip: String,
    pub device_id: String,
    pub locale: String,
    pub app_version: String,
}

/// The flattened, PII-masked row that lands in `user_logins`.
///
/// Only the parser builds these, so every instance has all fields populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedRecord {
    user_id: String,
    device_type: String,
    masked_ip: String,
    masked_device_id: String,
    locale: String,
    app_version_major: String,
    create_date: NaiveDate,
}

impl NormalizedRecord {
    pub(crate) fn new(
        user_id: String,
        device_type: String,
        masked_ip: String,
        masked_device_id: String,
        locale: String,
        app_version_major: String,
        create_date: NaiveDate,
    ) -> Self {
        Self {
            user_id,
            device_type,
            masked_ip,
            masked_device_id,
            locale,
            app_version_major,
            create_date,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    pub fn masked_ip(&self) -> &str {
        &self.masked_ip
    }

    pub fn masked_device_id(&self) -> &str {
        &self.masked_device_id
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn app_version_major(&self) -> &str {
        &self.app_version_major
    }

    pub fn create_date(&self) -> NaiveDate {
        self.create_date
    }
}

/// Records parsed in one cycle, plus the receipts needed to acknowledge them
#[derive(Debug, Default)]
pub struct Batch {
    records: Vec<NormalizedRecord>,
    receipts: Vec<Receipt>,
    rejected: Vec<Receipt>,
}

impl Batch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            receipts: Vec::with_capacity(capacity),
            rejected: Vec::new(),
        }
    }

    pub fn push(&mut self, receipt: Receipt, record: NormalizedRecord) {
        self.receipts.push(receipt);
        self.records.push(record);
    }

    /// Remember a message the parser refused, so it can be acknowledged separately
    pub fn reject(&mut self, receipt: Receipt) {
        self.rejected.push(receipt);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[NormalizedRecord] {
        &self.records
    }

    /// Receipts of the messages behind [`Batch::records`], in the same order
    pub fn receipts(&self) -> &[Receipt] {
        &self.receipts
    }

    pub fn rejected(&self) -> &[Receipt] {
        &self.rejected
    }
}
