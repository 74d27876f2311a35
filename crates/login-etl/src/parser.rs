//! Message parser: raw queue message -> masked, flattened record

use chrono::NaiveDate;
use login_etl_common::masking::mask;
use serde_json::Value;

use crate::error::{ParseError, ParseErrorKind};
use crate::event::{LoginEventPayload, NormalizedRecord, RawMessage};

/// Decode, validate and mask one message.
///
/// `processed_on` becomes the record's `create_date`; the payload carries no
/// date of its own that is trusted.
pub fn parse(raw: &RawMessage, processed_on: NaiveDate) -> Result<NormalizedRecord, ParseError> {
    decode(&raw.body, processed_on).map_err(|e| e.for_message(raw.message_id.as_deref()))
}

fn decode(body: &str, processed_on: NaiveDate) -> Result<NormalizedRecord, ParseError> {
    let value: Value = serde_json::from_str(body).map_err(|e| ParseError::from_json(body, &e))?;

    // Fields are looked up by name; arrays and scalars have none
    let object = match value {
        Value::Object(object) => object,
        other => {
            return Err(ParseError::new(
                body,
                ParseErrorKind::InvalidShape(format!(
                    "expected a JSON object, found {}",
                    json_type(&other)
                )),
            ))
        },
    };

    let payload: LoginEventPayload = serde_json::from_value(Value::Object(object))
        .map_err(|e| ParseError::from_json(body, &e))?;

    if payload.app_version.is_empty() {
        return Err(ParseError::new(
            body,
            ParseErrorKind::InvalidShape("`app_version` is empty".to_string()),
        ));
    }

    let app_version_major = major_version(&payload.app_version).to_string();

    Ok(NormalizedRecord::new(
        payload.user_id,
        payload.device_type,
        mask(&payload.ip),
        mask(&payload.device_id),
        payload.locale,
        app_version_major,
        processed_on,
    ))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Everything before the first `.`, or the whole string when there is none
pub fn major_version(app_version: &str) -> &str {
    app_version
        .split_once('.')
        .map_or(app_version, |(major, _)| major)
}
