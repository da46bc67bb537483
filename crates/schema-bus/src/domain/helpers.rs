//! Small value helpers shared by handlers and registry adapters.

use chrono::NaiveDate;

use super::errors::{BrokerError, CodecError};

/// Layout for calendar dates carried as strings in event payloads.
pub const DATE_LAYOUT: &str = "%Y-%m-%d";

/// Parse an optional `YYYY-MM-DD` string.
pub fn parse_date(text: Option<&str>) -> Result<NaiveDate, BrokerError> {
    match text {
        Some(text) if !text.is_empty() => {
            NaiveDate::parse_from_str(text, DATE_LAYOUT).map_err(|_| BrokerError::ParseDate)
        }
        _ => Err(BrokerError::ParseDate),
    }
}

/// Re-serialize a JSON schema without insignificant whitespace. Key order is
/// preserved.
pub fn compact_schema(raw: &str) -> Result<String, CodecError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| CodecError::InvalidSchema(e.to_string()))?;
    serde_json::to_string(&value).map_err(|e| CodecError::InvalidSchema(e.to_string()))
}
