// nofx-store-sql/src/codec.rs
// ============================================================================
// Module: Codec
// Description: Column-level encode/decode helpers shared by every row mapper.
// ============================================================================

use nofx_core::time::Timestamp;
use serde::Serialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::store::SqlStoreError;

/// Renders a timestamp as the RFC 3339 text this driver stores columns as.
pub fn encode_timestamp(at: Timestamp) -> Result<String, SqlStoreError> {
    at.to_rfc3339().map_err(|err| SqlStoreError::Timestamp(err.to_string()))
}

/// Parses a column's RFC 3339 text back into a [`Timestamp`].
pub fn decode_timestamp(text: &str) -> Result<Timestamp, SqlStoreError> {
    let at = OffsetDateTime::parse(text, &Rfc3339).map_err(|err| SqlStoreError::Timestamp(err.to_string()))?;
    Ok(Timestamp::from_datetime(at))
}

/// Encodes a unit string-enum (`#[serde(rename_all = "snake_case")]` or
/// similarly string-shaped) as its bare text, e.g. `RunStatus::Queued` ->
/// `"queued"`, not the quoted JSON token `serde_json::to_string` would yield.
pub fn enum_to_text<T: Serialize>(value: &T) -> Result<String, SqlStoreError> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(SqlStoreError::Invalid(format!("expected a string-shaped enum, got {other}"))),
    }
}

/// The inverse of [`enum_to_text`].
pub fn text_to_enum<T: DeserializeOwned>(text: &str) -> Result<T, SqlStoreError> {
    serde_json::from_value(serde_json::Value::String(text.to_string())).map_err(SqlStoreError::from)
}

#[cfg(test)]
mod tests {
    use nofx_core::model::RunStatus;

    use super::*;

    #[test]
    fn enum_round_trips_as_bare_text() {
        let text = enum_to_text(&RunStatus::Succeeded).expect("encode");
        assert_eq!(text, "succeeded");
        let back: RunStatus = text_to_enum(&text).expect("decode");
        assert_eq!(back, RunStatus::Succeeded);
    }

    #[test]
    fn timestamp_round_trips_through_rfc3339_text() {
        let now = Timestamp::now();
        let text = encode_timestamp(now).expect("encode");
        let back = decode_timestamp(&text).expect("decode");
        assert_eq!(back, now);
    }
}
