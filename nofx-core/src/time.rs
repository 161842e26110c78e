// nofx-core/src/time.rs
// ============================================================================
// Module: Timestamps
// Description: UTC instant with millisecond precision used across the data model.
// ============================================================================

//! Every `created_at`/`started_at`/`ended_at` field in §3 is a UTC instant with
//! millisecond precision. `Timestamp` wraps `time::OffsetDateTime` and truncates to
//! milliseconds on construction so two timestamps taken in the same millisecond
//! compare equal, matching the ordering tie-break rule in §3 ("ties broken by id").

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// A UTC instant truncated to millisecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(#[serde(with = "time::serde::rfc3339")] OffsetDateTime);

impl Timestamp {
    /// Returns the current instant, truncated to millisecond precision.
    #[must_use]
    pub fn now() -> Self {
        Self::from_datetime(OffsetDateTime::now_utc())
    }

    /// Truncates an arbitrary `OffsetDateTime` to millisecond precision.
    #[must_use]
    pub fn from_datetime(at: OffsetDateTime) -> Self {
        let millis = at.millisecond();
        let truncated = at.replace_nanosecond(u32::from(millis) * 1_000_000).unwrap_or(at);
        Self(truncated)
    }

    /// Returns the wrapped `OffsetDateTime`.
    #[must_use]
    pub const fn as_datetime(&self) -> OffsetDateTime {
        self.0
    }

    /// Returns milliseconds since the Unix epoch.
    #[must_use]
    pub fn unix_millis(&self) -> i64 {
        self.0.unix_timestamp() * 1000 + i64::from(self.0.millisecond())
    }

    /// Renders as an RFC 3339 string.
    ///
    /// # Errors
    ///
    /// Returns an error if formatting fails (practically unreachable for a valid
    /// `OffsetDateTime`).
    pub fn to_rfc3339(&self) -> Result<String, time::error::Format> {
        self.0.format(&Rfc3339)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_rfc3339() {
            Ok(s) => f.write_str(&s),
            Err(_err) => write!(f, "{}", self.unix_millis()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_to_millisecond_precision() {
        let at = OffsetDateTime::now_utc();
        let ts = Timestamp::from_datetime(at);
        assert_eq!(ts.as_datetime().microsecond() % 1000, 0);
    }

    #[test]
    fn orders_by_instant() {
        let earlier = Timestamp::from_datetime(OffsetDateTime::UNIX_EPOCH);
        let later = Timestamp::from_datetime(OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(1));
        assert!(earlier < later);
    }
}
