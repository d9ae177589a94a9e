//! Defines custom `DateTime` type.

use std::fmt;
use std::ops::Add;

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::Duration;

/// Thin wrapper around a `chrono::DateTime<Utc>`.
///
/// Serialised to/from JSON as an RFC3339 date string; sorted-set scores use
/// the unix-second value.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, PartialOrd, Serialize)]
pub struct DateTime(pub chrono::DateTime<Utc>);

impl DateTime {
    /// Get current UTC date/time.
    pub fn now() -> Self {
        DateTime(Utc::now())
    }

    /// Get this date/time as seconds since the unix epoch.
    pub fn unix(&self) -> i64 {
        self.0.timestamp()
    }

    /// Build a date/time from seconds since the unix epoch.
    pub fn from_unix(secs: i64) -> Self {
        DateTime(Utc.timestamp_opt(secs, 0).single().unwrap_or_default())
    }

    /// Get number of seconds elapsed since another given date/time.
    pub fn seconds_since(&self, other: &DateTime) -> i64 {
        self.0.signed_duration_since(other.0).num_seconds()
    }
}

impl Add<Duration> for DateTime {
    type Output = DateTime;

    fn add(self, rhs: Duration) -> DateTime {
        DateTime(self.0 + chrono::Duration::seconds(rhs.as_secs() as i64))
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
