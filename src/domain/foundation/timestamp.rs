//! Timestamp value object for immutable points in time.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Immutable point in time, always UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a timestamp for the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a timestamp from a DateTime<Utc>.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the inner DateTime.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Checks if this timestamp is before another.
    pub fn is_before(&self, other: &Timestamp) -> bool {
        self.0 < other.0
    }

    /// Checks if this timestamp is after another.
    pub fn is_after(&self, other: &Timestamp) -> bool {
        self.0 > other.0
    }

    /// Creates a new timestamp by adding the specified number of days.
    ///
    /// Negative values subtract days.
    pub fn add_days(&self, days: i64) -> Self {
        Self(self.0 + Duration::days(days))
    }

    /// Creates a new timestamp by adding the specified number of seconds.
    pub fn plus_secs(&self, secs: i64) -> Self {
        Self(self.0 + Duration::seconds(secs))
    }

    /// Creates a timestamp from provider Unix seconds.
    ///
    /// Returns `None` for zero, negative or out-of-range values, which
    /// providers use to mean "unset".
    pub fn from_unix_secs(secs: i64) -> Option<Self> {
        if secs <= 0 {
            return None;
        }
        Utc.timestamp_opt(secs, 0).single().map(Self)
    }

    /// Returns the timestamp as Unix seconds.
    pub fn as_unix_secs(&self) -> i64 {
        self.0.timestamp()
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_now_creates_current_time() {
        let before = Utc::now();
        let ts = Timestamp::now();
        let after = Utc::now();

        assert!(ts.as_datetime() >= &before);
        assert!(ts.as_datetime() <= &after);
    }

    #[test]
    fn timestamp_is_before_and_after_work_correctly() {
        let earlier = Timestamp::from_unix_secs(1_700_000_000).unwrap();
        let later = Timestamp::from_unix_secs(1_700_000_100).unwrap();

        assert!(earlier.is_before(&later));
        assert!(later.is_after(&earlier));
        assert!(!earlier.is_after(&earlier));
    }

    #[test]
    fn timestamp_from_unix_secs_roundtrips() {
        let ts = Timestamp::from_unix_secs(1_704_067_200).unwrap();
        assert_eq!(ts.as_unix_secs(), 1_704_067_200);
    }

    #[test]
    fn timestamp_from_unix_secs_treats_zero_as_unset() {
        assert!(Timestamp::from_unix_secs(0).is_none());
        assert!(Timestamp::from_unix_secs(-5).is_none());
    }

    #[test]
    fn timestamp_add_days_and_secs() {
        let ts = Timestamp::from_unix_secs(1_704_067_200).unwrap();
        assert_eq!(ts.add_days(1).as_unix_secs(), 1_704_067_200 + 86_400);
        assert_eq!(ts.plus_secs(30).as_unix_secs(), 1_704_067_230);
    }

    #[test]
    fn timestamp_serializes_as_rfc3339() {
        let ts = Timestamp::from_unix_secs(1_704_067_200).unwrap();
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"2024-01-01T00:00:00Z\"");

        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }
}
