// forge-ctl-core/src/core/time.rs
// ============================================================================
// Module: Timestamps
// Description: Canonical timestamp type used across the persisted data model.
// Purpose: Wrap `time::OffsetDateTime` so call sites never format ad hoc.
// Dependencies: time, serde
// ============================================================================

//! ## Overview
//! All persisted timestamps are UTC and RFC 3339 on the wire. [`Timestamp`]
//! wraps `time::OffsetDateTime` rather than exposing it directly so the
//! serialization form is pinned in one place.

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// A UTC point in time, RFC 3339 on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(OffsetDateTime);

impl Timestamp {
    /// Wraps an existing `OffsetDateTime`, normalizing to UTC.
    #[must_use]
    pub fn from_offset(value: OffsetDateTime) -> Self {
        Self(value.to_offset(time::UtcOffset::UTC))
    }

    /// Returns the wrapped `OffsetDateTime`.
    #[must_use]
    pub fn as_offset(&self) -> OffsetDateTime {
        self.0
    }

    /// Returns true when `self` is strictly before `other`.
    #[must_use]
    pub fn is_before(&self, other: &Self) -> bool {
        self.0 < other.0
    }

    /// Returns a new timestamp offset by the given duration.
    #[must_use]
    pub fn plus(&self, duration: time::Duration) -> Self {
        Self(self.0 + duration)
    }
}

impl Serialize for Timestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let formatted = self.0.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&formatted)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let parsed = OffsetDateTime::parse(&raw, &Rfc3339).map_err(serde::de::Error::custom)?;
        Ok(Self::from_offset(parsed))
    }
}

/// A source of wall-clock time, injectable for deterministic tests.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

/// Clock backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_offset(OffsetDateTime::now_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_rfc3339() {
        let now = SystemClock.now();
        let json = serde_json::to_string(&now).expect("serialize");
        let back: Timestamp = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(now.as_offset().unix_timestamp(), back.as_offset().unix_timestamp());
    }

    #[test]
    fn plus_advances_forward() {
        let now = SystemClock.now();
        let later = now.plus(time::Duration::minutes(30));
        assert!(now.is_before(&later));
    }
}
