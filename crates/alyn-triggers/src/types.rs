use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TriggerError};

/// Lifecycle state of a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerStatus {
    /// Eligible for dispatch when `next_fire` arrives.
    Active,
    /// Retained but never dispatched.
    Paused,
    /// A one-shot that fired successfully, or an exhausted recurrence.
    Completed,
}

impl std::fmt::Display for TriggerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TriggerStatus::Active => "active",
            TriggerStatus::Paused => "paused",
            TriggerStatus::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TriggerStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(TriggerStatus::Active),
            "paused" => Ok(TriggerStatus::Paused),
            "completed" => Ok(TriggerStatus::Completed),
            other => Err(format!("unknown trigger status: {other}")),
        }
    }
}

/// A persisted trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRecord {
    /// SQLite rowid.
    pub id: i64,
    /// Execution agent woken when the trigger fires.
    pub agent_name: String,
    /// Raw instruction text forwarded in the fire-time prompt.
    pub payload: String,
    /// RFC 5545 RRULE string; `None` for one-shot triggers.
    pub recurrence_rule: Option<String>,
    /// UTC timestamp of the first scheduled occurrence.
    pub start_time: String,
    /// UTC timestamp of the next dispatch; `None` once a one-shot has
    /// fired or the trigger completed.
    pub next_fire: Option<String>,
    /// IANA zone the recurrence rule is evaluated in.
    pub timezone: String,
    pub status: TriggerStatus,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TriggerRecord {
    pub fn next_fire_at(&self) -> Option<DateTime<Utc>> {
        self.next_fire.as_deref().and_then(|s| parse_timestamp(s).ok())
    }
}

/// Render a UTC instant in the storage format (`2026-08-01T09:30:00Z`).
pub fn to_storage_timestamp(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Parse a stored or user-supplied timestamp, accepting any RFC 3339
/// offset and normalising to UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| TriggerError::InvalidTimestamp(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_timestamp_round_trips() {
        let now = Utc::now();
        let stored = to_storage_timestamp(now);
        let parsed = parse_timestamp(&stored).unwrap();
        assert_eq!(parsed.timestamp(), now.timestamp());
    }

    #[test]
    fn parse_accepts_offsets() {
        let parsed = parse_timestamp("2026-08-01T12:00:00+02:00").unwrap();
        assert_eq!(to_storage_timestamp(parsed), "2026-08-01T10:00:00Z");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_timestamp("tomorrow at noon").is_err());
    }
}
