//! Persisted data model: settings, task records and the session log.
//!
//! Everything here crosses a persistence boundary, so field names are
//! camelCase on the wire to stay compatible with existing backups.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::timer::Phase;

pub const DEFAULT_FOCUS_MIN: u32 = 25;
pub const DEFAULT_BREAK_MIN: u32 = 5;

/// Focus and break durations in whole minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub focus_time: u32,
    pub break_time: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            focus_time: DEFAULT_FOCUS_MIN,
            break_time: DEFAULT_BREAK_MIN,
        }
    }
}

impl Settings {
    /// Build validated settings; both durations must be positive.
    pub fn new(focus_time: u32, break_time: u32) -> Result<Self, ValidationError> {
        let settings = Self {
            focus_time,
            break_time,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [("focusTime", self.focus_time), ("breakTime", self.break_time)] {
            if value == 0 {
                return Err(ValidationError::InvalidValue {
                    field: field.into(),
                    message: "must be a positive number of minutes".into(),
                });
            }
        }
        Ok(())
    }

    pub fn duration_min(&self, phase: Phase) -> u32 {
        match phase {
            Phase::Focus => self.focus_time,
            Phase::Break => self.break_time,
        }
    }

    pub fn duration_secs(&self, phase: Phase) -> u64 {
        u64::from(self.duration_min(phase)) * 60
    }
}

/// One completed focus interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub notes: String,
    #[serde(with = "millis_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl TaskRecord {
    /// Create a record stamped at `now`.
    ///
    /// The id is the epoch-millisecond value of `now`, and the timestamp is
    /// truncated to milliseconds so that it survives a JSON round trip.
    pub fn new(title: impl Into<String>, notes: impl Into<String>, now: DateTime<Utc>) -> Self {
        let timestamp = now.trunc_subsecs(3);
        Self {
            id: timestamp.timestamp_millis().to_string(),
            title: title.into(),
            notes: notes.into(),
            timestamp,
        }
    }
}

/// Append-only log of completed tasks, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionLog(Vec<TaskRecord>);

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: TaskRecord) {
        self.0.push(record);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TaskRecord> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[TaskRecord] {
        &self.0
    }

    pub fn last(&self) -> Option<&TaskRecord> {
        self.0.last()
    }
}

impl From<Vec<TaskRecord>> for SessionLog {
    fn from(records: Vec<TaskRecord>) -> Self {
        Self(records)
    }
}

impl<'a> IntoIterator for &'a SessionLog {
    type Item = &'a TaskRecord;
    type IntoIter = std::slice::Iter<'a, TaskRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// The unit of persistence: settings and session log, always written together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub settings: Settings,
    pub tasks: SessionLog,
}

impl PersistedSnapshot {
    pub fn new(settings: Settings, tasks: SessionLog) -> Self {
        Self { settings, tasks }
    }
}

/// RFC 3339 with millisecond precision and a `Z` suffix, e.g.
/// `2024-01-01T00:00:00.000Z`.
pub(crate) mod millis_timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
