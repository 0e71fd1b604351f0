use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Settings, TaskRecord};
use crate::sync::SyncStatus;
use crate::timer::Phase;

/// Every state change in the system produces an Event.
/// The CLI prints them; tests assert on them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    TimerArmed {
        phase: Phase,
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    TimerDisarmed {
        phase: Phase,
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    TimerReset {
        phase: Phase,
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    /// A phase ran out. `task` is set when a focus phase with a pending
    /// task ended and a record was appended to the session log.
    PhaseCompleted {
        from: Phase,
        to: Phase,
        task: Option<TaskRecord>,
        at: DateTime<Utc>,
    },
    SettingsChanged {
        settings: Settings,
        at: DateTime<Utc>,
    },
    /// In-memory state was replaced from outside the timer (remote push,
    /// local fallback, or import).
    StateReplaced {
        source: ReplaceSource,
        task_count: usize,
        at: DateTime<Utc>,
    },
    SyncStatusChanged {
        status: SyncStatus,
        at: DateTime<Utc>,
    },
    StateSnapshot {
        phase: Phase,
        armed: bool,
        remaining_secs: u64,
        total_secs: u64,
        display: String,
        pending_title: String,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceSource {
    Remote,
    LocalFallback,
    LocalLoad,
    Import,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_by_type() {
        let event = Event::TimerReset {
            phase: Phase::Break,
            remaining_secs: 300,
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "TimerReset");
        assert_eq!(json["phase"], "break");
        assert_eq!(json["remaining_secs"], 300);
    }
}
