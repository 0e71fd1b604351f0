//! Timer engine implementation.
//!
//! The timer engine is a tick-driven state machine. It does not own a
//! thread or a clock; the caller delivers one `tick()` per elapsed second
//! while the engine is armed and supplies "now" for task timestamps.
//!
//! ## Phase Transitions
//!
//! ```text
//! Focus --(remaining hits 0)--> Break --(remaining hits 0)--> Focus
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let mut engine = TimerEngine::new(&settings);
//! engine.set_pending_task("Write report", "");
//! engine.toggle();
//! // Once per second:
//! engine.tick(&settings, &mut log, clock.now()); // Some(Event) on phase change
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::Event;
use crate::model::{SessionLog, Settings, TaskRecord};

/// The two mutually exclusive timer modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Focus,
    Break,
}

impl Phase {
    pub fn other(self) -> Self {
        match self {
            Phase::Focus => Phase::Break,
            Phase::Break => Phase::Focus,
        }
    }
}

/// Core timer engine. Runtime state only; nothing here is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerEngine {
    phase: Phase,
    remaining_secs: u64,
    armed: bool,
    pending_title: String,
    pending_notes: String,
}

impl TimerEngine {
    /// Create an engine in `Focus`, disarmed, with the full focus duration.
    pub fn new(settings: &Settings) -> Self {
        Self {
            phase: Phase::Focus,
            remaining_secs: settings.duration_secs(Phase::Focus),
            armed: false,
            pending_title: String::new(),
            pending_notes: String::new(),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn remaining_secs(&self) -> u64 {
        self.remaining_secs
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn pending_title(&self) -> &str {
        &self.pending_title
    }

    pub fn pending_notes(&self) -> &str {
        &self.pending_notes
    }

    /// Whether `toggle()` would arm the engine right now.
    pub fn can_arm(&self) -> bool {
        !(self.phase == Phase::Focus && self.pending_title.is_empty())
    }

    /// Build a full state snapshot event.
    pub fn snapshot(&self, settings: &Settings) -> Event {
        Event::StateSnapshot {
            phase: self.phase,
            armed: self.armed,
            remaining_secs: self.remaining_secs,
            total_secs: settings.duration_secs(self.phase),
            display: format_clock(self.remaining_secs),
            pending_title: self.pending_title.clone(),
            at: Utc::now(),
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Set the task the current focus interval is for.
    pub fn set_pending_task(&mut self, title: impl Into<String>, notes: impl Into<String>) {
        self.pending_title = title.into();
        self.pending_notes = notes.into();
    }

    /// Flip `armed`. Arming in `Focus` without a pending task is refused
    /// and returns `None`.
    pub fn toggle(&mut self) -> Option<Event> {
        if self.armed {
            self.armed = false;
            return Some(Event::TimerDisarmed {
                phase: self.phase,
                remaining_secs: self.remaining_secs,
                at: Utc::now(),
            });
        }
        if !self.can_arm() {
            return None;
        }
        self.armed = true;
        Some(Event::TimerArmed {
            phase: self.phase,
            remaining_secs: self.remaining_secs,
            at: Utc::now(),
        })
    }

    /// Restore the current phase's full duration. `armed` is left alone.
    pub fn reset(&mut self, settings: &Settings) -> Option<Event> {
        self.remaining_secs = settings.duration_secs(self.phase);
        Some(Event::TimerReset {
            phase: self.phase,
            remaining_secs: self.remaining_secs,
            at: Utc::now(),
        })
    }

    /// React to new settings. A disarmed engine re-derives its countdown;
    /// a running countdown keeps going and only later phases pick it up.
    pub fn apply_settings(&mut self, settings: &Settings) {
        if !self.armed {
            self.remaining_secs = settings.duration_secs(self.phase);
        }
    }

    /// Advance by one second. Returns `Some(Event::PhaseCompleted)` when
    /// the current phase finishes.
    pub fn tick(
        &mut self,
        settings: &Settings,
        log: &mut SessionLog,
        now: DateTime<Utc>,
    ) -> Option<Event> {
        if !self.armed {
            return None;
        }
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs > 0 {
            return None;
        }
        Some(self.complete_phase(settings, log, now))
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn complete_phase(
        &mut self,
        settings: &Settings,
        log: &mut SessionLog,
        now: DateTime<Utc>,
    ) -> Event {
        let from = self.phase;
        let mut task = None;
        if from == Phase::Focus && !self.pending_title.is_empty() {
            let record = TaskRecord::new(
                std::mem::take(&mut self.pending_title),
                std::mem::take(&mut self.pending_notes),
                now,
            );
            log.push(record.clone());
            task = Some(record);
        }

        self.phase = from.other();
        self.remaining_secs = settings.duration_secs(self.phase);

        Event::PhaseCompleted {
            from,
            to: self.phase,
            task,
            at: now,
        }
    }
}

/// Render seconds as zero-padded `mm:ss`.
pub fn format_clock(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn armed_engine(settings: &Settings, title: &str) -> TimerEngine {
        let mut engine = TimerEngine::new(settings);
        engine.set_pending_task(title, "notes");
        assert!(engine.toggle().is_some());
        engine
    }

    #[test]
    fn starts_in_focus_disarmed() {
        let engine = TimerEngine::new(&Settings::default());
        assert_eq!(engine.phase(), Phase::Focus);
        assert_eq!(engine.remaining_secs(), 25 * 60);
        assert!(!engine.is_armed());
    }

    #[test]
    fn arming_focus_without_task_is_refused() {
        let mut engine = TimerEngine::new(&Settings::default());
        assert!(engine.toggle().is_none());
        assert!(!engine.is_armed());
    }

    #[test]
    fn toggle_keeps_remaining_time() {
        let settings = Settings::default();
        let mut log = SessionLog::new();
        let mut engine = armed_engine(&settings, "Write");
        engine.tick(&settings, &mut log, now());
        engine.tick(&settings, &mut log, now());
        assert!(matches!(engine.toggle(), Some(Event::TimerDisarmed { .. })));
        assert_eq!(engine.remaining_secs(), 1500 - 2);
        assert!(matches!(engine.toggle(), Some(Event::TimerArmed { .. })));
        assert_eq!(engine.remaining_secs(), 1500 - 2);
    }

    #[test]
    fn tick_while_disarmed_is_ignored() {
        let settings = Settings::default();
        let mut log = SessionLog::new();
        let mut engine = TimerEngine::new(&settings);
        assert!(engine.tick(&settings, &mut log, now()).is_none());
        assert_eq!(engine.remaining_secs(), 1500);
    }

    #[test]
    fn reset_restores_duration_without_disarming() {
        let settings = Settings::default();
        let mut log = SessionLog::new();
        let mut engine = armed_engine(&settings, "Write");
        for _ in 0..10 {
            engine.tick(&settings, &mut log, now());
        }
        engine.reset(&settings);
        assert_eq!(engine.remaining_secs(), 1500);
        assert!(engine.is_armed());
    }

    #[test]
    fn last_tick_flips_phase_and_logs_task() {
        let settings = Settings::new(1, 2).unwrap();
        let mut log = SessionLog::new();
        let mut engine = armed_engine(&settings, "Write report");
        for _ in 0..59 {
            assert!(engine.tick(&settings, &mut log, now()).is_none());
        }
        assert_eq!(engine.remaining_secs(), 1);

        let event = engine.tick(&settings, &mut log, now()).unwrap();
        match event {
            Event::PhaseCompleted { from, to, task, .. } => {
                assert_eq!(from, Phase::Focus);
                assert_eq!(to, Phase::Break);
                let task = task.unwrap();
                assert_eq!(task.title, "Write report");
                assert_eq!(task.notes, "notes");
            }
            other => panic!("Expected PhaseCompleted, got {other:?}"),
        }
        assert_eq!(engine.phase(), Phase::Break);
        assert_eq!(engine.remaining_secs(), 120);
        assert_eq!(log.len(), 1);
        assert_eq!(engine.pending_title(), "");
        assert_eq!(engine.pending_notes(), "");
        assert!(engine.is_armed());
    }

    #[test]
    fn break_completion_logs_nothing() {
        let settings = Settings::new(1, 1).unwrap();
        let mut log = SessionLog::new();
        let mut engine = armed_engine(&settings, "Write");
        for _ in 0..60 {
            engine.tick(&settings, &mut log, now());
        }
        assert_eq!(engine.phase(), Phase::Break);
        let event = (0..60).find_map(|_| engine.tick(&settings, &mut log, now()));
        assert!(matches!(
            event,
            Some(Event::PhaseCompleted { from: Phase::Break, to: Phase::Focus, task: None, .. })
        ));
        assert_eq!(log.len(), 1);
        assert_eq!(engine.remaining_secs(), 60);
    }

    #[test]
    fn arming_in_break_needs_no_task() {
        let settings = Settings::new(1, 1).unwrap();
        let mut log = SessionLog::new();
        let mut engine = armed_engine(&settings, "Write");
        for _ in 0..60 {
            engine.tick(&settings, &mut log, now());
        }
        engine.toggle();
        assert!(!engine.is_armed());
        assert!(engine.toggle().is_some());
    }

    #[test]
    fn settings_change_applies_only_when_disarmed() {
        let mut engine = TimerEngine::new(&Settings::default());
        engine.apply_settings(&Settings::new(40, 10).unwrap());
        assert_eq!(engine.remaining_secs(), 40 * 60);

        engine.set_pending_task("Write", "");
        engine.toggle();
        engine.apply_settings(&Settings::new(10, 10).unwrap());
        assert_eq!(engine.remaining_secs(), 40 * 60);
    }

    #[test]
    fn snapshot_returns_valid_event() {
        let settings = Settings::default();
        let engine = TimerEngine::new(&settings);
        match engine.snapshot(&settings) {
            Event::StateSnapshot {
                phase,
                remaining_secs,
                total_secs,
                display,
                ..
            } => {
                assert_eq!(phase, Phase::Focus);
                assert_eq!(remaining_secs, 1500);
                assert_eq!(total_secs, 1500);
                assert_eq!(display, "25:00");
            }
            _ => panic!("Expected StateSnapshot"),
        }
    }

    #[test]
    fn format_clock_pads() {
        assert_eq!(format_clock(0), "00:00");
        assert_eq!(format_clock(65), "01:05");
        assert_eq!(format_clock(100 * 60), "100:00");
    }
}
