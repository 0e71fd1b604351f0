//! Phase-end side channel: an audible cue plus a platform notification.
//!
//! Nothing here may fail a phase transition. [`announce_phase_end`] logs
//! and drops every error the notifier reports.

use std::io::Write;

use tracing::debug;

use crate::timer::Phase;

pub const BREAK_STARTS_MESSAGE: &str = "Break time!";
pub const FOCUS_STARTS_MESSAGE: &str = "Time to focus!";

/// Notification permission as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Not asked yet.
    Default,
    Granted,
    Denied,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("audio playback rejected: {0}")]
    Audio(String),

    #[error("notification failed: {0}")]
    Display(String),
}

pub trait Notifier: Send {
    fn permission(&self) -> Permission;

    /// Ask the user for permission. Only called while `Default`.
    fn request_permission(&mut self) -> Permission;

    fn show(&mut self, message: &str) -> Result<(), NotifyError>;

    fn play_cue(&mut self) -> Result<(), NotifyError>;
}

/// Message raised when `ended` runs out.
pub fn phase_end_message(ended: Phase) -> &'static str {
    match ended {
        Phase::Focus => BREAK_STARTS_MESSAGE,
        Phase::Break => FOCUS_STARTS_MESSAGE,
    }
}

/// Play the cue and raise the notification for the phase that just ended.
/// Permission is requested lazily; a denial is a silent no-op.
pub fn announce_phase_end(notifier: &mut dyn Notifier, ended: Phase) {
    if let Err(e) = notifier.play_cue() {
        debug!("phase cue dropped: {e}");
    }

    let permission = match notifier.permission() {
        Permission::Default => notifier.request_permission(),
        other => other,
    };
    if permission != Permission::Granted {
        debug!("notification skipped: permission {permission:?}");
        return;
    }
    if let Err(e) = notifier.show(phase_end_message(ended)) {
        debug!("notification dropped: {e}");
    }
}

/// Terminal notifier: BEL for the cue, one line on stderr for the message.
#[derive(Debug)]
pub struct TerminalNotifier {
    enabled: bool,
    sound: bool,
}

impl TerminalNotifier {
    pub fn new(enabled: bool, sound: bool) -> Self {
        Self { enabled, sound }
    }
}

impl Notifier for TerminalNotifier {
    fn permission(&self) -> Permission {
        if self.enabled {
            Permission::Granted
        } else {
            Permission::Denied
        }
    }

    fn request_permission(&mut self) -> Permission {
        self.permission()
    }

    fn show(&mut self, message: &str) -> Result<(), NotifyError> {
        let mut err = std::io::stderr().lock();
        writeln!(err, "[tomato] {message}").map_err(|e| NotifyError::Display(e.to_string()))
    }

    fn play_cue(&mut self) -> Result<(), NotifyError> {
        if !self.sound {
            return Ok(());
        }
        let mut err = std::io::stderr().lock();
        err.write_all(b"\x07")
            .and_then(|_| err.flush())
            .map_err(|e| NotifyError::Audio(e.to_string()))
    }
}

/// Notifier that does nothing; used when notifications are turned off.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn permission(&self) -> Permission {
        Permission::Denied
    }

    fn request_permission(&mut self) -> Permission {
        Permission::Denied
    }

    fn show(&mut self, _message: &str) -> Result<(), NotifyError> {
        Ok(())
    }

    fn play_cue(&mut self) -> Result<(), NotifyError> {
        Ok(())
    }
}
