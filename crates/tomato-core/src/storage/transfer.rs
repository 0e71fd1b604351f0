//! Backup export/import.
//!
//! The transfer file is the snapshot as pretty JSON:
//!
//! ```json
//! {
//!   "settings": { "focusTime": 25, "breakTime": 5 },
//!   "tasks": [
//!     { "id": "1700000000000", "title": "Write spec", "notes": "draft", "timestamp": "2024-01-01T00:00:00.000Z" }
//!   ]
//! }
//! ```
//!
//! Import is all-or-nothing: a payload that fails to parse or validate
//! yields `TransferError::InvalidFormat` and nothing is returned to apply.

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::TransferError;
use crate::model::{PersistedSnapshot, SessionLog, Settings};

/// Strict shape for import; unlike `PersistedSnapshot` both keys are required.
#[derive(Deserialize)]
struct TransferDocument {
    settings: Settings,
    tasks: SessionLog,
}

pub fn export(snapshot: &PersistedSnapshot) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(snapshot)
}

pub fn import(payload: &str) -> Result<PersistedSnapshot, TransferError> {
    let doc: TransferDocument =
        serde_json::from_str(payload).map_err(|e| TransferError::InvalidFormat(e.to_string()))?;
    doc.settings
        .validate()
        .map_err(|e| TransferError::InvalidFormat(e.to_string()))?;
    if let Some(blank) = doc.tasks.iter().find(|t| t.title.is_empty()) {
        return Err(TransferError::InvalidFormat(format!(
            "task {} has an empty title",
            blank.id
        )));
    }
    Ok(PersistedSnapshot::new(doc.settings, doc.tasks))
}

/// Default file name for a backup taken on `date`.
pub fn backup_file_name(date: NaiveDate) -> String {
    format!("tomato-timer-backup-{}.json", date.format("%Y-%m-%d"))
}
