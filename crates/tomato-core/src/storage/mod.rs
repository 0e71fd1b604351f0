mod config;
pub mod local;
pub mod transfer;

pub use config::{Config, LoggingConfig, NotificationsConfig, RemoteConfig};
pub use local::{EncodedSnapshot, LocalSnapshot, LocalStore, MemoryStore, SqliteStore};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns the data directory, creating it if needed.
///
/// `TOMATO_DATA_DIR` wins when set. Otherwise `~/.config/tomato[-dev]/`
/// based on TOMATO_ENV; set TOMATO_ENV=dev to use the development directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("TOMATO_DATA_DIR") {
        Some(explicit) => PathBuf::from(explicit),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("TOMATO_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("tomato-dev")
            } else {
                base_dir.join("tomato")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
