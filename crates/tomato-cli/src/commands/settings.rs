use clap::Subcommand;
use tomato_core::{Config, Settings};

use super::{open_session, print_json, CliResult, Link};

#[derive(Subcommand)]
pub enum SettingsAction {
    /// Print current durations as JSON
    Show,
    /// Change durations (minutes)
    Set {
        /// Focus duration in minutes
        #[arg(long)]
        focus: Option<u32>,
        /// Break duration in minutes
        #[arg(long = "break")]
        break_time: Option<u32>,
    },
}

pub async fn run(action: SettingsAction, config: &Config) -> CliResult {
    match action {
        SettingsAction::Show => {
            let (session, _events) = open_session(config, Link::Offline)?;
            print_json(session.settings())?;
        }
        SettingsAction::Set { focus, break_time } => {
            let (mut session, _events) = open_session(config, Link::WriteOnly)?;
            let current = *session.settings();
            let settings = Settings::new(
                focus.unwrap_or(current.focus_time),
                break_time.unwrap_or(current.break_time),
            )?;
            session.update_settings(settings)?;
            session.settle().await;
            print_json(session.settings())?;
            if session.identity().is_some() {
                eprintln!("sync: {}", session.sync_status().label());
            }
        }
    }
    Ok(())
}
