use std::path::PathBuf;

use clap::Subcommand;
use tomato_core::storage::transfer;
use tomato_core::Config;

use super::{open_session, CliResult, Link};

#[derive(Subcommand)]
pub enum DataAction {
    /// Write settings and tasks to a JSON backup
    Export {
        /// Destination file (default: tomato-timer-backup-YYYY-MM-DD.json)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Replace settings and tasks from a JSON backup
    Import {
        /// Backup file to read
        path: PathBuf,
    },
}

pub async fn run(action: DataAction, config: &Config) -> CliResult {
    match action {
        DataAction::Export { output } => {
            let (session, _events) = open_session(config, Link::Offline)?;
            let path = output.unwrap_or_else(|| {
                PathBuf::from(transfer::backup_file_name(chrono::Local::now().date_naive()))
            });
            std::fs::write(&path, session.export()?)?;
            println!("{}", path.display());
        }
        DataAction::Import { path } => {
            let payload = std::fs::read_to_string(&path)?;
            let (mut session, _events) = open_session(config, Link::WriteOnly)?;
            session.import(&payload)?;
            session.settle().await;
            println!("imported {} tasks", session.state().tasks.len());
        }
    }
    Ok(())
}
