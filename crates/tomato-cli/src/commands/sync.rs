use clap::Subcommand;
use tomato_core::{Config, SyncStatus};

use super::{open_session, CliResult, Link};

#[derive(Subcommand)]
pub enum SyncAction {
    /// Send the stored settings and tasks to the remote document
    Push,
}

pub async fn run(action: SyncAction, config: &Config) -> CliResult {
    match action {
        SyncAction::Push => {
            if config.remote.identity.is_none() {
                return Err("not signed in (run `tomato auth login`)".into());
            }
            if config.remote.endpoint.is_none() {
                return Err("remote.endpoint is not configured".into());
            }
            let (mut session, _events) = open_session(config, Link::WriteOnly)?;
            session.push()?;
            session.settle().await;
            let status = session.sync_status();
            println!("{}", status.label());
            if status == SyncStatus::Error {
                return Err("push failed".into());
            }
        }
    }
    Ok(())
}
