use clap::Subcommand;
use tokio::sync::mpsc;
use tomato_core::{Command, Config};

use super::{open_session, print_json, CliResult, Link};

#[derive(Subcommand)]
pub enum TimerAction {
    /// Start a focus interval and keep running until Ctrl-C
    Run {
        /// Task the focus interval is for
        #[arg(long)]
        task: Option<String>,
        /// Optional notes recorded with the task
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Print the idle timer state as JSON
    Status,
}

pub async fn run(action: TimerAction, config: &Config) -> CliResult {
    match action {
        TimerAction::Run { task, notes } => {
            let (mut session, mut events) = open_session(config, Link::Subscribe)?;
            if let Some(task) = task {
                session.set_pending_task(task, notes);
            }
            if !session.toggle() {
                return Err("a task title is required to start a focus interval".into());
            }

            let printer = tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    match serde_json::to_string(&event) {
                        Ok(line) => println!("{line}"),
                        Err(e) => tracing::warn!("unprintable event: {e}"),
                    }
                }
            });

            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    let _ = tx.send(Command::Shutdown);
                }
            });

            session.run(rx).await;
            drop(session);
            printer.await?;
        }
        TimerAction::Status => {
            let (session, _events) = open_session(config, Link::Offline)?;
            print_json(&session.snapshot_event())?;
        }
    }
    Ok(())
}
