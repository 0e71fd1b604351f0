use clap::Subcommand;
use tomato_core::Config;

use super::{open_session, print_json, CliResult, Link};

#[derive(Subcommand)]
pub enum TasksAction {
    /// List completed tasks, oldest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn run(action: TasksAction, config: &Config) -> CliResult {
    match action {
        TasksAction::List { json } => {
            let (session, _events) = open_session(config, Link::Offline)?;
            let tasks = &session.state().tasks;
            if json {
                return print_json(tasks);
            }
            if tasks.is_empty() {
                println!("No completed tasks.");
                return Ok(());
            }
            for task in tasks {
                let when = task.timestamp.format("%Y-%m-%d %H:%M");
                if task.notes.is_empty() {
                    println!("{when}  {}", task.title);
                } else {
                    println!("{when}  {}  ({})", task.title, task.notes);
                }
            }
        }
    }
    Ok(())
}
