pub mod auth;
pub mod config;
pub mod data;
pub mod settings;
pub mod sync;
pub mod tasks;
pub mod timer;

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tomato_core::{
    Config, CoreError, Event, HttpRemote, Identity, Notifier, RemoteStore, Session, SilentNotifier,
    SqliteStore, SystemClock, TerminalNotifier,
};

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// How a command's session talks to the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// Long-running: subscribe to remote pushes.
    Subscribe,
    /// One-shot: send writes, ignore pushes.
    WriteOnly,
    /// Read-only commands never touch the remote.
    Offline,
}

/// Open the local store, load it, and attach the configured identity.
pub fn open_session(
    config: &Config,
    link: Link,
) -> Result<(Session<SqliteStore>, UnboundedReceiver<Event>), CoreError> {
    let store = SqliteStore::open()?;
    let remote = match link {
        Link::Offline => None,
        _ => HttpRemote::from_config(&config.remote)?.map(|r| Arc::new(r) as Arc<dyn RemoteStore>),
    };
    let has_remote = remote.is_some();
    let notifier: Box<dyn Notifier> = if config.notifications.enabled {
        Box::new(TerminalNotifier::new(true, config.notifications.sound))
    } else {
        Box::new(SilentNotifier)
    };

    let (mut session, events) = Session::new(store, remote, Arc::new(SystemClock), notifier);
    session.load_local()?;

    if let Some(identity) = config.remote.identity.clone().map(Identity::new) {
        if !has_remote && link != Link::Offline {
            tracing::warn!(%identity, "signed in but no remote.endpoint configured, staying local");
        } else {
            match link {
                Link::Subscribe => session.sign_in(identity)?,
                Link::WriteOnly => session.bind_identity(identity)?,
                Link::Offline => {}
            }
        }
    }
    Ok((session, events))
}

pub fn print_json<T: serde::Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
