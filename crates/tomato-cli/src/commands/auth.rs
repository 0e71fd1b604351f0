use clap::Subcommand;
use serde_json::json;
use tomato_core::Config;

use super::{print_json, CliResult};

#[derive(Subcommand)]
pub enum AuthAction {
    /// Sign in as IDENTITY; later commands sync to its remote document
    Login {
        identity: String,
        /// Bearer token for the remote store
        #[arg(long)]
        token: Option<String>,
    },
    /// Sign out; persistence becomes local-only
    Logout,
    /// Show the signed-in identity
    Status,
}

pub fn run(action: AuthAction) -> CliResult {
    let mut config = Config::load()?;
    match action {
        AuthAction::Login { identity, token } => {
            if identity.trim().is_empty() {
                return Err("identity must not be empty".into());
            }
            config.remote.identity = Some(identity.clone());
            if token.is_some() {
                config.remote.token = token;
            }
            config.save()?;
            println!("signed in as {identity}");
            if config.remote.endpoint.is_none() {
                eprintln!("note: remote.endpoint is not set; sync stays local-only");
            }
        }
        AuthAction::Logout => {
            config.remote.identity = None;
            config.remote.token = None;
            config.save()?;
            println!("signed out");
        }
        AuthAction::Status => {
            print_json(&json!({
                "signed_in": config.remote.identity.is_some(),
                "identity": config.remote.identity,
                "endpoint": config.remote.endpoint,
                "has_token": config.remote.token.is_some(),
            }))?;
        }
    }
    Ok(())
}
