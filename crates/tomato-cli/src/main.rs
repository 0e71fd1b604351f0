use clap::{Parser, Subcommand};
use tomato_core::Config;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "tomato", version, about = "Tomato focus/break timer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Timer control
    Timer {
        #[command(subcommand)]
        action: commands::timer::TimerAction,
    },
    /// Focus and break durations
    Settings {
        #[command(subcommand)]
        action: commands::settings::SettingsAction,
    },
    /// Completed task log
    Tasks {
        #[command(subcommand)]
        action: commands::tasks::TasksAction,
    },
    /// Backup export/import
    Data {
        #[command(subcommand)]
        action: commands::data::DataAction,
    },
    /// Remote identity
    Auth {
        #[command(subcommand)]
        action: commands::auth::AuthAction,
    },
    /// Remote synchronization
    Sync {
        #[command(subcommand)]
        action: commands::sync::SyncAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn init_logging(config: &Config) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    let config = Config::load_or_default();
    init_logging(&config);

    let result = match cli.command {
        Commands::Timer { action } => commands::timer::run(action, &config).await,
        Commands::Settings { action } => commands::settings::run(action, &config).await,
        Commands::Tasks { action } => commands::tasks::run(action, &config),
        Commands::Data { action } => commands::data::run(action, &config).await,
        Commands::Auth { action } => commands::auth::run(action),
        Commands::Sync { action } => commands::sync::run(action, &config).await,
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
