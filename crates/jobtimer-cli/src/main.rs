use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "jobtimer-cli", version, about = "Jobtimer CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Timer lifecycle
    Timer {
        #[command(subcommand)]
        action: commands::timer::TimerAction,
    },
    /// Sync and retry queue
    Sync {
        #[command(subcommand)]
        action: commands::sync::SyncAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Notification preferences
    Prefs {
        #[command(subcommand)]
        action: commands::prefs::PrefsAction,
    },
}

fn main() {
    // Logs go to stderr; stdout carries JSON only.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Timer { action } => commands::timer::run(action),
        Commands::Sync { action } => commands::sync::run(action),
        Commands::Config { action } => commands::config::run(action),
        Commands::Prefs { action } => commands::prefs::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
