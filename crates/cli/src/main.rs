//! codecrab CLI: the main entry point.
//!
//! Commands:
//! - `chat`: Interactive streaming chat, or a single prompt with `-m`
//! - `sessions`: List, show, delete, and clean up saved sessions
//! - `config`: Show, locate, or initialize the config file

use clap::{Parser, Subcommand};

mod commands;
mod repl;

#[derive(Parser)]
#[command(
    name = "codecrab",
    about = "codecrab — a terminal coding assistant",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the coding assistant
    Chat {
        /// Send a single prompt instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Continue a saved session
        #[arg(short, long)]
        resume: Option<String>,

        /// Override the configured provider
        #[arg(long)]
        provider: Option<String>,

        /// Override the configured model
        #[arg(long)]
        model: Option<String>,
    },

    /// Manage saved sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum SessionsAction {
    /// List sessions, newest first
    List {
        /// Maximum number of sessions to show
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// Print a session's conversation
    Show { id: String },
    /// Delete a session
    Delete { id: String },
    /// Evict sessions past the count or age limits
    Cleanup,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (keys redacted)
    Show,
    /// Print the config file location
    Path,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so they never interleave with streamed model text
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Chat {
            message,
            resume,
            provider,
            model,
        } => {
            commands::chat::run(commands::chat::ChatOptions {
                message,
                resume,
                provider,
                model,
            })
            .await?
        }
        Commands::Sessions { action } => match action {
            SessionsAction::List { limit } => commands::sessions::list(limit).await?,
            SessionsAction::Show { id } => commands::sessions::show(&id).await?,
            SessionsAction::Delete { id } => commands::sessions::delete(&id).await?,
            SessionsAction::Cleanup => commands::sessions::cleanup().await?,
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Init { force } => commands::config_cmd::init(force).await?,
        },
    }

    Ok(())
}
