//! Campus CLI - session and API access for the Campus e-learning platform

mod commands;

use anyhow::Result;
use campus_sdk::Config;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "campus")]
#[command(about = "Session and API client for the Campus e-learning platform", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current session status
    Status,

    /// Store credentials obtained elsewhere
    Set {
        /// Access token
        #[arg(long)]
        access_token: String,

        /// Refresh token used for renewal
        #[arg(long)]
        refresh_token: Option<String>,

        /// Access token lifetime in seconds
        #[arg(long)]
        expires_in: Option<u64>,
    },

    /// Print a valid access token, refreshing if needed
    Token,

    /// Force a token refresh
    Refresh,

    /// Print the Authorization header for the next request
    Header,

    /// Authenticated GET request against the API
    Get {
        /// API path, relative to the configured base URL
        path: String,
    },

    /// Keep the session fresh in the background until interrupted
    Watch,

    /// Log out and clear stored credentials
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = Config::load()?;
    let session = config.session_manager()?;

    match cli.command {
        Commands::Status => {
            commands::status(&session).await?;
        }
        Commands::Set {
            access_token,
            refresh_token,
            expires_in,
        } => {
            commands::set(&session, access_token, refresh_token, expires_in).await?;
        }
        Commands::Token => {
            commands::token(&session).await?;
        }
        Commands::Refresh => {
            tracing::info!("Refreshing session...");
            commands::refresh(&session).await?;
        }
        Commands::Header => {
            commands::header(&session).await?;
        }
        Commands::Get { path } => {
            commands::get(&config, &session, &path).await?;
        }
        Commands::Watch => {
            commands::watch(&session).await?;
        }
        Commands::Logout => {
            tracing::info!("Logging out...");
            commands::logout(&session).await?;
        }
    }

    Ok(())
}
