use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "dealdesk")]
#[command(version, about = "Small-business CRM back-end with a drag-and-drop deal pipeline")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding dealdesk.toml and the default database location
    #[arg(long, global = true, env = "DEALDESK_DIR")]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP + WebSocket API server
    Serve {
        /// Interface to bind (overrides [server].host)
        #[arg(long)]
        host: Option<String>,

        /// Port to serve on (overrides [server].port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Database path (overrides [database].path)
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (permissive CORS for a local front end)
        #[arg(long)]
        dev: bool,
    },
    /// Write a default dealdesk.toml and create the database
    Init,
    /// Manage user profiles and API tokens
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Show the pipeline board or move a deal between stages
    Board {
        #[command(subcommand)]
        command: BoardCommands,
    },
    /// View or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum UserCommands {
    /// Create a profile with the default pipeline stages and print an API token
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
    /// List profiles
    List,
    /// Issue another API token for an existing profile
    Token {
        email: String,
        #[arg(long, default_value = "cli")]
        label: String,
    },
}

/// Where the board is read from and moves are persisted to.
#[derive(clap::Args, Clone, Debug)]
pub struct BoardSource {
    /// Act as this profile against the local database
    #[arg(long)]
    pub user: Option<String>,

    /// Base URL of a running `dealdesk serve`
    #[arg(long, env = "DEALDESK_SERVER")]
    pub server: Option<String>,

    /// API token for --server
    #[arg(long, env = "DEALDESK_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

#[derive(Subcommand, Clone)]
pub enum BoardCommands {
    /// Print stages as columns with their deals and totals
    Show {
        #[command(flatten)]
        source: BoardSource,
    },
    /// Drag a deal onto a stage (by id or name) and persist the change
    Move {
        deal_id: i64,
        stage: String,
        #[command(flatten)]
        source: BoardSource,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Initialize a default dealdesk.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let dir = match cli.dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = cmd::load_config(&dir)?;
    dealdesk::logging::init(&config.logging, cli.verbose);

    match &cli.command {
        Commands::Serve {
            host,
            port,
            db_path,
            dev,
        } => {
            cmd::cmd_serve(config, host.clone(), *port, db_path.clone(), *dev).await?;
        }
        Commands::Init => cmd::cmd_init(&dir, &config)?,
        Commands::User { command } => cmd::cmd_user(&config, command.clone())?,
        Commands::Board { command } => cmd::cmd_board(&config, command.clone()).await?,
        Commands::Config { command } => cmd::cmd_config(&dir, &config, command.clone())?,
    }

    Ok(())
}
