use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use pontual::config::Config;
use pontual::store::BackendKind;

mod cmd;

#[derive(Parser)]
#[command(name = "pontual")]
#[command(version, about = "Time tracking and tasks with a WhatsApp command bot")]
pub struct Cli {
    /// Path to pontual.toml
    #[arg(long, global = true, env = "PONTUAL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Storage backend: sqlite, file, memory
    #[arg(long, global = true)]
    pub storage: Option<BackendKind>,

    /// Database or JSON file path
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API and WhatsApp webhook
    Serve {
        #[arg(short, long)]
        port: Option<u16>,

        #[arg(long)]
        host: Option<String>,
    },
    /// Create the database for the configured backend and exit
    Init,
    /// Create a user account
    CreateUser {
        username: String,

        #[arg(long)]
        password: String,

        /// Grant the admin role
        #[arg(long)]
        admin: bool,

        #[arg(long)]
        email: Option<String>,
    },
    /// View configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(storage) = cli.storage {
        config.storage.backend = storage;
    }
    if let Some(path) = &cli.db_path {
        config.storage.path = Some(path.clone());
    }
    if cli.log_json {
        config.logging.json = true;
    }

    let _log_guard = pontual::logging::init_tracing(
        &config.logging.filter,
        config.logging.json,
        config.logging.directory.as_deref(),
    )?;

    match cli.command {
        Commands::Serve { port, host } => cmd::cmd_serve(config, host, port).await?,
        Commands::Init => cmd::cmd_init(&config)?,
        Commands::CreateUser {
            username,
            password,
            admin,
            email,
        } => cmd::cmd_create_user(&config, &username, &password, admin, email)?,
        Commands::Config { command } => cmd::cmd_config(&config, command)?,
    }

    Ok(())
}
