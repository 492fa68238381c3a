use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use retroboard::config::ConfigToml;
use retroboard::telemetry::{TelemetryConfig, init_tracing};

mod cmd;

#[derive(Parser)]
#[command(name = "retro")]
#[command(version, about = "Team retrospective boards with live comment sync")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the retro board server
    Serve {
        /// Port to serve on (overrides retro.toml)
        #[arg(short, long)]
        port: Option<u16>,

        /// Database path (overrides retro.toml)
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (permissive CORS)
        #[arg(long)]
        dev: bool,

        /// Initialize database only (don't start server)
        #[arg(long)]
        init: bool,
    },
    /// List retrospective templates
    Templates {
        /// Only templates whose title contains this text
        #[arg(short, long)]
        search: Option<String>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Follow a retro board live
    Watch {
        retro_id: String,

        #[command(flatten)]
        login: LoginArgs,
    },
    /// Move a comment to another column
    Move {
        retro_id: String,
        comment_id: String,
        column_id: String,

        #[command(flatten)]
        login: LoginArgs,
    },
    /// Add a comment to a retro board
    Post {
        retro_id: String,
        column_id: String,
        text: String,

        #[command(flatten)]
        login: LoginArgs,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default retro.toml file
    Init,
}

#[derive(Args, Clone)]
pub struct LoginArgs {
    #[arg(long, env = "RETRO_EMAIL")]
    pub email: String,

    #[arg(long, env = "RETRO_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Server URL (overrides retro.toml and RETRO_SERVER_URL)
    #[arg(long)]
    pub server: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let config = ConfigToml::resolve(&project_dir)?;
    let _telemetry = init_tracing(&TelemetryConfig {
        verbose: cli.verbose,
        json: cli.log_json || config.logging.json,
        log_dir: config.logging.log_dir.as_ref().map(|dir| project_dir.join(dir)),
    })?;

    match &cli.command {
        Commands::Serve {
            port,
            db_path,
            dev,
            init,
        } => {
            cmd::cmd_serve(&project_dir, config, *port, db_path.clone(), *dev, *init).await?;
        }
        Commands::Templates { search } => cmd::cmd_templates(&project_dir, &config, search.as_deref()).await?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
        Commands::Watch { retro_id, login } => cmd::cmd_watch(&config, login, retro_id).await?,
        Commands::Move {
            retro_id,
            comment_id,
            column_id,
            login,
        } => cmd::cmd_move(&config, login, retro_id, comment_id, column_id).await?,
        Commands::Post {
            retro_id,
            column_id,
            text,
            login,
        } => cmd::cmd_post(&config, login, retro_id, column_id, text).await?,
    }

    Ok(())
}
