use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "migrator")]
#[command(version, about = "Java repository migration service")]
pub struct Cli {
    /// Path to the configuration file (defaults to ./migrator.toml when present)
    #[arg(short, long, global = true, env = "MIGRATOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP migration service
    Serve {
        /// Interface to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Parent directory for per-job workspaces
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Directory generated artifacts are kept in
        #[arg(long)]
        artifacts_dir: Option<PathBuf>,

        /// Maximum number of jobs running at once
        #[arg(long)]
        max_jobs: Option<usize>,

        /// Enable dev mode (CORS permissive for a local front-end dev server)
        #[arg(long)]
        dev: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// List supported Java versions and conversion types
    Catalog {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default migrator.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve {
            host,
            port,
            work_dir,
            artifacts_dir,
            max_jobs,
            dev,
        } => {
            cmd::cmd_serve(
                &cli,
                cmd::ServeOverrides {
                    host: host.clone(),
                    port: *port,
                    work_dir: work_dir.clone(),
                    artifacts_dir: artifacts_dir.clone(),
                    max_jobs: *max_jobs,
                    dev: *dev,
                },
            )
            .await?;
        }
        Commands::Config { command } => cmd::cmd_config(cli.config.as_deref(), command.clone())?,
        Commands::Catalog { json } => cmd::cmd_catalog(*json)?,
    }

    Ok(())
}
