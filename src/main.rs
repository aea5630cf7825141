use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use precast_common::ChangeKind;
use precast_live::config::LiveConfig;
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "precast-live")]
#[command(version, about = "Live change feed with self-healing subscriptions")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to live.toml (defaults to .precast/live.toml in the current directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the change-feed server
    Serve {
        /// Port to serve on (overrides live.toml and PRECAST_LIVE_PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Enable dev mode (CORS permissive for local front-end dev servers)
        #[arg(long)]
        dev: bool,
    },
    /// Subscribe to a topic and print changes, reconnecting on failure
    Watch {
        topic: String,

        /// Only show changes for this table
        #[arg(long)]
        table: Option<String>,

        /// Only show rows belonging to this project
        #[arg(long)]
        project: Option<String>,

        /// Change-feed base URL (overrides live.toml and PRECAST_LIVE_URL)
        #[arg(long)]
        url: Option<String>,
    },
    /// Publish a change to a topic
    Publish {
        topic: String,

        #[arg(long)]
        table: String,

        /// INSERT, UPDATE or DELETE
        #[arg(long)]
        kind: ChangeKind,

        /// Row contents as a JSON object
        #[arg(long)]
        record: String,

        /// Previous row contents as a JSON object (UPDATE/DELETE)
        #[arg(long)]
        old_record: Option<String>,

        #[arg(long)]
        url: Option<String>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default live.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => {
            let cwd = std::env::current_dir().context("Failed to get current directory")?;
            LiveConfig::default_path(&cwd)
        }
    };

    // Config commands must work even when the file does not parse.
    if let Commands::Config { command } = &cli.command {
        return cmd::cmd_config(&config_path, command.clone(), cli.verbose);
    }

    let (port, url) = match &cli.command {
        Commands::Serve { port, .. } => (*port, None),
        Commands::Watch { url, .. } | Commands::Publish { url, .. } => (None, url.clone()),
        Commands::Config { .. } => (None, None),
    };
    let config = LiveConfig::load(config_path)?.with_cli_args(port, url, cli.verbose);
    let _log_guard = precast_live::logging::init(&config.log_level(), &config.toml.logging)?;

    match cli.command {
        Commands::Serve { dev, .. } => cmd::cmd_serve(&config, dev).await?,
        Commands::Watch {
            topic,
            table,
            project,
            ..
        } => cmd::cmd_watch(&config, &topic, table, project).await?,
        Commands::Publish {
            topic,
            table,
            kind,
            record,
            old_record,
            ..
        } => {
            cmd::cmd_publish(&config, &topic, &table, kind, &record, old_record.as_deref()).await?
        }
        Commands::Config { .. } => {}
    }

    Ok(())
}
