//! Configuration view and validation commands: `precast-live config`.

use std::path::Path;

use anyhow::Result;
use precast_live::config::{LiveConfig, LiveToml};

use super::super::ConfigCommands;

fn print_sections(toml: &LiveToml) {
    println!("[reconnect]");
    println!("  initial_delay_ms = {}", toml.reconnect.initial_delay_ms);
    println!("  max_backoff_ms = {}", toml.reconnect.max_backoff_ms);
    println!();
    println!("[server]");
    println!("  host = \"{}\"", toml.server.host);
    println!("  port = {}", toml.server.port);
    println!("  ping_interval_secs = {}", toml.server.ping_interval_secs);
    println!("  pong_timeout_secs = {}", toml.server.pong_timeout_secs);
    println!("  broadcast_capacity = {}", toml.server.broadcast_capacity);
    println!("  dev = {}", toml.server.dev);
    println!();
    println!("[client]");
    println!("  url = \"{}\"", toml.client.url);
    println!("  subscribe_timeout_ms = {}", toml.client.subscribe_timeout_ms);
    println!();
    println!("[logging]");
    println!("  level = \"{}\"", toml.logging.level);
    println!("  json = {}", toml.logging.json);
    if let Some(dir) = &toml.logging.directory {
        println!("  directory = \"{}\"", dir.display());
    }
    println!();
}

pub fn cmd_config(config_path: &Path, command: Option<ConfigCommands>, verbose: bool) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("precast-live Configuration");
            println!("==========================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No live.toml found at {}", config_path.display());
                println!("Using default configuration:");
            }
            println!();

            let config = LiveConfig::load(config_path.to_path_buf())?.with_cli_args(None, None, verbose);
            print_sections(&config.toml);

            println!("Effective values (with env/CLI overrides):");
            println!("  port = {}", config.port());
            println!("  url = \"{}\"", config.url());
            println!("  log_level = \"{}\"", config.log_level());
            println!();

            if !config_path.exists() {
                println!("Run 'precast-live config init' to create a live.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No live.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = LiveToml::load(config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("live.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            LiveToml::default().save(config_path)?;

            println!("Created live.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [reconnect] initial_delay_ms, max_backoff_ms");
            println!("  - [server] host, port, keepalive and broadcast capacity");
            println!("  - [client] url, subscribe_timeout_ms");
            println!("  - [logging] level, json, directory");
            println!();
        }
    }

    Ok(())
}
