//! Configuration view and validation commands — `retro config`.

use anyhow::Result;
use std::path::Path;

use retroboard::config::{ConfigToml, config_dir, config_path};

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = config_path(project_dir);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Retroboard Configuration");
            println!("========================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                ConfigToml::load(&config_path)?
            } else {
                println!("No retro.toml found at {}", config_path.display());
                println!("Using default configuration.");
                ConfigToml::default()
            };
            println!();
            print_sections(&toml);

            let effective = ConfigToml::resolve(project_dir)?;
            if effective != toml {
                println!("Effective values (with env overrides):");
                println!("  server.host = \"{}\"", effective.server.host);
                println!("  server.port = {}", effective.server.port);
                println!("  server.db_path = \"{}\"", effective.server.db_path.display());
                println!("  auth.session_ttl_hours = {}", effective.auth.session_ttl_hours);
                println!("  client.server_url = \"{}\"", effective.client.server_url);
                println!();
            }

            if !config_path.exists() {
                println!("Run 'retro config init' to create a retro.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No retro.toml found. Using defaults (valid).");
                return Ok(());
            }

            let warnings = ConfigToml::load(&config_path)?.validate();
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
                println!("retro.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(config_dir(project_dir))?;
            ConfigToml::default().save(&config_path)?;

            println!("Created retro.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] host, port, db_path");
            println!("  - [feed] channel_capacity and keepalive timings");
            println!("  - [client] server_url for watch/move/post");
            println!();
        }
    }

    Ok(())
}

fn print_sections(toml: &ConfigToml) {
    println!("[server]");
    println!("  host = \"{}\"", toml.server.host);
    println!("  port = {}", toml.server.port);
    println!("  db_path = \"{}\"", toml.server.db_path.display());
    println!("  dev_mode = {}", toml.server.dev_mode);
    println!();

    println!("[feed]");
    println!("  channel_capacity = {}", toml.feed.channel_capacity);
    println!("  ping_interval_secs = {}", toml.feed.ping_interval_secs);
    println!("  pong_timeout_secs = {}", toml.feed.pong_timeout_secs);
    println!();

    println!("[auth]");
    println!("  session_ttl_hours = {}", toml.auth.session_ttl_hours);
    println!("  min_password_len = {}", toml.auth.min_password_len);
    println!();

    println!("[client]");
    println!("  server_url = \"{}\"", toml.client.server_url);
    println!("  request_timeout_secs = {}", toml.client.request_timeout_secs);
    println!();

    println!("[logging]");
    println!("  json = {}", toml.logging.json);
    if let Some(dir) = &toml.logging.log_dir {
        println!("  log_dir = \"{}\"", dir.display());
    }
    println!();
}
