//! Board server command — `retro serve`.

use anyhow::Result;
use std::path::{Path, PathBuf};

use retroboard::board::db::RetroDb;
use retroboard::board::server::{ServerConfig, start_server};
use retroboard::config::ConfigToml;

pub async fn cmd_serve(
    project_dir: &Path,
    config: ConfigToml,
    port: Option<u16>,
    db_path: Option<PathBuf>,
    dev: bool,
    init: bool,
) -> Result<()> {
    let mut server = ServerConfig::from_config(&config);
    if let Some(port) = port {
        server.port = port;
    }
    if let Some(path) = db_path {
        server.db_path = path;
    }
    server.dev_mode |= dev;
    if server.db_path.is_relative() {
        server.db_path = project_dir.join(&server.db_path);
    }

    if init {
        if let Some(parent) = server.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        RetroDb::new(&server.db_path)?;
        println!("Retro database initialized at {}", server.db_path.display());
        return Ok(());
    }

    start_server(server).await
}
