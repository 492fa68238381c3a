//! Template listing — `retro templates`.
//!
//! Reads the local database directly, so no server needs to be running.

use anyhow::Result;
use std::path::Path;

use retroboard::board::db::{DbHandle, RetroDb};
use retroboard::config::ConfigToml;

pub async fn cmd_templates(project_dir: &Path, config: &ConfigToml, search: Option<&str>) -> Result<()> {
    let db_path = project_dir.join(&config.server.db_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = DbHandle::new(RetroDb::new(&db_path)?);
    let search = search.map(str::to_string);
    let templates = db.call(move |db| db.list_templates(search.as_deref())).await?;

    if templates.is_empty() {
        println!("No templates found.");
        return Ok(());
    }

    println!();
    for template in &templates {
        println!("{}  ({})", template.title, template.id);
        if let Some(description) = &template.description {
            println!("  {}", description);
        }
        let columns: Vec<&str> = template.columns.iter().map(|c| c.name.as_str()).collect();
        println!("  columns: {}", columns.join(", "));
        println!();
    }
    Ok(())
}
