//! Workspace setup: `dealdesk init`.

use std::path::Path;

use anyhow::{Context, Result};
use dealdesk::config::{CONFIG_FILE_NAME, DealdeskConfig};

pub fn cmd_init(dir: &Path, config: &DealdeskConfig) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let config_path = dir.join(CONFIG_FILE_NAME);
    if config_path.exists() {
        println!("{} already exists, leaving it as is.", config_path.display());
    } else {
        DealdeskConfig::default().save(&config_path)?;
        println!("Created {}", config_path.display());
    }

    super::open_db(config)?;
    println!("Database ready at {}", config.database.path.display());
    println!();
    println!("Next: dealdesk user add --name \"Your Name\" --email you@example.com");
    Ok(())
}
