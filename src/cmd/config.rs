//! Configuration view and setup commands: `dealdesk config`.

use std::path::Path;

use anyhow::{Context, Result};
use dealdesk::config::{CONFIG_FILE_NAME, DealdeskConfig, ENV_DB_PATH, ENV_LOG, ENV_PORT};

use super::super::ConfigCommands;

pub fn cmd_config(
    dir: &Path,
    config: &DealdeskConfig,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let config_path = dir.join(CONFIG_FILE_NAME);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("dealdesk configuration");
            println!("======================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No {} found at {}; using defaults.", CONFIG_FILE_NAME, dir.display());
            }
            println!("Environment overrides: {}, {}, {}", ENV_PORT, ENV_DB_PATH, ENV_LOG);
            println!();

            let rendered =
                toml::to_string_pretty(config).context("Failed to render configuration")?;
            println!("{}", rendered.trim_end());
            println!();

            let warnings = config.validate();
            if !warnings.is_empty() {
                println!("Warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
                println!();
            }
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists at {}", CONFIG_FILE_NAME, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            DealdeskConfig::default().save(&config_path)?;
            println!("Created {} at {}", CONFIG_FILE_NAME, config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] host, port, dev_mode");
            println!("  - [database] path");
            println!("  - [logging] level, json");
            println!();
        }
    }

    Ok(())
}
