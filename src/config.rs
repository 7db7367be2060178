//! Layered configuration for dealdesk.
//!
//! Settings are read from `dealdesk.toml`, then overridden by environment
//! variables (a `.env` file is honoured), then by CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//! dev_mode = false
//!
//! [database]
//! path = ".dealdesk/crm.db"
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "dealdesk.toml";

pub const ENV_PORT: &str = "DEALDESK_PORT";
pub const ENV_DB_PATH: &str = "DEALDESK_DB_PATH";
pub const ENV_LOG: &str = "DEALDESK_LOG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Permissive CORS for a locally served front end.
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3141
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".dealdesk/crm.db")
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Root of `dealdesk.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DealdeskConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl DealdeskConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse dealdesk.toml")
    }

    /// Load `dealdesk.toml` from `dir`, or defaults when the file is absent.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize dealdesk.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides. Unparseable values are reported, not ignored.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(
            std::env::var(ENV_PORT).ok(),
            std::env::var(ENV_DB_PATH).ok(),
            std::env::var(ENV_LOG).ok(),
        )
    }

    fn apply_overrides(
        &mut self,
        port: Option<String>,
        db_path: Option<String>,
        log: Option<String>,
    ) -> Result<()> {
        if let Some(port) = port {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("{} must be a port number, got '{}'", ENV_PORT, port))?;
        }
        if let Some(path) = db_path.filter(|p| !p.trim().is_empty()) {
            self.database.path = PathBuf::from(path);
        }
        if let Some(level) = log.filter(|l| !l.trim().is_empty()) {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Resolve the effective configuration for `dir`: file, then `.env` and
    /// process environment.
    pub fn resolve(dir: &Path) -> Result<Self> {
        let _ = dotenvy::from_path(dir.join(".env"));
        let mut config = Self::load_or_default(dir)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Human-readable problems that do not prevent loading.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.server.port == 0 {
            warnings.push("server.port is 0; an ephemeral port will be chosen".to_string());
        }
        if self.server.dev_mode && self.server.host != "127.0.0.1" {
            warnings.push(format!(
                "dev_mode enables permissive CORS while listening on {}",
                self.server.host
            ));
        }
        if self.logging.level.trim().is_empty() {
            warnings.push("logging.level is empty; falling back to info".to_string());
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_apply_when_file_missing() -> Result<()> {
        let dir = TempDir::new()?;
        let config = DealdeskConfig::load_or_default(dir.path())?;
        assert_eq!(config.server.port, 3141);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.database.path, PathBuf::from(".dealdesk/crm.db"));
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
        Ok(())
    }

    #[test]
    fn partial_file_keeps_other_defaults() -> Result<()> {
        let config = DealdeskConfig::parse(
            r#"
            [server]
            port = 8080

            [logging]
            json = true
            "#,
        )?;
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
        Ok(())
    }

    #[test]
    fn save_then_load() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut config = DealdeskConfig::default();
        config.database.path = PathBuf::from("/var/lib/dealdesk/crm.db");
        config.save(&path)?;

        let loaded = DealdeskConfig::load(&path)?;
        assert_eq!(loaded.database.path, config.database.path);
        Ok(())
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(DealdeskConfig::parse("[server\nport = ").is_err());
    }

    #[test]
    fn overrides_replace_file_values() -> Result<()> {
        let mut config = DealdeskConfig::default();
        config.apply_overrides(
            Some("9000".into()),
            Some("/tmp/x.db".into()),
            Some("debug".into()),
        )?;
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.database.path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.logging.level, "debug");
        Ok(())
    }

    #[test]
    fn bad_port_override_is_rejected() {
        let mut config = DealdeskConfig::default();
        let err = config
            .apply_overrides(Some("eighty".into()), None, None)
            .unwrap_err();
        assert!(err.to_string().contains(ENV_PORT));
    }

    #[test]
    fn blank_overrides_are_ignored() -> Result<()> {
        let mut config = DealdeskConfig::default();
        config.apply_overrides(None, Some("  ".into()), Some(String::new()))?;
        assert_eq!(config.database.path, PathBuf::from(".dealdesk/crm.db"));
        assert_eq!(config.logging.level, "info");
        Ok(())
    }

    #[test]
    fn validate_flags_exposed_dev_mode() {
        let mut config = DealdeskConfig::default();
        assert!(config.validate().is_empty());
        config.server.dev_mode = true;
        config.server.host = "0.0.0.0".into();
        assert_eq!(config.validate().len(), 1);
    }
}
