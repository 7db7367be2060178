//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module   | Commands handled  |
//! |----------|-------------------|
//! | `serve`  | `Serve`           |
//! | `init`   | `Init`            |
//! | `user`   | `User`            |
//! | `board`  | `Board`           |
//! | `config` | `Config`          |

pub mod board;
pub mod config;
pub mod init;
pub mod serve;
pub mod user;

use std::path::Path;

use anyhow::Result;
use dealdesk::config::DealdeskConfig;
use dealdesk::crm::db::CrmDb;

pub use board::cmd_board;
pub use config::cmd_config;
pub use init::cmd_init;
pub use serve::cmd_serve;
pub use user::cmd_user;

/// Effective configuration for `dir`, with a relative database path
/// anchored at `dir`.
pub fn load_config(dir: &Path) -> Result<DealdeskConfig> {
    let mut config = DealdeskConfig::resolve(dir)?;
    if config.database.path.is_relative() {
        config.database.path = dir.join(&config.database.path);
    }
    Ok(config)
}

pub fn open_db(config: &DealdeskConfig) -> Result<CrmDb> {
    CrmDb::new(&config.database.path)
}
