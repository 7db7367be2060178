//! API server command: `dealdesk serve`.

use std::path::PathBuf;

use anyhow::Result;
use dealdesk::config::DealdeskConfig;
use dealdesk::crm::server::{ServerConfig, start_server};

pub async fn cmd_serve(
    config: DealdeskConfig,
    host: Option<String>,
    port: Option<u16>,
    db_path: Option<PathBuf>,
    dev: bool,
) -> Result<()> {
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let mut server = ServerConfig::from(&config);
    if let Some(host) = host {
        server.host = host;
    }
    if let Some(port) = port {
        server.port = port;
    }
    if let Some(path) = db_path {
        server.db_path = path;
    }
    server.dev_mode |= dev;

    start_server(server).await
}
