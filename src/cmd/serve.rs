//! HTTP server command: `pontual serve`.

use anyhow::Result;
use pontual::config::Config;

pub async fn cmd_serve(mut config: Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    pontual::server::start_server(config).await
}
