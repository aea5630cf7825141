//! Change-feed server command: `precast-live serve`.

use anyhow::Result;
use precast_live::config::LiveConfig;
use precast_live::server::{ServerConfig, start_server};

pub async fn cmd_serve(config: &LiveConfig, dev: bool) -> Result<()> {
    let mut server = ServerConfig::from_config(config);
    server.dev_mode |= dev;
    if server.port == 0 {
        anyhow::bail!("server.port must not be 0");
    }
    start_server(server).await
}
