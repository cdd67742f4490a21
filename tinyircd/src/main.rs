use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tinyircd::config::ServerConfig;
use tinyircd::connection::IrcHandler;
use tinyircd::server::Server;

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs with TINYIRCD_LOG_JSON=1, human-readable otherwise
    let json_logs = std::env::var("TINYIRCD_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("tinyircd=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut config = ServerConfig::parse();
    if let Err(e) = config.load_motd() {
        tracing::warn!("{e:#}");
    } else if let Some(ref path) = config.motd_file {
        tracing::info!("Loaded MOTD from {}", path.display());
    }

    let handler = IrcHandler::new(&config);
    let server = Server::bind(&config, handler).await?;
    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Server shutting down...");
            Ok(())
        }
    }
}
