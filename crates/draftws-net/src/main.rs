//! draftws echo server.
//!
//! Usage: `draftws-echo [config.yaml]` (defaults to `draftws.yaml`).
//! Replies `"Echo - <text>"` to every message until Ctrl-C.

use std::sync::Arc;

use tracing_subscriber::{fmt, EnvFilter};

use draftws_core::error::Result;
use draftws_net::echo::EchoHandler;
use draftws_net::{config, Server};

const DEFAULT_CONFIG: &str = "draftws.yaml";

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    if let Err(e) = run(&path).await {
        tracing::error!(code = e.kind().as_str(), error = %e, "draftws-echo failed");
        std::process::exit(1);
    }
}

async fn run(path: &str) -> Result<()> {
    let cfg = config::load_from_file(path)?;
    let server = Server::start(&cfg, Arc::new(EchoHandler)).await?;
    tracing::info!(listen = %server.local_addr(), config = path, "draftws-echo starting");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    server.stop().await;
    Ok(())
}
