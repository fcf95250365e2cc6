use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use claude_tap::capture::CaptureStore;
use claude_tap::config::ProxyConfig;
use claude_tap::proxy::{self, AppState};

#[derive(Parser, Debug)]
#[command(
    name = "claude-tap",
    about = "Transparent capture proxy for the Claude Messages API"
)]
struct Args {
    /// Address to listen on, e.g. 127.0.0.1:8787
    #[arg(long)]
    listen: Option<String>,

    /// Upstream origin, e.g. https://api.anthropic.com
    #[arg(long)]
    upstream: Option<String>,

    /// Path to a TOML config file
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ProxyConfig::from_file(path)?,
        None => ProxyConfig::from_env()?,
    };
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(upstream) = args.upstream {
        config.upstream.origin = upstream;
    }
    config.validate()?;

    info!(
        listen = %config.server.listen_addr,
        upstream = %config.upstream.origin,
        "Starting claude-tap"
    );

    // No total-request timeout: long-lived streaming responses must not be
    // artificially bounded.
    let client = reqwest::Client::builder().build()?;

    let state = Arc::new(AppState {
        client,
        config: config.clone(),
        store: Arc::new(CaptureStore::new()),
    });

    let listener = tokio::net::TcpListener::bind(&config.server.listen_addr).await?;
    info!("Proxy ready");

    axum::serve(listener, proxy::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
