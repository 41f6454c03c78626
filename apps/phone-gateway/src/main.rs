use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use phone_gateway::build_router;
use phone_gateway::config::{Config, LogFormat};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "phone-gateway", about = "Session-gated phone access gateway")]
struct Args {
    /// Overrides PHONE_GATEWAY_BIND_ADDR.
    #[arg(long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::from_env().context("invalid gateway configuration")?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }

    init_tracing(&config);
    tracing::info!(
        target: "phone_gateway",
        bind_addr = %config.bind_addr,
        ctm_host = %config.ctm_host,
        proxy_base_url = %config.proxy_base_url,
        proxy_full_passthrough = config.proxy_full_passthrough,
        "starting phone gateway",
    );

    let bind_addr = config.bind_addr;
    let app = build_router(config).context("failed to build router")?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated unexpectedly")?;

    tracing::info!(target: "phone_gateway", "phone gateway stopped");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(target: "phone_gateway", error = %error, "failed to listen for shutdown signal");
    }
}
