mod config;
mod error;
mod handlers;
mod router;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use config::GatewayConfig;
use market_data::adapters::{HttpUpstream, SyntheticUpstream, Upstreams};
use market_data::MarketDataEngine;
use router::create_router;
use state::AppState;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting price feed gateway");

    let config = GatewayConfig::from_env();
    let engine_config = config
        .load_engine_config()
        .context("loading engine configuration")?;
    let upstreams = build_upstreams(&config)?;

    let engine =
        MarketDataEngine::new(engine_config, upstreams).context("validating engine configuration")?;
    let state = AppState::new(engine);
    let app = create_router(state.clone());

    let addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.bind, config.port))?;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(%addr, demo = config.demo, "Listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.engine.shutdown().await;
    tracing::info!("Gateway stopped");
    Ok(())
}

fn build_upstreams(config: &GatewayConfig) -> anyhow::Result<Upstreams> {
    if config.demo {
        tracing::warn!("Demo mode: serving synthetic bars");
        return Ok(Upstreams {
            stock: Arc::new(SyntheticUpstream::new("synthetic-stocks")),
            crypto: Arc::new(SyntheticUpstream::new("synthetic-crypto")),
            forex: Arc::new(SyntheticUpstream::new("synthetic-forex")),
        });
    }

    let api_key = config.api_key.as_deref();
    let timeout = config.upstream_timeout();
    let http = |name: &str, url: &str| {
        HttpUpstream::new(name, url, api_key, timeout)
            .with_context(|| format!("configuring {} upstream at {}", name, url))
    };

    Ok(Upstreams {
        stock: Arc::new(http("stocks", &config.stock_url)?),
        crypto: Arc::new(http("crypto", &config.crypto_url)?),
        forex: Arc::new(http("forex", &config.forex_url)?),
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections");
}
