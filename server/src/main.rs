//! Plugin backend for Haiilo.
//!
//! Configuration comes from `HAIILO_*` environment variables, optionally
//! loaded from a `.env` file. `BIND_ADDR` picks the listen address.

use haiilo_bridge::{BridgeConfig, BridgeServer};
use miette::{Context, IntoDiagnostic};
use std::net::SocketAddr;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

#[tokio::main]
async fn main() -> miette::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "server=debug,haiilo_bridge=debug,info".into()),
        )
        .init();

    let config = BridgeConfig::from_env()
        .into_diagnostic()
        .wrap_err("failed to load configuration")?;

    let bridge = BridgeServer::builder()
        .config(config)
        .build()
        .into_diagnostic()
        .wrap_err("failed to build plugin bridge")?;

    let app = bridge.router();

    let addr: SocketAddr = std::env::var("BIND_ADDR")
        .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
        .parse()
        .into_diagnostic()
        .wrap_err("invalid BIND_ADDR")?;

    tracing::info!("plugin bridge listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()
        .wrap_err("failed to bind to address")?;

    axum::serve(listener, app)
        .await
        .into_diagnostic()
        .wrap_err("server error")?;

    Ok(())
}
