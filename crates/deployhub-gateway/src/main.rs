//! DeployHub gateway binary.

use std::net::SocketAddr;

use clap::Parser;
use deployhub_gateway::{create_router, AppState, Args, GatewayConfig};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("deployhub_gateway={},tower_http=info", args.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GatewayConfig::from_args(&args)?;
    info!(
        listen = %config.listen_addr,
        upstream_timeout_ms = config.upstream_timeout.as_millis(),
        body_limit = config.body_limit,
        "Starting DeployHub gateway"
    );

    let state = AppState::new(config.clone())?;
    for route in state.proxy.table().routes() {
        info!(%route, "route registered");
    }

    // Set up graceful shutdown
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            return;
        }
        info!("received shutdown signal");
        let _ = shutdown_tx.send(());
    });

    let app = create_router(state);
    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("Gateway listening on {}", config.listen_addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await?;

    info!("gateway shutdown complete");
    Ok(())
}
