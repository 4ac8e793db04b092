//! DeployHub events service binary.

use clap::Parser;
use deployhub_core::{NngChannel, NngChannelConfig, PublishChannel};
use deployhub_events::{create_router, run_broadcaster, AppState, Args, EventsConfig};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                let level = &args.log_level;
                format!("deployhub_events={level},deployhub_core={level},tower_http=info").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EventsConfig::from(&args);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listen_addr,
        bus = %config.bus_addr,
        topic = %config.topic,
        "starting DeployHub events service"
    );

    // Subscribe before accepting sockets so no event published after the
    // first upgrade can be missed by the channel.
    let channel = NngChannel::open(NngChannelConfig::subscriber(&config.bus_addr))?;
    let events = channel.subscribe(&config.topic)?;

    // Set up graceful shutdown
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel(1);
    let shutdown_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            return;
        }
        tracing::info!("received shutdown signal");
        let _ = shutdown_signal.send(());
    });

    let state = AppState::new(config.clone(), shutdown_tx.clone());
    let broadcaster = tokio::spawn(run_broadcaster(state.clone(), events));

    let app = create_router(state);
    let listener = TcpListener::bind(&config.listen_addr).await?;
    tracing::info!("events service listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await?;

    // Stop the channel so the broadcaster drains and exits.
    channel.close();
    if let Err(e) = broadcaster.await {
        tracing::error!(error = %e, "broadcaster task failed");
    }

    tracing::info!("events service shutdown complete");
    Ok(())
}
