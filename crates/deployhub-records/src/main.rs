//! DeployHub record store binary.

use std::sync::Arc;

use clap::Parser;
use deployhub_core::{NngChannel, NngChannelConfig, PublishChannel};
use deployhub_records::{create_router, AppState, Args, DeploymentStore, RecordsConfig};
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
                format!("deployhub_records={level},deployhub_core={level},tower_http=info").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RecordsConfig::from(&args);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listen_addr,
        data_dir = %config.store.path.display(),
        bus = %config.bus_addr,
        topic = %config.topic,
        "starting DeployHub record store"
    );

    tracing::info!("opening store");
    let store = DeploymentStore::open(&config.store)?;
    tracing::info!(deployments = store.len(), "store opened");

    let channel = Arc::new(NngChannel::open(NngChannelConfig::publisher(&config.bus_addr))?);
    tracing::info!(bus = %config.bus_addr, "publish channel listening");

    let state = AppState::new(store, channel.clone(), &config.topic);
    let store = state.store.clone();

    // Set up graceful shutdown
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            return;
        }
        tracing::info!("received shutdown signal");
        let _ = shutdown_tx.send(());
    });

    let app = create_router(state);
    let listener = TcpListener::bind(&config.listen_addr).await?;
    tracing::info!("record store listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await?;

    channel.close();
    store.flush()?;
    tracing::info!("record store shutdown complete");
    Ok(())
}
