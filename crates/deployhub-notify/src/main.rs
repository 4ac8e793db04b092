//! DeployHub webhook forwarder binary.

use clap::Parser;
use deployhub_core::{NngChannel, NngChannelConfig, PublishChannel};
use deployhub_notify::{create_router, run_forwarder, AppState, Args, NotifyConfig};
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
                format!("deployhub_notify={level},deployhub_core={level},tower_http=info").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = NotifyConfig::from(&args);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listen_addr,
        bus = %config.bus_addr,
        topic = %config.topic,
        max_attempts = config.retry.max_attempts,
        "starting DeployHub webhook forwarder"
    );

    let state = AppState::new(&config)?;
    if state.forwarder.urls().is_empty() {
        tracing::warn!("no webhook urls configured, events will be discarded");
    }
    for url in state.forwarder.urls() {
        tracing::info!(%url, "webhook registered");
    }

    let channel = NngChannel::open(NngChannelConfig::subscriber(&config.bus_addr))?;
    let events = channel.subscribe(&config.topic)?;
    let forwarder = tokio::spawn(run_forwarder(state.clone(), events));

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
    tracing::info!("webhook forwarder listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await?;

    // Let in-flight deliveries finish before exiting.
    channel.close();
    if let Err(e) = forwarder.await {
        tracing::error!(error = %e, "forwarder task failed");
    }

    tracing::info!("webhook forwarder shutdown complete");
    Ok(())
}
