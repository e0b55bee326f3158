//! `federation-master <config.json>` — see §6 for the CLI surface and
//! config shape.

use std::sync::Arc;

use color_eyre::eyre::{eyre, Result};
use federation_core::config::MasterConfig;
use federation_master::{state::MasterState, Dispatcher};
use tokio::sync::watch;
use tracing::info;

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let config_path = std::env::args()
        .nth(1)
        .ok_or_else(|| eyre!("usage: federation-master <config.json>"))?;

    let config = Arc::new(MasterConfig::load(&config_path)?);
    info!(id = %config.id, ip = %config.ip, port = config.port, "starting master");

    let state = Arc::new(MasterState::new(config.id.clone(), config.peers.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher = Arc::new(Dispatcher {
        state: Arc::clone(&state),
        config: Arc::clone(&config),
    });

    // Bind before spawning anything else so a bind failure is observed here
    // and propagates as a non-zero exit, instead of being discarded later
    // inside a spawned task's join result (§6).
    let listener = dispatcher.bind().await?;
    let accept_task = tokio::spawn(Arc::clone(&dispatcher).run(listener, shutdown_rx.clone()));
    let heartbeat_task = tokio::spawn(federation_master::loops::heartbeat_sender(
        Arc::clone(&state),
        Arc::clone(&config),
        shutdown_rx.clone(),
    ));
    let monitor_task = tokio::spawn(federation_master::loops::peer_monitor(
        Arc::clone(&state),
        Arc::clone(&config),
        shutdown_rx.clone(),
    ));
    let balancer_task = tokio::spawn(federation_master::loops::load_balancer(
        Arc::clone(&state),
        Arc::clone(&config),
        shutdown_rx.clone(),
    ));
    let producer_task = tokio::spawn(federation_master::loops::task_producer(
        Arc::clone(&state),
        shutdown_rx.clone(),
    ));
    let supervisor_task = tokio::spawn(federation_master::loops::supervisor_reporter(
        Arc::clone(&state),
        Arc::clone(&config),
        shutdown_rx.clone(),
    ));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    shutdown_tx.send(true).ok();

    let _ = tokio::join!(
        accept_task,
        heartbeat_task,
        monitor_task,
        balancer_task,
        producer_task,
        supervisor_task,
    );

    Ok(())
}
