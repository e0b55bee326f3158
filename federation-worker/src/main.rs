//! `federation-worker <config.json>` — see §6 for the CLI surface and
//! config shape.

use std::time::Duration;

use color_eyre::eyre::{eyre, Result};
use federation_core::config::WorkerConfig;
use federation_core::WorkerId;
use federation_worker::WorkerClient;
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
        .ok_or_else(|| eyre!("usage: federation-worker <config.json>"))?;

    let config = WorkerConfig::load(&config_path)?;
    let worker_id = config.worker_id.clone().unwrap_or_else(WorkerId::generate);
    info!(%worker_id, home = %config.home_master.id, "starting worker");

    let mut client = WorkerClient::new(
        worker_id,
        config.home_master,
        Duration::from_secs_f64(config.reconnect_delay),
    );
    client.run().await;

    Ok(())
}
