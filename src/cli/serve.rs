use std::io;

use eyre::{Context, Result};
use tokio::signal;

use crate::{config::Config, hardware::HardwareError, server::Server};

pub async fn run(config: Config) -> Result<()> {
    tracing::info!("{config}");

    let hardware = super::connect_hardware(&config).await?;

    let server = Server::bind(&config, hardware.clone())
        .await
        .wrap_err_with(|| {
            format!(
                "Failed to listen on {}:{}",
                config.server.host, config.server.port
            )
        })?;

    let served = server.run(interrupted()).await;
    let disconnected = hardware.disconnect().await;

    outcome(served, disconnected)
}

/// The server's own failure takes precedence, a disconnect failure behind it is
/// only logged.
fn outcome(served: io::Result<()>, disconnected: Result<(), HardwareError>) -> Result<()> {
    match (served, disconnected) {
        (Err(e), Err(disconnect)) => {
            tracing::error!("Failed to disconnect hardware: {disconnect}");
            Err(e).wrap_err("Server failed")
        }
        (Err(e), Ok(())) => Err(e).wrap_err("Server failed"),
        (Ok(()), disconnected) => disconnected.wrap_err("Failed to disconnect hardware"),
    }
}

async fn interrupted() {
    match signal::ctrl_c().await {
        Ok(()) => tracing::info!("Interrupted, shutting down"),
        Err(e) => {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await
        }
    }
}
