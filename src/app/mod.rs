//! Application entry: listeners and lifecycle.

pub mod args;
pub mod logger;
pub mod tls;

use log::info;
use tokio::signal::unix::{signal, SignalKind};

use crate::config::get_config;
use crate::errors::Error;

/// Run the exporter until a shutdown signal arrives.
pub async fn run() -> Result<(), Error> {
    let config = get_config();
    config.show();

    tokio::spawn(crate::prometheus::start_exposition_server(
        config.general.metrics_port,
    ));

    if config.general.bridge_port > 0 && config.general.bridge_port != config.general.metrics_port
    {
        tokio::spawn(crate::prometheus::start_exposition_server(
            config.general.bridge_port,
        ));
    }

    tokio::spawn(crate::admin::start_management_server());

    wait_for_shutdown().await;
    info!("Shutting down");
    Ok(())
}

async fn wait_for_shutdown() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            log::error!("Failed to install SIGTERM handler: {err}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => (),
        _ = sigterm.recv() => (),
    }
}
