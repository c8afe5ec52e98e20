//! ws-engine: WebSocket echo server
//!
//! Runs the engine with an echo listener until Ctrl-C.

use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use ws_engine::{Config, EchoListener, Server};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        workers = ?config.workers,
        max_connections = config.max_connections,
        max_frame_size = config.websocket.max_frame_size,
        "Starting ws-engine server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.enable_all().build()?;

    runtime.block_on(async {
        let server = Server::new(config, Arc::new(EchoListener));
        server.run_until_ctrl_c().await
    })?;

    Ok(())
}
