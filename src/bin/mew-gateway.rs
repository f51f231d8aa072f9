// ABOUTME: Gateway binary - loads a space configuration and serves it
// ABOUTME: Usage: mew-gateway <space.yaml>

//! The `mew-gateway` binary.
//!
//! Loads the space configuration named on the command line, spawns the
//! router task, and (when a listener is configured) serves WebSocket
//! connections until interrupted.

use mew_protocol::prelude::*;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = match std::env::args().nth(1) {
        Some(path) => PathBuf::from(path),
        None => {
            eprintln!("usage: mew-gateway <space-config.yaml>");
            std::process::exit(2);
        }
    };

    let config = SpaceConfig::from_file(&config_path)?;
    let space_name = config.name.clone().unwrap_or_else(|| "space".to_string());
    let listener = config.listener.clone();
    tracing::info!(space = %space_name, config = %config_path.display(), "starting gateway");

    let (handle, router) = Router::spawn(config)?;

    let server_task = listener.map(|listener| {
        let mut server = WebSocketServer::new(listener, handle.clone());
        tokio::spawn(async move {
            if let Err(error) = server.start().await {
                tracing::error!(%error, "listener failed");
            }
        })
    });

    let mut router = router;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received; shutting down");
            handle.shutdown().await;
            let _ = (&mut router).await;
        }
        _ = &mut router => {
            tracing::warn!("router task ended");
        }
    }

    if let Some(server_task) = server_task {
        server_task.abort();
    }
    Ok(())
}
