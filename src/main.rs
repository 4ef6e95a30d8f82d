//! Multi-room TCP Chat Server - Entry Point
//!
//! Reads the configuration, starts the TCP listener and accepts connections.

use std::env;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use weeby_chat::{serve, ChatServer, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=weeby_chat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("weeby_chat=info")),
        )
        .init();

    // Flags: --config <file.json>, --ip <addr>, --port <n>
    let config = Config::from_args(env::args().skip(1))?;

    // Start TCP listener
    let listener = TcpListener::bind(config.bind_addr()).await?;
    info!("Chat server listening on {}", config.bind_addr());
    info!(
        "Idle timeout {}s, line limit {} bytes",
        config.idle_timeout_secs, config.max_line_bytes
    );

    serve(listener, Arc::new(ChatServer::new(config))).await;
    Ok(())
}
