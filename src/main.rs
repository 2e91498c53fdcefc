//! TinyKV server entry point.
//!
//! Sets up logging, the storage engine and its expiry task, then accepts
//! connections until Ctrl+C.

use anyhow::Context;
use clap::Parser;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tinykv::commands::CommandHandler;
use tinykv::config::Config;
use tinykv::connection::{handle_connection, ConnectionStats};
use tinykv::storage::{ExpiryManager, StorageEngine};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn print_banner(config: &Config) {
    println!(
        r#"
TinyKV v{} - In-Memory Key-Value Server
──────────────────────────────────────────────────────────────
Server started on {}
Ready to accept connections.

Use Ctrl+C to shutdown gracefully.
"#,
        tinykv::VERSION,
        config.bind_address()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .with_context(|| format!("invalid log level '{}'", config.log_level))?;
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let storage = Arc::new(StorageEngine::new());
    let expiry = Arc::new(ExpiryManager::with_config(
        Arc::clone(&storage),
        config.expiry_config(),
    ));
    expiry.start().context("failed to start active expiry")?;

    let handler = CommandHandler::new(Arc::clone(&storage), Arc::clone(&expiry));
    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;

    print_banner(&config);
    info!("Listening on {}", config.bind_address());

    tokio::select! {
        _ = accept_loop(listener, handler, Arc::clone(&stats)) => {}
        result = signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            info!("Shutdown signal received, stopping server...");
        }
    }

    expiry.stop().await;

    let storage_stats = storage.stats();
    info!(
        keys = storage_stats.keys,
        keys_with_expiry = storage.keys_with_expiry().len(),
        expired = storage_stats.expired,
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        command_errors = stats.command_errors.load(Ordering::Relaxed),
        "Server shutdown complete"
    );
    Ok(())
}

/// Main loop that accepts incoming connections
async fn accept_loop(listener: TcpListener, handler: CommandHandler, stats: Arc<ConnectionStats>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_connection(
                    stream,
                    addr,
                    handler.clone(),
                    Arc::clone(&stats),
                ));
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}
