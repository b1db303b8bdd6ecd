//! tcprawd — short-lived encrypted file relay server.

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use tcpraw_core::config::TcprawConfig;
use tcprawd::dispatch::{self, ServerCtx};
use tcprawd::http;
use tcprawd::ratelimit::RateLimiter;
use tcprawd::store::{self, BlobStore};

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity, e.g. RUST_LOG=debug tcprawd
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = TcprawConfig::write_default_if_missing()?;
    tracing::debug!(path = %config_path.display(), "config file");
    let config = TcprawConfig::load()?.server;
    tracing::info!(
        server_id = config.server_id,
        data_dir = %config.data_dir.display(),
        retention_secs = config.retention_secs,
        "tcprawd starting"
    );

    let store = Arc::new(BlobStore::open(&config.data_dir, config.retention())?);
    tracing::info!(blobs = store.len().await, "store ready");

    let limiter = Arc::new(RateLimiter::new(
        config.limit.max_attempts,
        config.limit.window(),
        config.limit.ban(),
    ));
    let ctx = Arc::new(ServerCtx {
        store: store.clone(),
        limiter,
        server_id: config.server_id,
        max_blob_bytes: config.max_blob_bytes,
    });

    let listener = TcpListener::bind(("0.0.0.0", config.tcp_port)).await?;
    tracing::info!(port = config.tcp_port, "listening");

    let (shutdown_tx, _) = broadcast::channel(1);
    let tcp_task = tokio::spawn(dispatch::serve(
        listener,
        ctx.clone(),
        shutdown_tx.subscribe(),
    ));
    let gc_task = tokio::spawn(store::sweep_loop(store.clone(), config.sweep_interval()));

    let http_port = config.http_port;
    let http_task = tokio::spawn(async move {
        if http_port == 0 {
            futures::future::pending::<()>().await;
            Ok(())
        } else {
            let listener = TcpListener::bind(("0.0.0.0", http_port)).await?;
            http::serve(listener, ctx).await
        }
    });

    // These run forever; reaching here means one of them died.
    tokio::select! {
        r = tcp_task  => tracing::error!("dispatcher exited: {:?}", r),
        r = gc_task   => tracing::error!("gc sweeper exited: {:?}", r),
        r = http_task => tracing::error!("http surface exited: {:?}", r),
    }

    Ok(())
}
