//! Shared fixtures: an in-process server on an ephemeral port.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use tcpraw_cli::serverlist::{self, ServerList};
use tcprawd::dispatch::{self, ServerCtx};
use tcprawd::ratelimit::RateLimiter;
use tcprawd::store::BlobStore;

pub struct ServerOptions {
    pub server_id: u8,
    pub retention: Duration,
    pub max_blob_bytes: u64,
    pub max_attempts: u32,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            server_id: 3,
            retention: Duration::from_secs(3600),
            max_blob_bytes: 1024 * 1024 * 1024,
            // Effectively unlimited: most tests are not about throttling.
            max_attempts: 100_000,
        }
    }
}

pub struct TestServer {
    pub ctx: Arc<ServerCtx>,
    pub addr: String,
    pub data_dir: TempDir,
    shutdown: broadcast::Sender<()>,
}

impl TestServer {
    /// A single-entry server list pointing at this server.
    pub fn list(&self) -> ServerList {
        serverlist::single(self.ctx.server_id, &self.addr)
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }
}

pub async fn start_server(opts: ServerOptions) -> TestServer {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(BlobStore::open(data_dir.path(), opts.retention).expect("store opens"));
    let limiter = Arc::new(RateLimiter::new(
        opts.max_attempts,
        Duration::from_secs(3600),
        Duration::from_secs(3600),
    ));
    let ctx = Arc::new(ServerCtx {
        store,
        limiter,
        server_id: opts.server_id,
        max_blob_bytes: opts.max_blob_bytes,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr").to_string();
    let (shutdown, _) = broadcast::channel(1);
    tokio::spawn(dispatch::serve(listener, ctx.clone(), shutdown.subscribe()));

    TestServer {
        ctx,
        addr,
        data_dir,
        shutdown,
    }
}

pub async fn start_default_server() -> TestServer {
    start_server(ServerOptions::default()).await
}

/// Write `bytes` to `<dir>/<name>` and return the path.
pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).expect("write test file");
    path
}
