//! Connection dispatcher — accept loop and message-kind demultiplex.
//!
//! One task per accepted connection. The worker tunes the socket buffers,
//! wraps the read half in a large buffered reader, reads a single kind
//! byte, and hands off to the matching handler. The connection closes when
//! the worker returns, whatever happened.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncReadExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use tcpraw_core::wire::{MessageKind, Status};

use crate::handler;
use crate::ratelimit::RateLimiter;
use crate::store::BlobStore;

/// Read buffer per connection.
const READ_BUF_BYTES: usize = 2 * 1024 * 1024;

/// Kernel socket buffer target, applied best-effort.
const SOCKET_BUF_BYTES: usize = 4 * 1024 * 1024;

/// Long-lived singletons every connection task works against.
pub struct ServerCtx {
    pub store: Arc<BlobStore>,
    pub limiter: Arc<RateLimiter>,
    pub server_id: u8,
    pub max_blob_bytes: u64,
}

/// Accept loop. Runs until the shutdown channel fires; accept errors are
/// logged and the loop continues.
pub async fn serve(
    listener: TcpListener,
    ctx: Arc<ServerCtx>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("dispatcher shutting down");
                return Ok(());
            }

            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_conn(stream, peer, ctx).await {
                        tracing::debug!(%peer, error = %e, "connection closed with error");
                    }
                });
            }
        }
    }
}

async fn handle_conn(stream: TcpStream, peer: SocketAddr, ctx: Arc<ServerCtx>) -> Result<()> {
    tune_socket(&stream);
    let (rd, wr) = stream.into_split();
    let mut rd = BufReader::with_capacity(READ_BUF_BYTES, rd);
    let mut wr = BufWriter::new(wr);

    let kind = rd.read_u8().await?;
    match MessageKind::try_from(kind) {
        Ok(MessageKind::Upload) => handler::upload(&mut rd, &mut wr, &ctx).await,
        Ok(MessageKind::SecureUpload) => handler::secure_upload(&mut rd, &mut wr, &ctx).await,
        Ok(MessageKind::Download) => handler::download(&mut rd, &mut wr, &ctx, peer.ip()).await,
        Ok(MessageKind::Probe) => handler::probe(&mut rd, &mut wr, &ctx).await,
        Ok(MessageKind::Bench) => handler::bench(&mut rd, &mut wr).await,
        Err(e) => {
            tracing::warn!(%peer, error = %e, "rejecting connection");
            handler::respond(&mut wr, Status::Error).await
        }
    }
}

/// 4 MiB send/recv buffers where the socket supports tuning.
fn tune_socket(stream: &TcpStream) {
    let sock = socket2::SockRef::from(stream);
    let _ = sock.set_recv_buffer_size(SOCKET_BUF_BYTES);
    let _ = sock.set_send_buffer_size(SOCKET_BUF_BYTES);
}
