//! Probe and bench handlers — free space and throughput measurement.

use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use tcpraw_core::wire::{
    BENCH_BLOCK_LEN, BENCH_PHASE_SECS, FREE_BYTES_UNKNOWN, PROBE_PAYLOAD_LEN,
};

use crate::dispatch::ServerCtx;

/// `T`, u64 intended upload size. Replies with the free-byte count and a
/// fixed timing payload; the client divides bytes by elapsed time.
pub async fn probe<R, W>(rd: &mut R, wr: &mut W, ctx: &ServerCtx) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let requested = rd.read_u64().await?;
    let free = ctx.store.free_bytes().unwrap_or(FREE_BYTES_UNKNOWN);
    tracing::debug!(requested, free, "probe");

    wr.write_u64(free).await?;
    wr.write_u32(PROBE_PAYLOAD_LEN).await?;

    let zeros = vec![0u8; BENCH_BLOCK_LEN];
    let mut remaining = PROBE_PAYLOAD_LEN as usize;
    while remaining > 0 {
        let n = remaining.min(zeros.len());
        wr.write_all(&zeros[..n]).await?;
        remaining -= n;
    }
    wr.flush().await?;
    Ok(())
}

/// `B`: a send phase of length-prefixed blocks for roughly ten seconds, a
/// zero marker, then the mirror receive phase, closed by a u64 byte-count
/// summary of what the server took in.
pub async fn bench<R, W>(rd: &mut R, wr: &mut W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let phase = Duration::from_secs(BENCH_PHASE_SECS);
    let block = vec![0u8; BENCH_BLOCK_LEN];

    let start = Instant::now();
    let mut sent = 0u64;
    while start.elapsed() < phase {
        wr.write_u32(block.len() as u32).await?;
        wr.write_all(&block).await?;
        sent += block.len() as u64;
    }
    wr.write_u32(0).await?;
    wr.flush().await?;

    let mut received = 0u64;
    let mut buf = vec![0u8; BENCH_BLOCK_LEN];
    loop {
        let len = rd.read_u32().await? as usize;
        if len == 0 {
            break;
        }
        if len > buf.len() {
            bail!("bench block of {len} bytes exceeds the {BENCH_BLOCK_LEN} cap");
        }
        rd.read_exact(&mut buf[..len]).await?;
        received += len as u64;
    }
    wr.write_u64(received).await?;
    wr.flush().await?;

    tracing::debug!(sent, received, "bench complete");
    Ok(())
}
