//! Server-selection probe — concurrent reachability, free-space, and
//! bandwidth measurement across the server list.
//!
//! One task per candidate, all joined on a single bounded channel. A
//! candidate that fails any check is simply dropped from the selection set;
//! the caller errors only when nothing survives.

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use tcpraw_core::wire::{MessageKind, FREE_BYTES_UNKNOWN, MAX_PROBE_PAYLOAD};

use crate::serverlist::{ServerEntry, ServerList};

/// Dial timeout while probing.
pub const PROBE_DIAL_TIMEOUT: Duration = Duration::from_millis(500);

/// Overall deadline for one probe exchange.
pub const PROBE_DEADLINE: Duration = Duration::from_secs(1);

/// Dial timeout for the real transfer connection.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub id: u8,
    pub addr: String,
    pub bytes_per_sec: f64,
}

/// Probe every present list entry concurrently. Results arrive in
/// completion order; failed candidates are silently absent.
pub async fn probe_all(list: &ServerList, upload_size: u64) -> Vec<ProbeResult> {
    let (tx, mut rx) = mpsc::channel(list.len());
    for entry in list.iter().flatten().cloned() {
        let tx = tx.clone();
        tokio::spawn(async move {
            // A failed probe drops the candidate from the selection set.
            if let Ok(result) = probe_one(&entry, upload_size).await {
                let _ = tx.send(result).await;
            }
        });
    }
    drop(tx);

    let mut results = Vec::new();
    while let Some(result) = rx.recv().await {
        results.push(result);
    }
    results
}

async fn probe_one(entry: &ServerEntry, upload_size: u64) -> Result<ProbeResult> {
    timeout(PROBE_DEADLINE, async {
        let mut stream = timeout(PROBE_DIAL_TIMEOUT, TcpStream::connect(&entry.addr))
            .await
            .context("dial timed out")??;

        stream.write_u8(MessageKind::Probe.into()).await?;
        stream.write_u64(upload_size).await?;
        stream.flush().await?;

        let free = stream.read_u64().await?;
        if free != FREE_BYTES_UNKNOWN && free < upload_size {
            bail!("server reports {free} free bytes, need {upload_size}");
        }

        let payload_len = stream.read_u32().await?;
        if payload_len > MAX_PROBE_PAYLOAD {
            bail!("oversized probe payload: {payload_len} bytes");
        }

        let start = Instant::now();
        let mut remaining = payload_len as usize;
        let mut buf = vec![0u8; 64 * 1024];
        while remaining > 0 {
            let n = remaining.min(buf.len());
            stream.read_exact(&mut buf[..n]).await?;
            remaining -= n;
        }
        let elapsed = start.elapsed().as_secs_f64().max(1e-6);

        Ok(ProbeResult {
            id: entry.id,
            addr: entry.addr.clone(),
            bytes_per_sec: payload_len as f64 / elapsed,
        })
    })
    .await
    .context("probe deadline exceeded")?
}

/// Highest measured throughput wins.
pub fn select_best(results: Vec<ProbeResult>) -> Option<ProbeResult> {
    results
        .into_iter()
        .max_by(|a, b| a.bytes_per_sec.total_cmp(&b.bytes_per_sec))
}

/// Probe the list and dial the winner with the normal timeout.
pub async fn connect_best(list: &ServerList, upload_size: u64) -> Result<(ProbeResult, TcpStream)> {
    let best = select_best(probe_all(list, upload_size).await).context("no server available")?;
    let stream = timeout(DIAL_TIMEOUT, TcpStream::connect(&best.addr))
        .await
        .context("dial timed out")??;
    Ok((best, stream))
}
