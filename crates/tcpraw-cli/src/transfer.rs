//! Send, secure-send, and get flows.
//!
//! Regular uploads seal 256 KiB chunks under the code-derived key, so the
//! whole transfer runs in constant memory. Secure uploads use a random
//! external key and stay single-blob up to 500 MiB; past that they switch
//! to chunks so RAM stays bounded there too.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::time::timeout;

use tcpraw_core::crypto::{self, derive_code_key, BlobKey, Checksum};
use tcpraw_core::wire::{
    self, ChunkFrame, MessageKind, PayloadFormat, SecureFormat, SingleBlob, Status, UploadHeader,
    CHUNK_SIZE,
};
use tcpraw_core::Code;

use crate::probe::{self, DIAL_TIMEOUT};
use crate::serverlist::ServerList;

/// Secure uploads at or below this size travel as one sealed buffer.
pub const SECURE_SINGLE_LIMIT: u64 = 500 * 1024 * 1024;

/// Largest single-blob payload the client will buffer on download.
const MAX_SINGLE_BLOB_BYTES: u64 = 8 * 1024 * 1024 * 1024;

/// A regular upload needed before its key can be derived: the code.
#[derive(Debug)]
pub struct SendOutcome {
    pub code: Code,
    pub checksum: [u8; 32],
}

/// A secure upload: the server-minted code plus the local random key.
pub struct SecureOutcome {
    pub code: Code,
    pub key: BlobKey,
}

/// The code was stored with an external key the caller did not supply.
#[derive(Debug, thiserror::Error)]
#[error("this code requires its key")]
pub struct KeyRequired;

// ── Send ──────────────────────────────────────────────────────────────────────

/// Regular send: probe the list, mint a code on the winner, stream sealed
/// chunks.
pub async fn send(path: &Path, list: &ServerList) -> Result<SendOutcome> {
    let (checksum, len) = file_checksum(path).await?;
    let name = base_name(path);

    let (best, stream) = probe::connect_best(list, len).await?;
    let code = Code::mint(best.id)?;
    let key = derive_code_key(&code);

    let (rd, wr) = stream.into_split();
    let mut rd = BufReader::new(rd);
    let mut wr = BufWriter::new(wr);

    wr.write_u8(MessageKind::Upload.into()).await?;
    wire::write_code(&mut wr, &code).await?;
    UploadHeader {
        name,
        total_plain: len,
        num_chunks: chunk_count(len),
        checksum,
    }
    .write_to(&mut wr)
    .await?;
    stream_sealed_chunks(path, &key, &mut wr).await?;
    wr.flush().await?;

    expect_ok(&mut rd).await?;
    Ok(SendOutcome { code, checksum })
}

/// Secure send with the default single-blob limit.
pub async fn secure_send(path: &Path, list: &ServerList) -> Result<SecureOutcome> {
    secure_send_with(path, list, SECURE_SINGLE_LIMIT).await
}

/// Secure send. The server mints and returns the code; the key never
/// leaves this process.
pub async fn secure_send_with(
    path: &Path,
    list: &ServerList,
    single_limit: u64,
) -> Result<SecureOutcome> {
    let key = BlobKey::generate();
    let (checksum, len) = file_checksum(path).await?;
    let name = base_name(path);

    let (_best, stream) = probe::connect_best(list, len).await?;
    let (rd, wr) = stream.into_split();
    let mut rd = BufReader::new(rd);
    let mut wr = BufWriter::new(wr);

    wr.write_u8(MessageKind::SecureUpload.into()).await?;
    if len <= single_limit {
        wr.write_u8(SecureFormat::Single as u8).await?;
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let (nonce, sealed) = crypto::seal(&key, &data)?;
        SingleBlob {
            name,
            checksum,
            nonce,
            sealed,
        }
        .write_to(&mut wr)
        .await?;
    } else {
        wr.write_u8(SecureFormat::Chunked as u8).await?;
        UploadHeader {
            name,
            total_plain: len,
            num_chunks: chunk_count(len),
            checksum,
        }
        .write_to(&mut wr)
        .await?;
        stream_sealed_chunks(path, &key, &mut wr).await?;
    }
    wr.flush().await?;

    expect_ok(&mut rd).await?;
    let code = wire::read_code(&mut rd).await?;
    Ok(SecureOutcome { code, key })
}

// ── Get ───────────────────────────────────────────────────────────────────────

/// Download by code. The server is resolved from the code's first digit.
/// `key` is required only for secure blobs; regular blobs decrypt under the
/// code-derived key.
pub async fn get(
    code: Code,
    key: Option<BlobKey>,
    list: &ServerList,
    out_dir: &Path,
) -> Result<PathBuf> {
    let entry = list[code.server_id() as usize]
        .as_ref()
        .with_context(|| format!("no server listed for id {}", code.server_id()))?;

    let stream = timeout(DIAL_TIMEOUT, TcpStream::connect(&entry.addr))
        .await
        .context("dial timed out")?
        .with_context(|| format!("failed to connect to {}", entry.addr))?;
    let (rd, wr) = stream.into_split();
    let mut rd = BufReader::new(rd);
    let mut wr = BufWriter::new(wr);

    wr.write_u8(MessageKind::Download.into()).await?;
    wire::write_code(&mut wr, &code).await?;
    wr.flush().await?;

    match Status::try_from(rd.read_u8().await?)? {
        Status::Ok => {}
        Status::NotFound => bail!("code unknown or expired"),
        Status::ChecksumMismatch | Status::Error => bail!("server error"),
    }

    let format = PayloadFormat::try_from(rd.read_u8().await?)?;
    let key = match (format.is_secure(), key) {
        (true, Some(key)) => key,
        (true, None) => return Err(anyhow!(KeyRequired)),
        (false, _) => derive_code_key(&code),
    };

    if format.is_chunked() {
        receive_chunked(&mut rd, &key, out_dir).await
    } else {
        receive_single(&mut rd, &key, out_dir).await
    }
}

async fn receive_chunked<R: AsyncRead + Unpin>(
    rd: &mut R,
    key: &BlobKey,
    out_dir: &Path,
) -> Result<PathBuf> {
    let header = UploadHeader::read_from(rd).await?;
    let out_path = out_dir.join(&header.name);

    let result = async {
        let file = tokio::fs::File::create(&out_path).await?;
        let mut file = BufWriter::new(file);
        let mut sum = Checksum::new();
        let mut total = 0u64;
        for _ in 0..header.num_chunks {
            let frame = wire::read_chunk_frame(rd).await?;
            let plain = crypto::open(key, &frame.nonce, &frame.sealed)
                .map_err(|_| checksum_mismatch())?;
            sum.update(&plain);
            total += plain.len() as u64;
            file.write_all(&plain).await?;
        }
        file.flush().await?;
        if total != header.total_plain || sum.finalize() != header.checksum {
            return Err(checksum_mismatch());
        }
        Ok(())
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&out_path).await;
        return Err(e);
    }
    Ok(out_path)
}

async fn receive_single<R: AsyncRead + Unpin>(
    rd: &mut R,
    key: &BlobKey,
    out_dir: &Path,
) -> Result<PathBuf> {
    let blob = SingleBlob::read_from(rd, MAX_SINGLE_BLOB_BYTES).await?;
    let plain = crypto::open(key, &blob.nonce, &blob.sealed).map_err(|_| checksum_mismatch())?;
    if crypto::checksum(&plain) != blob.checksum {
        return Err(checksum_mismatch());
    }
    let out_path = out_dir.join(&blob.name);
    tokio::fs::write(&out_path, &plain)
        .await
        .with_context(|| format!("failed to write {}", out_path.display()))?;
    Ok(out_path)
}

// ── Bench ─────────────────────────────────────────────────────────────────────

pub struct BenchSummary {
    pub download_bps: f64,
    pub upload_bps: f64,
}

/// Symmetric throughput exchange against one server.
pub async fn bench(addr: &str) -> Result<BenchSummary> {
    use std::time::Instant;
    use tcpraw_core::wire::{BENCH_BLOCK_LEN, BENCH_PHASE_SECS};

    let stream = timeout(DIAL_TIMEOUT, TcpStream::connect(addr))
        .await
        .context("dial timed out")?
        .with_context(|| format!("failed to connect to {addr}"))?;
    let (rd, wr) = stream.into_split();
    let mut rd = BufReader::new(rd);
    let mut wr = BufWriter::new(wr);

    wr.write_u8(MessageKind::Bench.into()).await?;
    wr.flush().await?;

    // Download phase: the server streams blocks until a zero marker.
    let start = Instant::now();
    let mut received = 0u64;
    let mut buf = vec![0u8; BENCH_BLOCK_LEN];
    loop {
        let len = rd.read_u32().await? as usize;
        if len == 0 {
            break;
        }
        if len > buf.len() {
            bail!("oversized bench block: {len} bytes");
        }
        rd.read_exact(&mut buf[..len]).await?;
        received += len as u64;
    }
    let download_bps = received as f64 / start.elapsed().as_secs_f64().max(1e-6);

    // Upload phase: mirror it back for roughly the same duration.
    let block = vec![0u8; BENCH_BLOCK_LEN];
    let start = Instant::now();
    let phase = std::time::Duration::from_secs(BENCH_PHASE_SECS);
    while start.elapsed() < phase {
        wr.write_u32(block.len() as u32).await?;
        wr.write_all(&block).await?;
    }
    wr.write_u32(0).await?;
    wr.flush().await?;
    let elapsed = start.elapsed().as_secs_f64().max(1e-6);

    let echoed = rd.read_u64().await?;
    Ok(BenchSummary {
        download_bps,
        upload_bps: echoed as f64 / elapsed,
    })
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn checksum_mismatch() -> anyhow::Error {
    anyhow!("checksum mismatch — wrong code or corrupted data")
}

fn chunk_count(len: u64) -> u32 {
    len.div_ceil(CHUNK_SIZE as u64) as u32
}

/// Base name of the upload, truncated to the wire cap. Falls back to
/// "upload" for paths with no usable final component.
fn base_name(path: &Path) -> String {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload");
    wire::truncate_name(name).to_string()
}

/// One streaming pass: SHA-256 and length of the plaintext.
async fn file_checksum(path: &Path) -> Result<([u8; 32], u64)> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut sum = Checksum::new();
    let mut len = 0u64;
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        sum.update(&buf[..n]);
        len += n as u64;
    }
    Ok((sum.finalize(), len))
}

/// Seal the file chunk by chunk and write the frames.
async fn stream_sealed_chunks<W: AsyncWrite + Unpin>(
    path: &Path,
    key: &BlobKey,
    w: &mut W,
) -> Result<u32> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut chunks = 0u32;
    loop {
        let n = read_full(&mut file, &mut buf).await?;
        if n == 0 {
            break;
        }
        let (nonce, sealed) = crypto::seal(key, &buf[..n])?;
        wire::write_chunk_frame(w, &ChunkFrame { nonce, sealed }).await?;
        chunks += 1;
        if n < buf.len() {
            break;
        }
    }
    Ok(chunks)
}

/// Fill `buf` as far as the reader allows; 0 only at EOF.
async fn read_full<R: AsyncRead + Unpin>(r: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

async fn expect_ok<R: AsyncRead + Unpin>(rd: &mut R) -> Result<()> {
    match Status::try_from(rd.read_u8().await?)? {
        Status::Ok => Ok(()),
        Status::ChecksumMismatch => bail!("checksum mismatch — wrong code or corrupted data"),
        Status::NotFound => bail!("code unknown or expired"),
        Status::Error => bail!("server error"),
    }
}
