//! tcpraw wire format — framing for everything client and server exchange.
//!
//! These layouts ARE the protocol. All multi-byte integers are big-endian;
//! strings are length-prefixed with no terminator. A connection opens with a
//! single message-kind byte, then the layout for that kind follows.
//!
//! The streaming primitives below never hold more than one sealed chunk in
//! memory, so uploads and downloads of arbitrarily large blobs run in
//! constant space.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::code::{Code, CodeError, CODE_LEN};
use crate::crypto::{NONCE_LEN, TAG_LEN};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Plaintext bytes per chunk. Each chunk is sealed independently.
pub const CHUNK_SIZE: usize = 256 * 1024;

/// Largest sealed frame a peer will accept: one chunk plus its tag.
pub const MAX_SEALED_LEN: u32 = (CHUNK_SIZE + TAG_LEN) as u32;

/// Name length cap. Senders truncate; receivers reject anything longer.
pub const MAX_NAME_LEN: usize = u16::MAX as usize;

/// Free-space sentinel in probe replies: the server does not know.
pub const FREE_BYTES_UNKNOWN: u64 = u64::MAX;

/// Bytes of timing payload a server sends per probe.
pub const PROBE_PAYLOAD_LEN: u32 = 1024 * 1024;

/// Largest probe payload a client will accept before declaring the server
/// invalid.
pub const MAX_PROBE_PAYLOAD: u32 = 4 * 1024 * 1024;

/// Block size for the bench exchange. Each block is prefixed with its u32
/// length; a zero length ends the phase.
pub const BENCH_BLOCK_LEN: usize = 64 * 1024;

/// Approximate duration of each bench direction.
pub const BENCH_PHASE_SECS: u64 = 10;

// ── Message kinds ─────────────────────────────────────────────────────────────

/// First byte of every connection. Unknown kinds get an error status and an
/// immediate close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// Regular upload: code-derived key, always chunked.
    Upload = b'U',
    /// Secure upload: externally-held key, single-blob or chunked.
    SecureUpload = b'S',
    /// Download by code.
    Download = b'D',
    /// Free-space and throughput probe.
    Probe = b'T',
    /// Symmetric throughput bench.
    Bench = b'B',
}

impl TryFrom<u8> for MessageKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            b'U' => Ok(MessageKind::Upload),
            b'S' => Ok(MessageKind::SecureUpload),
            b'D' => Ok(MessageKind::Download),
            b'T' => Ok(MessageKind::Probe),
            b'B' => Ok(MessageKind::Bench),
            other => Err(WireError::UnknownKind(other)),
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(k: MessageKind) -> u8 {
        k as u8
    }
}

// ── Status codes ──────────────────────────────────────────────────────────────

/// Single status byte on responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    ChecksumMismatch = 1,
    Error = 2,
    NotFound = 3,
}

impl TryFrom<u8> for Status {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(Status::Ok),
            1 => Ok(Status::ChecksumMismatch),
            2 => Ok(Status::Error),
            3 => Ok(Status::NotFound),
            other => Err(WireError::UnknownStatus(other)),
        }
    }
}

impl From<Status> for u8 {
    fn from(s: Status) -> u8 {
        s as u8
    }
}

// ── Payload formats ───────────────────────────────────────────────────────────

/// Format byte after an OK download status: how the payload is laid out and
/// which key opens it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadFormat {
    Single = 0,
    Chunked = 1,
    SecureSingle = 2,
    SecureChunked = 3,
}

impl PayloadFormat {
    pub fn from_parts(secure: bool, chunked: bool) -> Self {
        match (secure, chunked) {
            (false, false) => PayloadFormat::Single,
            (false, true) => PayloadFormat::Chunked,
            (true, false) => PayloadFormat::SecureSingle,
            (true, true) => PayloadFormat::SecureChunked,
        }
    }

    pub fn is_secure(self) -> bool {
        matches!(self, PayloadFormat::SecureSingle | PayloadFormat::SecureChunked)
    }

    pub fn is_chunked(self) -> bool {
        matches!(self, PayloadFormat::Chunked | PayloadFormat::SecureChunked)
    }
}

impl TryFrom<u8> for PayloadFormat {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(PayloadFormat::Single),
            1 => Ok(PayloadFormat::Chunked),
            2 => Ok(PayloadFormat::SecureSingle),
            3 => Ok(PayloadFormat::SecureChunked),
            other => Err(WireError::UnknownFormat(other)),
        }
    }
}

/// Format byte directly after the `S` tag on secure uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SecureFormat {
    Single = 0,
    Chunked = 1,
}

impl TryFrom<u8> for SecureFormat {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(SecureFormat::Single),
            1 => Ok(SecureFormat::Chunked),
            other => Err(WireError::UnknownFormat(other)),
        }
    }
}

// ── Codes and names ───────────────────────────────────────────────────────────

pub async fn read_code<R: AsyncRead + Unpin>(r: &mut R) -> Result<Code, WireError> {
    let mut buf = [0u8; CODE_LEN];
    r.read_exact(&mut buf).await?;
    Ok(Code::from_bytes(buf)?)
}

pub async fn write_code<W: AsyncWrite + Unpin>(w: &mut W, code: &Code) -> Result<(), WireError> {
    w.write_all(code.as_bytes()).await?;
    Ok(())
}

/// Reject names that could escape the data or output directory: empty names,
/// path separators, `..`, and control characters.
pub fn validate_name(name: &str) -> Result<(), WireError> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.chars().any(char::is_control)
    {
        return Err(WireError::InvalidName);
    }
    Ok(())
}

/// Truncate a name to the wire cap on a char boundary (sender side).
pub fn truncate_name(name: &str) -> &str {
    if name.len() <= MAX_NAME_LEN {
        return name;
    }
    let mut end = MAX_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

pub async fn read_name<R: AsyncRead + Unpin>(r: &mut R) -> Result<String, WireError> {
    let len = r.read_u16().await? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    let name = String::from_utf8(buf).map_err(|_| WireError::InvalidName)?;
    validate_name(&name)?;
    Ok(name)
}

pub async fn write_name<W: AsyncWrite + Unpin>(w: &mut W, name: &str) -> Result<(), WireError> {
    if name.len() > MAX_NAME_LEN {
        return Err(WireError::InvalidName);
    }
    w.write_u16(name.len() as u16).await?;
    w.write_all(name.as_bytes()).await?;
    Ok(())
}

// ── Upload header (chunked payloads) ──────────────────────────────────────────

/// Header preceding a chunked payload: the regular upload frame after its
/// code, the secure chunked upload after its format byte, and the chunked
/// download payload after its format byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadHeader {
    pub name: String,
    pub total_plain: u64,
    pub num_chunks: u32,
    pub checksum: [u8; 32],
}

impl UploadHeader {
    pub async fn read_from<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self, WireError> {
        let name = read_name(r).await?;
        let total_plain = r.read_u64().await?;
        let num_chunks = r.read_u32().await?;
        let mut checksum = [0u8; 32];
        r.read_exact(&mut checksum).await?;
        Ok(Self {
            name,
            total_plain,
            num_chunks,
            checksum,
        })
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<(), WireError> {
        write_name(w, &self.name).await?;
        w.write_u64(self.total_plain).await?;
        w.write_u32(self.num_chunks).await?;
        w.write_all(&self.checksum).await?;
        Ok(())
    }
}

// ── Single-blob payload ───────────────────────────────────────────────────────

/// A complete single-sealed payload: the secure single-blob upload after its
/// format byte, and the single-blob download payload after its format byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleBlob {
    pub name: String,
    pub checksum: [u8; 32],
    pub nonce: [u8; NONCE_LEN],
    pub sealed: Vec<u8>,
}

impl SingleBlob {
    /// Read a single-blob payload, bounding the sealed length by
    /// `max_plain + 16`.
    pub async fn read_from<R: AsyncRead + Unpin>(
        r: &mut R,
        max_plain: u64,
    ) -> Result<Self, WireError> {
        let name = read_name(r).await?;
        let mut checksum = [0u8; 32];
        r.read_exact(&mut checksum).await?;
        let mut nonce = [0u8; NONCE_LEN];
        r.read_exact(&mut nonce).await?;
        let sealed_len = r.read_u64().await?;
        if sealed_len < TAG_LEN as u64 {
            return Err(WireError::BadSealedLen(sealed_len));
        }
        if sealed_len - TAG_LEN as u64 > max_plain {
            return Err(WireError::BlobTooLarge {
                got: sealed_len - TAG_LEN as u64,
                max: max_plain,
            });
        }
        let mut sealed = vec![0u8; sealed_len as usize];
        r.read_exact(&mut sealed).await?;
        Ok(Self {
            name,
            checksum,
            nonce,
            sealed,
        })
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<(), WireError> {
        write_name(w, &self.name).await?;
        w.write_all(&self.checksum).await?;
        w.write_all(&self.nonce).await?;
        w.write_u64(self.sealed.len() as u64).await?;
        w.write_all(&self.sealed).await?;
        Ok(())
    }
}

// ── Chunk frames ──────────────────────────────────────────────────────────────

/// One sealed chunk as it appears on the wire and in `<code>.dat` files:
/// 12-byte nonce, u32 sealed length, then `ciphertext || tag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFrame {
    pub nonce: [u8; NONCE_LEN],
    pub sealed: Vec<u8>,
}

impl ChunkFrame {
    /// Plaintext bytes this frame decrypts to.
    pub fn plain_len(&self) -> u64 {
        (self.sealed.len() - TAG_LEN) as u64
    }
}

pub async fn read_chunk_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<ChunkFrame, WireError> {
    let mut nonce = [0u8; NONCE_LEN];
    r.read_exact(&mut nonce).await?;
    let sealed_len = r.read_u32().await?;
    if sealed_len < TAG_LEN as u32 || sealed_len > MAX_SEALED_LEN {
        return Err(WireError::BadSealedLen(sealed_len as u64));
    }
    let mut sealed = vec![0u8; sealed_len as usize];
    r.read_exact(&mut sealed).await?;
    Ok(ChunkFrame { nonce, sealed })
}

pub async fn write_chunk_frame<W: AsyncWrite + Unpin>(
    w: &mut W,
    frame: &ChunkFrame,
) -> Result<(), WireError> {
    w.write_all(&frame.nonce).await?;
    w.write_u32(frame.sealed.len() as u32).await?;
    w.write_all(&frame.sealed).await?;
    Ok(())
}

/// Relay `num_chunks` sealed frames from `r` to `w` one frame at a time,
/// enforcing the running plaintext cap and the declared total.
///
/// Returns the accumulated plaintext length, which equals `declared_total`
/// on success. The caller owns cleanup of whatever `w` was writing to.
pub async fn relay_chunks<R, W>(
    r: &mut R,
    w: &mut W,
    num_chunks: u32,
    declared_total: u64,
    max_plain: u64,
) -> Result<u64, WireError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut plain_count: u64 = 0;
    for _ in 0..num_chunks {
        let frame = read_chunk_frame(r).await?;
        plain_count += frame.plain_len();
        if plain_count > max_plain {
            return Err(WireError::BlobTooLarge {
                got: plain_count,
                max: max_plain,
            });
        }
        write_chunk_frame(w, &frame).await?;
    }
    if plain_count != declared_total {
        return Err(WireError::LengthMismatch {
            declared: declared_total,
            streamed: plain_count,
        });
    }
    Ok(plain_count)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("unknown message kind: 0x{0:02x}")]
    UnknownKind(u8),

    #[error("unknown status byte: 0x{0:02x}")]
    UnknownStatus(u8),

    #[error("unknown payload format: 0x{0:02x}")]
    UnknownFormat(u8),

    #[error(transparent)]
    BadCode(#[from] CodeError),

    #[error("invalid name")]
    InvalidName,

    #[error("sealed length {0} out of range")]
    BadSealedLen(u64),

    #[error("blob too large: {got} bytes exceeds the {max} byte cap")]
    BlobTooLarge { got: u64, max: u64 },

    #[error("chunk lengths sum to {streamed}, header declared {declared}")]
    LengthMismatch { declared: u64, streamed: u64 },
}
