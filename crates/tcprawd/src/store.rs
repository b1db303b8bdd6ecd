//! Blob store — durable ciphertext storage keyed by rendezvous code.
//!
//! On-disk layout of the data directory:
//!   `.index.json`   code → created-at (unix seconds). Authoritative.
//!   `<code>.blob`   metadata record; holds the full sealed payload in the
//!                   single-blob case.
//!   `<code>.dat`    chunked ciphertext side file: a packed sequence of
//!                   (nonce, u32 sealed-len, sealed) frames.
//!
//! The index rewrite is the commit point of a publish. Anything on disk
//! whose code is absent from the index is an orphan and is reaped on
//! start-up. The whole index is rewritten on every mutation; blob counts
//! stay small enough within one retention window that this is fine.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;

use tcpraw_core::code::{Code, CodeError};
use tcpraw_core::crypto::NONCE_LEN;

use crate::freespace;

const INDEX_FILE: &str = ".index.json";
const METADATA_MAGIC: &[u8; 4] = b"TRB1";

/// How many mints to try before giving up on an unused code and
/// overwriting (last-write-wins).
const MINT_ATTEMPTS: usize = 8;

// ── Records ───────────────────────────────────────────────────────────────────

/// Everything the store persists about one code, sealed payload included
/// for the single-blob form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub name: String,
    pub checksum: [u8; 32],
    pub created_at: u64,
    pub secure: bool,
    pub payload: BlobPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobPayload {
    /// One sealed buffer, embedded in the metadata record.
    Single {
        nonce: [u8; NONCE_LEN],
        sealed: Vec<u8>,
    },
    /// Per-chunk frames live in the `<code>.dat` side file.
    Chunked { total_plain: u64, num_chunks: u32 },
}

impl StoredBlob {
    pub fn chunked(&self) -> bool {
        matches!(self.payload, BlobPayload::Chunked { .. })
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.name.len());
        out.extend_from_slice(METADATA_MAGIC);
        let mut flags = 0u8;
        if self.chunked() {
            flags |= 0x01;
        }
        if self.secure {
            flags |= 0x02;
        }
        out.push(flags);
        out.extend_from_slice(&self.created_at.to_be_bytes());
        out.extend_from_slice(&(self.name.len() as u16).to_be_bytes());
        out.extend_from_slice(self.name.as_bytes());
        out.extend_from_slice(&self.checksum);
        match &self.payload {
            BlobPayload::Single { nonce, sealed } => {
                out.extend_from_slice(nonce);
                out.extend_from_slice(&(sealed.len() as u64).to_be_bytes());
                out.extend_from_slice(sealed);
            }
            BlobPayload::Chunked {
                total_plain,
                num_chunks,
            } => {
                out.extend_from_slice(&total_plain.to_be_bytes());
                out.extend_from_slice(&num_chunks.to_be_bytes());
            }
        }
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let mut r = Reader::new(bytes);
        if r.take(4)? != METADATA_MAGIC {
            return Err(StoreError::Corrupt("bad metadata magic"));
        }
        let flags = r.u8()?;
        let chunked = flags & 0x01 != 0;
        let secure = flags & 0x02 != 0;
        let created_at = r.u64()?;
        let name_len = r.u16()? as usize;
        let name = String::from_utf8(r.take(name_len)?.to_vec())
            .map_err(|_| StoreError::Corrupt("name is not UTF-8"))?;
        let checksum: [u8; 32] = r.take(32)?.try_into().expect("fixed slice length");
        let payload = if chunked {
            BlobPayload::Chunked {
                total_plain: r.u64()?,
                num_chunks: r.u32()?,
            }
        } else {
            let nonce: [u8; NONCE_LEN] = r
                .take(NONCE_LEN)?
                .try_into()
                .expect("fixed slice length");
            let sealed_len = r.u64()? as usize;
            BlobPayload::Single {
                nonce,
                sealed: r.take(sealed_len)?.to_vec(),
            }
        };
        Ok(Self {
            name,
            checksum,
            created_at,
            secure,
            payload,
        })
    }
}

/// A blob ready for publishing; the store stamps `created_at`.
#[derive(Debug)]
pub struct NewBlob {
    pub name: String,
    pub checksum: [u8; 32],
    pub secure: bool,
    pub payload: BlobPayload,
}

// ── The store ─────────────────────────────────────────────────────────────────

pub struct BlobStore {
    data_dir: PathBuf,
    retention: Duration,
    index: RwLock<HashMap<Code, u64>>,
}

impl BlobStore {
    /// Open the store: create the data directory if missing, load the
    /// index, and reap orphans.
    pub fn open(data_dir: &Path, retention: Duration) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(data_dir, std::fs::Permissions::from_mode(0o755));
        }

        let index_path = data_dir.join(INDEX_FILE);
        let mut index: HashMap<Code, u64> = if index_path.exists() {
            let text = std::fs::read_to_string(&index_path)?;
            let raw: BTreeMap<String, u64> =
                serde_json::from_str(&text).map_err(|_| StoreError::Corrupt("index file"))?;
            raw.into_iter()
                .filter_map(|(k, v)| k.parse::<Code>().ok().map(|c| (c, v)))
                .collect()
        } else {
            HashMap::new()
        };

        let (orphans, dropped) = recover(data_dir, &mut index)?;
        if orphans > 0 || dropped > 0 {
            tracing::info!(orphans, dropped, "start-up recovery cleaned the data dir");
            rewrite_index_at(data_dir, &index)?;
        }
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            retention,
            index: RwLock::new(index),
        })
    }

    pub fn data_path(&self, code: &Code) -> PathBuf {
        self.data_dir.join(format!("{code}.dat"))
    }

    fn blob_path(&self, code: &Code) -> PathBuf {
        self.data_dir.join(format!("{code}.blob"))
    }

    fn rewrite_index(&self, index: &HashMap<Code, u64>) -> Result<(), StoreError> {
        rewrite_index_at(&self.data_dir, index)
    }

    fn expired(&self, created_at: u64) -> bool {
        now_secs().saturating_sub(created_at) >= self.retention.as_secs()
    }

    /// Publish a blob under `code`. The chunked data file, if any, must be
    /// complete before this call. Collisions are last-write-wins.
    pub async fn publish(&self, code: Code, blob: NewBlob) -> Result<(), StoreError> {
        let record = StoredBlob {
            name: blob.name,
            checksum: blob.checksum,
            created_at: now_secs(),
            secure: blob.secure,
            payload: blob.payload,
        };

        // Metadata first: success is never reported before this file exists.
        let blob_path = self.blob_path(&code);
        let tmp = self.data_dir.join(format!("{code}.blob.tmp"));
        std::fs::write(&tmp, record.encode())?;
        std::fs::rename(&tmp, &blob_path)?;

        let replaced = {
            let mut index = self.index.write().await;
            let replaced = index.insert(code, record.created_at).is_some();
            if let Err(e) = self.rewrite_index(&index) {
                index.remove(&code);
                let _ = std::fs::remove_file(&blob_path);
                return Err(e);
            }
            replaced
        };

        // A replaced chunked blob's side file is either overwritten (new
        // chunked) or stale (new single) — drop it in the latter case.
        if replaced && !record.chunked() {
            let _ = std::fs::remove_file(self.data_path(&code));
        }
        Ok(())
    }

    /// Look up a code. Stale or unreadable blobs report as absent; stale
    /// entries are evicted on the spot.
    pub async fn lookup(&self, code: &Code) -> Option<StoredBlob> {
        let created = {
            let index = self.index.read().await;
            match index.get(code) {
                Some(&created) => created,
                None => return None,
            }
        };
        if self.expired(created) {
            self.remove(code).await;
            return None;
        }
        match std::fs::read(self.blob_path(code)) {
            Ok(bytes) => match StoredBlob::decode(&bytes) {
                Ok(blob) => Some(blob),
                Err(e) => {
                    tracing::warn!(%code, error = %e, "metadata decode failed");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(%code, error = %e, "metadata read failed");
                None
            }
        }
    }

    /// Remove a blob: index entry, metadata file, data file.
    pub async fn remove(&self, code: &Code) {
        {
            let mut index = self.index.write().await;
            if index.remove(code).is_some() {
                if let Err(e) = self.rewrite_index(&index) {
                    tracing::warn!(%code, error = %e, "index rewrite failed on remove");
                }
            }
        }
        let _ = std::fs::remove_file(self.blob_path(code));
        let _ = std::fs::remove_file(self.data_path(code));
    }

    /// Drop every expired blob. The index is rewritten once; file deletion
    /// is best-effort. Returns how many blobs were evicted.
    pub async fn sweep_expired(&self) -> usize {
        let expired: Vec<Code> = {
            let mut index = self.index.write().await;
            let expired: Vec<Code> = index
                .iter()
                .filter(|(_, &created)| self.expired(created))
                .map(|(code, _)| *code)
                .collect();
            if !expired.is_empty() {
                for code in &expired {
                    index.remove(code);
                }
                if let Err(e) = self.rewrite_index(&index) {
                    tracing::warn!(error = %e, "index rewrite failed during sweep");
                }
            }
            expired
        };
        for code in &expired {
            let _ = std::fs::remove_file(self.blob_path(code));
            let _ = std::fs::remove_file(self.data_path(code));
        }
        expired.len()
    }

    /// Mint a code for this server, preferring one that is not in use.
    pub async fn mint_code(&self, server_id: u8) -> Result<Code, CodeError> {
        let index = self.index.read().await;
        let mut code = Code::mint(server_id)?;
        for _ in 0..MINT_ATTEMPTS {
            if !index.contains_key(&code) {
                break;
            }
            code = Code::mint(server_id)?;
        }
        Ok(code)
    }

    pub async fn contains(&self, code: &Code) -> bool {
        self.index.read().await.contains_key(code)
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Free bytes on the data volume, or `None` when the platform cannot say.
    pub fn free_bytes(&self) -> Option<u64> {
        freespace::free_bytes(&self.data_dir)
    }
}

/// Periodic GC driver. Runs forever; spawn it.
pub async fn sweep_loop(store: Arc<BlobStore>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let evicted = store.sweep_expired().await;
        if evicted > 0 {
            tracing::debug!(evicted, "expired blobs swept");
        }
    }
}

/// Delete files whose code is not indexed, and drop index entries whose
/// metadata file vanished. Returns (files removed, entries dropped).
fn recover(data_dir: &Path, index: &mut HashMap<Code, u64>) -> Result<(usize, usize), StoreError> {
    let mut orphans = 0;
    for entry in std::fs::read_dir(data_dir)? {
        let path = entry?.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        let indexed = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<Code>().ok())
            .is_some_and(|code| index.contains_key(&code));
        let stray = match ext {
            "blob" | "dat" => !indexed,
            "tmp" => true,
            _ => false,
        };
        if stray {
            tracing::debug!(path = %path.display(), "removing orphan");
            std::fs::remove_file(&path)?;
            orphans += 1;
        }
    }

    let before = index.len();
    index.retain(|code, _| data_dir.join(format!("{code}.blob")).exists());
    Ok((orphans, before - index.len()))
}

fn rewrite_index_at(data_dir: &Path, index: &HashMap<Code, u64>) -> Result<(), StoreError> {
    let raw: BTreeMap<String, u64> = index
        .iter()
        .map(|(code, created)| (code.to_string(), *created))
        .collect();
    let tmp = data_dir.join(format!("{INDEX_FILE}.tmp"));
    std::fs::write(&tmp, serde_json::to_vec(&raw).expect("index serializes"))?;
    std::fs::rename(&tmp, data_dir.join(INDEX_FILE))?;
    Ok(())
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ── Metadata reader ───────────────────────────────────────────────────────────

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], StoreError> {
        if self.buf.len() < n {
            return Err(StoreError::Corrupt("metadata truncated"));
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, StoreError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, StoreError> {
        Ok(u16::from_be_bytes(
            self.take(2)?.try_into().expect("fixed slice length"),
        ))
    }

    fn u32(&mut self) -> Result<u32, StoreError> {
        Ok(u32::from_be_bytes(
            self.take(4)?.try_into().expect("fixed slice length"),
        ))
    }

    fn u64(&mut self) -> Result<u64, StoreError> {
        Ok(u64::from_be_bytes(
            self.take(8)?.try_into().expect("fixed slice length"),
        ))
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("corrupt on-disk state: {0}")]
    Corrupt(&'static str),
}
