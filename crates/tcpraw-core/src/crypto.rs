//! Symmetric crypto for blob payloads.
//!
//! Every chunk is sealed independently with AES-256-GCM under a fresh
//! 12-byte random nonce; the 16-byte tag is appended to the ciphertext.
//! Two key sources exist:
//!
//!   1. Code-derived: `SHA-256(code || "tcpraw-v1")`. The salt is fixed and
//!      public — the six-digit code is the only secret, so this mode leans
//!      on the server's rate limiter and short retention window.
//!   2. External: a caller-held random 256-bit key the server never sees.
//!
//! The adapter seals and opens one chunk at a time; it never concatenates
//! or splits across chunk boundaries.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::Aes256Gcm;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::code::Code;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Domain-separation salt for code-derived keys. Public by design.
const CODE_KEY_SALT: &[u8] = b"tcpraw-v1";

/// A 256-bit blob key. Wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct BlobKey([u8; KEY_LEN]);

impl BlobKey {
    /// Generate a random key from the OS RNG (secure mode).
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut key = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Parse a 64-character hex string as printed by the client.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s.trim()).map_err(|_| CryptoError::BadKey)?;
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| CryptoError::BadKey)?;
        Ok(Self(key))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

/// Derive the blob key for a code: `SHA-256(code || "tcpraw-v1")`.
pub fn derive_code_key(code: &Code) -> BlobKey {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hasher.update(CODE_KEY_SALT);
    BlobKey(hasher.finalize().into())
}

/// Seal one plaintext chunk. Returns the fresh nonce and
/// `ciphertext || tag` (`plaintext.len() + 16` bytes).
pub fn seal(key: &BlobKey, plaintext: &[u8]) -> Result<([u8; NONCE_LEN], Vec<u8>), CryptoError> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let sealed = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::SealFailed)?;
    Ok((nonce.into(), sealed))
}

/// Open one sealed chunk. Fails if the key is wrong or the bytes were
/// tampered with.
pub fn open(key: &BlobKey, nonce: &[u8; NONCE_LEN], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < TAG_LEN {
        return Err(CryptoError::OpenFailed);
    }
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    cipher
        .decrypt(nonce.into(), sealed)
        .map_err(|_| CryptoError::OpenFailed)
}

// ── Checksums ─────────────────────────────────────────────────────────────────

/// Incremental SHA-256 for plaintexts that arrive in pieces.
pub struct Checksum(Sha256);

impl Checksum {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> [u8; 32] {
        self.0.finalize().into()
    }
}

impl Default for Checksum {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot SHA-256.
pub fn checksum(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    SealFailed,

    #[error("decryption failed — wrong code/key or corrupted data")]
    OpenFailed,

    #[error("key must be 64 hex characters")]
    BadKey,
}
