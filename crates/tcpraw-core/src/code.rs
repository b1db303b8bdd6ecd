//! Rendezvous codes — the six-digit handle a sender shares with a receiver.
//!
//! A code is six ASCII decimal digits. The first digit is the server-id
//! (0–9, an index into the public server list); the remaining five are
//! uniformly random. Codes are not guaranteed unique.

use std::fmt;
use std::str::FromStr;

use rand::Rng;

/// Wire and display width of a code.
pub const CODE_LEN: usize = 6;

/// A validated six-digit rendezvous code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Code([u8; CODE_LEN]);

impl Code {
    /// Mint a fresh code for the given server.
    ///
    /// The first digit is `server_id`; the remaining five digits come from
    /// the thread-local RNG. `server_id` must be 0–9.
    pub fn mint(server_id: u8) -> Result<Self, CodeError> {
        if server_id > 9 {
            return Err(CodeError::ServerIdOutOfRange(server_id));
        }
        let mut rng = rand::thread_rng();
        let mut digits = [0u8; CODE_LEN];
        digits[0] = b'0' + server_id;
        for d in &mut digits[1..] {
            *d = b'0' + rng.gen_range(0..10u8);
        }
        Ok(Self(digits))
    }

    /// Validate raw wire bytes as a code.
    pub fn from_bytes(bytes: [u8; CODE_LEN]) -> Result<Self, CodeError> {
        if bytes.iter().all(u8::is_ascii_digit) {
            Ok(Self(bytes))
        } else {
            Err(CodeError::NotDigits)
        }
    }

    pub fn as_bytes(&self) -> &[u8; CODE_LEN] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        // Invariant: every byte is an ASCII digit.
        std::str::from_utf8(&self.0).unwrap_or("000000")
    }

    /// The server-id encoded in the first digit.
    pub fn server_id(&self) -> u8 {
        self.0[0] - b'0'
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Code({})", self.as_str())
    }
}

impl FromStr for Code {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; CODE_LEN] = s
            .as_bytes()
            .try_into()
            .map_err(|_| CodeError::BadLength(s.len()))?;
        Self::from_bytes(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodeError {
    #[error("code must be exactly {CODE_LEN} characters, got {0}")]
    BadLength(usize),

    #[error("code must be decimal digits only")]
    NotDigits,

    #[error("server id {0} is outside 0–9")]
    ServerIdOutOfRange(u8),
}
