//! Per-kind connection handlers.
//!
//! Handlers own their response bytes completely: every path out writes a
//! status (and payload where the protocol calls for one) and flushes.
//! Errors bubbling back to the dispatcher are connection-level only.

mod download;
mod probe;
mod upload;

pub use download::download;
pub use probe::{bench, probe};
pub use upload::{secure_upload, upload};

use anyhow::Result;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use tcpraw_core::wire::Status;

/// Write a bare status byte and flush.
pub async fn respond<W: AsyncWrite + Unpin>(w: &mut W, status: Status) -> Result<()> {
    w.write_u8(status.into()).await?;
    w.flush().await?;
    Ok(())
}
