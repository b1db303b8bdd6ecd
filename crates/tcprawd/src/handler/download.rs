//! Download handler — relay stored ciphertext back to the socket.

use std::net::IpAddr;

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use tcpraw_core::wire::{self, PayloadFormat, SingleBlob, Status, UploadHeader};

use crate::dispatch::ServerCtx;
use crate::store::BlobPayload;

use super::respond;

/// `D`, code. Replies with a status byte; on OK a format byte and the
/// payload follow. Missing, stale, and unreadable blobs are all `NotFound`.
pub async fn download<R, W>(rd: &mut R, wr: &mut W, ctx: &ServerCtx, peer: IpAddr) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let code = match wire::read_code(rd).await {
        Ok(code) => code,
        Err(e) => {
            tracing::warn!(error = %e, "bad download request");
            return respond(wr, Status::Error).await;
        }
    };

    if !ctx.limiter.allow(peer).await {
        return respond(wr, Status::Error).await;
    }

    let Some(blob) = ctx.store.lookup(&code).await else {
        tracing::debug!(%code, "download of unknown or expired code");
        return respond(wr, Status::NotFound).await;
    };

    let format = PayloadFormat::from_parts(blob.secure, blob.chunked());
    match blob.payload {
        BlobPayload::Single { nonce, sealed } => {
            wr.write_u8(Status::Ok.into()).await?;
            wr.write_u8(format as u8).await?;
            SingleBlob {
                name: blob.name,
                checksum: blob.checksum,
                nonce,
                sealed,
            }
            .write_to(wr)
            .await?;
        }
        BlobPayload::Chunked {
            total_plain,
            num_chunks,
        } => {
            // Open before committing to OK so an unreadable side file still
            // reports as not found.
            let file = match tokio::fs::File::open(ctx.store.data_path(&code)).await {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(%code, error = %e, "data file unreadable");
                    return respond(wr, Status::NotFound).await;
                }
            };
            wr.write_u8(Status::Ok.into()).await?;
            wr.write_u8(format as u8).await?;
            UploadHeader {
                name: blob.name,
                total_plain,
                num_chunks,
                checksum: blob.checksum,
            }
            .write_to(wr)
            .await?;

            let mut file = BufReader::new(file);
            wire::relay_chunks(&mut file, wr, num_chunks, total_plain, total_plain).await?;
        }
    }
    wr.flush().await?;
    tracing::debug!(%code, "blob served");
    Ok(())
}
