//! Upload handlers — stream ciphertext from the socket straight to disk.

use anyhow::{bail, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};

use tcpraw_core::code::Code;
use tcpraw_core::wire::{self, SecureFormat, SingleBlob, Status, UploadHeader};

use crate::dispatch::ServerCtx;
use crate::store::{BlobPayload, NewBlob};

use super::respond;

/// Regular upload: `U`, code, header, chunk frames. The client picked the
/// code; the key is derived from it, so the payload is always chunked.
pub async fn upload<R, W>(rd: &mut R, wr: &mut W, ctx: &ServerCtx) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match ingest_regular(rd, ctx).await {
        Ok(code) => {
            tracing::info!(%code, "blob stored");
            respond(wr, Status::Ok).await
        }
        Err(e) => {
            tracing::warn!(error = %e, "upload failed");
            respond(wr, Status::Error).await
        }
    }
}

async fn ingest_regular<R: AsyncRead + Unpin>(rd: &mut R, ctx: &ServerCtx) -> Result<Code> {
    let code = wire::read_code(rd).await?;
    let header = UploadHeader::read_from(rd).await?;
    tracing::debug!(
        %code,
        name = %header.name,
        total = header.total_plain,
        chunks = header.num_chunks,
        checksum = hex::encode(&header.checksum[..8]),
        "upload header parsed"
    );
    stream_to_data_file(rd, ctx, &code, &header).await?;
    publish_chunked(ctx, code, header, false).await?;
    Ok(code)
}

/// Secure upload: `S`, format byte, then either a self-delimited single
/// blob or a chunked stream. The server mints the code and returns it after
/// the OK status.
pub async fn secure_upload<R, W>(rd: &mut R, wr: &mut W, ctx: &ServerCtx) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match ingest_secure(rd, ctx).await {
        Ok(code) => {
            tracing::info!(%code, "secure blob stored");
            wr.write_u8(Status::Ok.into()).await?;
            wire::write_code(wr, &code).await?;
            wr.flush().await?;
            Ok(())
        }
        Err(e) => {
            tracing::warn!(error = %e, "secure upload failed");
            respond(wr, Status::Error).await
        }
    }
}

async fn ingest_secure<R: AsyncRead + Unpin>(rd: &mut R, ctx: &ServerCtx) -> Result<Code> {
    let format = SecureFormat::try_from(rd.read_u8().await?)?;
    let code = ctx.store.mint_code(ctx.server_id).await?;
    match format {
        SecureFormat::Single => {
            let blob = SingleBlob::read_from(rd, ctx.max_blob_bytes).await?;
            ctx.store
                .publish(
                    code,
                    NewBlob {
                        name: blob.name,
                        checksum: blob.checksum,
                        secure: true,
                        payload: BlobPayload::Single {
                            nonce: blob.nonce,
                            sealed: blob.sealed,
                        },
                    },
                )
                .await?;
        }
        SecureFormat::Chunked => {
            let header = UploadHeader::read_from(rd).await?;
            stream_to_data_file(rd, ctx, &code, &header).await?;
            publish_chunked(ctx, code, header, true).await?;
        }
    }
    Ok(code)
}

/// Relay the chunk frames into `<code>.dat`. Any failure — framing, size
/// cap, declared-total mismatch, disk — deletes the partial file.
async fn stream_to_data_file<R: AsyncRead + Unpin>(
    rd: &mut R,
    ctx: &ServerCtx,
    code: &Code,
    header: &UploadHeader,
) -> Result<()> {
    if header.total_plain > ctx.max_blob_bytes {
        bail!(
            "declared size {} exceeds the {} byte cap",
            header.total_plain,
            ctx.max_blob_bytes
        );
    }

    let path = ctx.store.data_path(code);
    let file = tokio::fs::File::create(&path).await?;
    let mut file = BufWriter::new(file);

    let streamed = async {
        wire::relay_chunks(
            rd,
            &mut file,
            header.num_chunks,
            header.total_plain,
            ctx.max_blob_bytes,
        )
        .await?;
        file.flush().await?;
        Ok::<_, anyhow::Error>(())
    }
    .await;

    if let Err(e) = streamed {
        drop(file);
        let _ = tokio::fs::remove_file(&path).await;
        return Err(e);
    }
    Ok(())
}

async fn publish_chunked(
    ctx: &ServerCtx,
    code: Code,
    header: UploadHeader,
    secure: bool,
) -> Result<()> {
    let published = ctx
        .store
        .publish(
            code,
            NewBlob {
                name: header.name,
                checksum: header.checksum,
                secure,
                payload: BlobPayload::Chunked {
                    total_plain: header.total_plain,
                    num_chunks: header.num_chunks,
                },
            },
        )
        .await;
    if let Err(e) = published {
        let _ = tokio::fs::remove_file(ctx.store.data_path(&code)).await;
        return Err(e.into());
    }
    Ok(())
}
