//! HTTP download surface — fetch a regular blob from a browser.
//!
//! `GET /` serves a small code-entry form; `GET /get?code=CCCCCC` streams
//! the decrypted plaintext as an attachment. Secure blobs cannot be
//! decrypted here and are redirected back to the form. Every failure before
//! the response starts becomes a `302 /?err=...`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::header;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use serde::Deserialize;
use tokio::io::BufReader;

use tcpraw_core::crypto::{self, derive_code_key, BlobKey};
use tcpraw_core::wire;
use tcpraw_core::Code;

use crate::dispatch::ServerCtx;
use crate::store::BlobPayload;

const FORM_PAGE: &str = r#"<!doctype html>
<html>
<head><title>tcpraw</title></head>
<body>
  <h1>tcpraw</h1>
  <form action="/get" method="get">
    <label>code: <input name="code" maxlength="6" pattern="[0-9]{6}"></label>
    <button type="submit">download</button>
  </form>
</body>
</html>
"#;

pub fn router(ctx: Arc<ServerCtx>) -> Router {
    Router::new()
        .route("/", get(form))
        .route("/get", get(get_blob))
        .with_state(ctx)
}

/// Serve the download surface on an already-bound listener.
pub async fn serve(listener: tokio::net::TcpListener, ctx: Arc<ServerCtx>) -> Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "http surface listening");
    axum::serve(
        listener,
        router(ctx).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn form() -> Html<&'static str> {
    Html(FORM_PAGE)
}

#[derive(Deserialize)]
struct GetParams {
    code: String,
}

async fn get_blob(
    State(ctx): State<Arc<ServerCtx>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<GetParams>,
) -> Response {
    if !ctx.limiter.allow(addr.ip()).await {
        return redirect_err("rate-limited");
    }

    let Ok(code) = params.code.parse::<Code>() else {
        return redirect_err("invalid-code");
    };

    let Some(blob) = ctx.store.lookup(&code).await else {
        return redirect_err("unknown-or-expired");
    };

    if blob.secure {
        return redirect_err("use-the-client-with-your-key");
    }

    let key = derive_code_key(&code);
    match blob.payload {
        BlobPayload::Single { nonce, sealed } => match crypto::open(&key, &nonce, &sealed) {
            Ok(plain) => attachment(&blob.name, Body::from(plain)),
            Err(e) => {
                tracing::warn!(%code, error = %e, "http decrypt failed");
                redirect_err("decrypt-failed")
            }
        },
        BlobPayload::Chunked { num_chunks, .. } => {
            let file = match tokio::fs::File::open(ctx.store.data_path(&code)).await {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(%code, error = %e, "data file unreadable");
                    return redirect_err("unknown-or-expired");
                }
            };
            let reader = BufReader::new(file);
            attachment(&blob.name, Body::from_stream(decrypt_stream(reader, key, num_chunks)))
        }
    }
}

/// Decrypt the data file frame by frame. Each item is one plaintext chunk;
/// an open failure mid-file aborts the stream.
fn decrypt_stream<R>(
    reader: R,
    key: BlobKey,
    num_chunks: u32,
) -> impl futures::Stream<Item = std::io::Result<Bytes>> + Send + 'static
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    futures::stream::try_unfold((reader, key, num_chunks), |(mut rd, key, left)| async move {
        if left == 0 {
            return Ok(None);
        }
        let frame = wire::read_chunk_frame(&mut rd)
            .await
            .map_err(std::io::Error::other)?;
        let plain = crypto::open(&key, &frame.nonce, &frame.sealed)
            .map_err(std::io::Error::other)?;
        Ok(Some((Bytes::from(plain), (rd, key, left - 1))))
    })
}

fn attachment(name: &str, body: Body) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{name}\""),
            ),
        ],
        body,
    )
        .into_response()
}

fn redirect_err(reason: &str) -> Response {
    Redirect::to(&format!("/?err={reason}")).into_response()
}
