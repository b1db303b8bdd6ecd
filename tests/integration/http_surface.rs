//! Browser-path downloads: GET /get?code=CCCCCC.

use std::time::Duration;

use tcpraw_cli::transfer;
use tcprawd::http;

use crate::harness::{start_server, write_file, ServerOptions, TestServer};

/// Serve the HTTP surface for `server` on an ephemeral port; returns its
/// base URL.
async fn start_http(server: &TestServer) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(http::serve(listener, server.ctx.clone()));
    url
}

fn no_redirect_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn http_get_streams_decrypted_plaintext() {
    let server = start_server(ServerOptions::default()).await;
    let base = start_http(&server).await;
    let work = tempfile::tempdir().unwrap();

    let payload = vec![0x42u8; 700 * 1024]; // three chunks
    let src = write_file(work.path(), "browser.bin", &payload);
    let outcome = transfer::send(&src, &server.list()).await.unwrap();

    let resp = no_redirect_client()
        .get(format!("{base}/get?code={}", outcome.code))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let disposition = resp
        .headers()
        .get("content-disposition")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(disposition.contains("browser.bin"), "{disposition}");
    assert_eq!(resp.bytes().await.unwrap().as_ref(), payload.as_slice());
}

#[tokio::test(flavor = "multi_thread")]
async fn http_rejects_secure_blobs_with_redirect() {
    let server = start_server(ServerOptions::default()).await;
    let base = start_http(&server).await;
    let work = tempfile::tempdir().unwrap();

    let src = write_file(work.path(), "secret.bin", b"keyed");
    let outcome = transfer::secure_send(&src, &server.list()).await.unwrap();

    let resp = no_redirect_client()
        .get(format!("{base}/get?code={}", outcome.code))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_redirection());
    let location = resp
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(location.contains("err="), "{location}");
    assert!(location.contains("client"), "{location}");
}

#[tokio::test(flavor = "multi_thread")]
async fn http_unknown_code_redirects() {
    let server = start_server(ServerOptions::default()).await;
    let base = start_http(&server).await;

    let resp = no_redirect_client()
        .get(format!("{base}/get?code=300000"))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_redirection());
    let location = resp
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(location.contains("unknown-or-expired"), "{location}");
}

#[tokio::test(flavor = "multi_thread")]
async fn limiter_window_is_shared_between_tcp_and_http() {
    let server = start_server(ServerOptions {
        max_attempts: 2,
        ..Default::default()
    })
    .await;
    let base = start_http(&server).await;
    let out = tempfile::tempdir().unwrap();
    let code: tcpraw_core::Code = "322222".parse().unwrap();

    // Two TCP attempts use up the window...
    for _ in 0..2 {
        let _ = transfer::get(code, None, &server.list(), out.path()).await;
    }

    // ...so the third attempt over HTTP is the one that trips the ban.
    let resp = no_redirect_client()
        .get(format!("{base}/get?code={code}"))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_redirection());
    let location = resp
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(location.contains("rate-limited"), "{location}");
}

#[tokio::test(flavor = "multi_thread")]
async fn form_page_is_served() {
    let server = start_server(ServerOptions::default()).await;
    let base = start_http(&server).await;

    let body = no_redirect_client()
        .get(format!("{base}/"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("<form"));
    assert!(body.contains("code"));
}
