//! Rate limiting, probing, selection, and protocol rejection.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use tcpraw_cli::serverlist::{self, ServerEntry};
use tcpraw_cli::{probe, transfer};
use tcpraw_core::wire::Status;

use crate::harness::{start_default_server, start_server, write_file, ServerOptions};

#[tokio::test(flavor = "multi_thread")]
async fn fourth_download_attempt_is_banned() {
    let server = start_server(ServerOptions {
        max_attempts: 3,
        ..Default::default()
    })
    .await;
    let out = tempfile::tempdir().unwrap();
    let code: tcpraw_core::Code = "311111".parse().unwrap();

    for _ in 0..3 {
        let err = transfer::get(code, None, &server.list(), out.path())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "code unknown or expired");
    }

    // Attempt four trips the ban; further attempts stay denied.
    for _ in 0..2 {
        let err = transfer::get(code, None, &server.list(), out.path())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "server error");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn uploads_are_not_rate_limited() {
    let server = start_server(ServerOptions {
        max_attempts: 1,
        ..Default::default()
    })
    .await;
    let work = tempfile::tempdir().unwrap();

    for i in 0..5 {
        let src = write_file(work.path(), &format!("f{i}.txt"), b"payload");
        assert!(transfer::send(&src, &server.list()).await.is_ok());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn probe_measures_every_live_server() {
    let a = start_server(ServerOptions {
        server_id: 1,
        ..Default::default()
    })
    .await;
    let b = start_server(ServerOptions {
        server_id: 2,
        ..Default::default()
    })
    .await;

    let mut list = serverlist::single(1, &a.addr);
    list[2] = Some(ServerEntry {
        id: 2,
        addr: b.addr.clone(),
    });

    let results = probe::probe_all(&list, 1024).await;
    assert_eq!(results.len(), 2);
    for r in &results {
        assert!(r.bytes_per_sec > 0.0);
    }
    assert!(probe::select_best(results).is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn dead_servers_mean_no_server_available() {
    // Bind then drop, so the dial is refused.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let work = tempfile::tempdir().unwrap();
    let src = write_file(work.path(), "stranded.txt", b"no takers");

    let list = serverlist::single(5, &addr);
    let err = transfer::send(&src, &list).await.unwrap_err();
    assert!(
        err.to_string().contains("no server available"),
        "unexpected error: {err}"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn code_first_digit_matches_chosen_server() {
    let server = start_server(ServerOptions {
        server_id: 7,
        ..Default::default()
    })
    .await;
    let work = tempfile::tempdir().unwrap();

    let src = write_file(work.path(), "routed.txt", b"digit check");
    let outcome = transfer::send(&src, &server.list()).await.unwrap();
    assert_eq!(outcome.code.server_id(), 7);
    assert_eq!(outcome.code.to_string().len(), 6);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_message_kind_gets_error_status() {
    let server = start_default_server().await;

    let mut stream = TcpStream::connect(&server.addr).await.unwrap();
    stream.write_u8(b'X').await.unwrap();
    stream.flush().await.unwrap();

    let status = Status::try_from(stream.read_u8().await.unwrap()).unwrap();
    assert_eq!(status, Status::Error);

    // Connection is closed after the status byte.
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}
