//! Expiry, GC, restart recovery, and ingest failure cleanup.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

use tcpraw_cli::transfer;
use tcpraw_core::crypto::{derive_code_key, seal};
use tcpraw_core::wire::{self, ChunkFrame, MessageKind, Status, UploadHeader};
use tcpraw_core::Code;
use tcprawd::store::BlobStore;

use crate::harness::{start_default_server, start_server, write_file, ServerOptions};

#[tokio::test(flavor = "multi_thread")]
async fn expired_blob_is_gone_after_sweep() {
    let server = start_server(ServerOptions {
        retention: Duration::from_secs(1),
        ..Default::default()
    })
    .await;
    let work = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    let src = write_file(work.path(), "fleeting.txt", b"soon gone");
    let outcome = transfer::send(&src, &server.list()).await.unwrap();
    let dat = server.ctx.store.data_path(&outcome.code);
    assert!(dat.exists());

    tokio::time::sleep(Duration::from_secs(2)).await;

    let err = transfer::get(outcome.code, None, &server.list(), out.path())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "code unknown or expired");

    // One sweeper tick reclaims the files.
    server.ctx.store.sweep_expired().await;
    assert!(!dat.exists());
    assert!(server.ctx.store.is_empty().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn download_at_exact_retention_boundary_is_not_found() {
    // Zero retention: a blob is exactly "retention old" the moment it lands.
    let server = start_server(ServerOptions {
        retention: Duration::from_secs(0),
        ..Default::default()
    })
    .await;
    let work = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    let src = write_file(work.path(), "boundary.txt", b"x");
    let outcome = transfer::send(&src, &server.list()).await.unwrap();

    let err = transfer::get(outcome.code, None, &server.list(), out.path())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "code unknown or expired");
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_preserves_uploaded_blob() {
    let server = start_default_server().await;
    let work = tempfile::tempdir().unwrap();

    let src = write_file(work.path(), "durable.txt", b"still here");
    let outcome = transfer::send(&src, &server.list()).await.unwrap();
    server.stop();

    // A fresh store over the same directory sees the blob.
    let store = BlobStore::open(server.data_dir.path(), Duration::from_secs(3600)).unwrap();
    let blob = store.lookup(&outcome.code).await.unwrap();
    assert_eq!(blob.name, "durable.txt");
    assert!(store.data_path(&outcome.code).exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn oversized_upload_is_rejected_and_leaves_nothing() {
    let server = start_server(ServerOptions {
        max_blob_bytes: 1000,
        ..Default::default()
    })
    .await;
    let work = tempfile::tempdir().unwrap();

    let src = write_file(work.path(), "too-big.bin", &vec![0u8; 2000]);
    assert!(transfer::send(&src, &server.list()).await.is_err());

    assert!(server.ctx.store.is_empty().await);
    let leftovers = std::fs::read_dir(server.data_dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|x| x == "dat" || x == "blob"))
        .count();
    assert_eq!(leftovers, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn declared_total_mismatch_fails_and_cleans_up() {
    let server = start_default_server().await;

    // Hand-rolled upload: header declares 10 plaintext bytes, the single
    // chunk carries 9.
    let code: Code = "355555".parse().unwrap();
    let key = derive_code_key(&code);
    let (nonce, sealed) = seal(&key, &[0u8; 9]).unwrap();

    let stream = TcpStream::connect(&server.addr).await.unwrap();
    let (mut rd, wr) = stream.into_split();
    let mut wr = BufWriter::new(wr);

    wr.write_u8(MessageKind::Upload.into()).await.unwrap();
    wire::write_code(&mut wr, &code).await.unwrap();
    UploadHeader {
        name: "short.bin".into(),
        total_plain: 10,
        num_chunks: 1,
        checksum: [0; 32],
    }
    .write_to(&mut wr)
    .await
    .unwrap();
    wire::write_chunk_frame(&mut wr, &ChunkFrame { nonce, sealed })
        .await
        .unwrap();
    wr.flush().await.unwrap();

    let status = Status::try_from(rd.read_u8().await.unwrap()).unwrap();
    assert_eq!(status, Status::Error);

    assert!(server.ctx.store.is_empty().await);
    assert!(!server.ctx.store.data_path(&code).exists());
}
