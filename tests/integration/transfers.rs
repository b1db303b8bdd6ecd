//! End-to-end send/get round trips over real sockets.

use tcpraw_cli::transfer;
use tcpraw_core::crypto::{checksum, BlobKey};
use tcprawd::store::BlobPayload;

use crate::harness::{start_default_server, write_file};

#[tokio::test(flavor = "multi_thread")]
async fn regular_round_trip() {
    let server = start_default_server().await;
    let work = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    let src = write_file(work.path(), "greeting.txt", b"hello-world");
    let outcome = transfer::send(&src, &server.list()).await.unwrap();

    assert_eq!(outcome.code.server_id(), 3);
    assert_eq!(outcome.checksum, checksum(b"hello-world"));

    let dst = transfer::get(outcome.code, None, &server.list(), out.path())
        .await
        .unwrap();
    assert_eq!(dst.file_name().unwrap(), "greeting.txt");
    assert_eq!(std::fs::read(&dst).unwrap(), b"hello-world");
}

#[tokio::test(flavor = "multi_thread")]
async fn chunked_round_trip_one_mib() {
    let server = start_default_server().await;
    let work = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    let payload = vec![0x41u8; 1024 * 1024];
    let src = write_file(work.path(), "a.bin", &payload);
    let outcome = transfer::send(&src, &server.list()).await.unwrap();

    // 1 MiB at 256 KiB per chunk.
    let blob = server.ctx.store.lookup(&outcome.code).await.unwrap();
    assert!(!blob.secure);
    match blob.payload {
        BlobPayload::Chunked {
            total_plain,
            num_chunks,
        } => {
            assert_eq!(total_plain, 1_048_576);
            assert_eq!(num_chunks, 4);
        }
        BlobPayload::Single { .. } => panic!("regular uploads are chunked"),
    }

    let dst = transfer::get(outcome.code, None, &server.list(), out.path())
        .await
        .unwrap();
    assert_eq!(std::fs::read(&dst).unwrap(), payload);
}

#[tokio::test(flavor = "multi_thread")]
async fn secure_single_round_trip() {
    let server = start_default_server().await;
    let work = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    let src = write_file(work.path(), "secrets.db", b"very private bytes");
    let outcome = transfer::secure_send(&src, &server.list()).await.unwrap();

    // Server-minted code carries the server id.
    assert_eq!(outcome.code.server_id(), 3);

    let blob = server.ctx.store.lookup(&outcome.code).await.unwrap();
    assert!(blob.secure);
    assert!(!blob.chunked());

    let dst = transfer::get(
        outcome.code,
        Some(outcome.key.clone()),
        &server.list(),
        out.path(),
    )
    .await
    .unwrap();
    assert_eq!(std::fs::read(&dst).unwrap(), b"very private bytes");
}

#[tokio::test(flavor = "multi_thread")]
async fn secure_chunked_round_trip() {
    let server = start_default_server().await;
    let work = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    // Force the chunked wire format with a tiny single-blob limit.
    let payload = vec![0x5au8; 700 * 1024];
    let src = write_file(work.path(), "large.bin", &payload);
    let outcome = transfer::secure_send_with(&src, &server.list(), 1024)
        .await
        .unwrap();

    let blob = server.ctx.store.lookup(&outcome.code).await.unwrap();
    assert!(blob.secure);
    assert!(blob.chunked());

    let dst = transfer::get(
        outcome.code,
        Some(outcome.key.clone()),
        &server.list(),
        out.path(),
    )
    .await
    .unwrap();
    assert_eq!(std::fs::read(&dst).unwrap(), payload);
}

#[tokio::test(flavor = "multi_thread")]
async fn wrong_key_reports_checksum_mismatch() {
    let server = start_default_server().await;
    let work = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    let src = write_file(work.path(), "secrets.db", b"keyed payload");
    let outcome = transfer::secure_send(&src, &server.list()).await.unwrap();

    let err = transfer::get(
        outcome.code,
        Some(BlobKey::generate()),
        &server.list(),
        out.path(),
    )
    .await
    .unwrap_err();
    assert!(
        err.to_string().contains("checksum mismatch"),
        "unexpected error: {err}"
    );
    // Nothing half-written left behind.
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn secure_blob_without_key_asks_for_one() {
    let server = start_default_server().await;
    let work = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    let src = write_file(work.path(), "secrets.db", b"keyed payload");
    let outcome = transfer::secure_send(&src, &server.list()).await.unwrap();

    let err = transfer::get(outcome.code, None, &server.list(), out.path())
        .await
        .unwrap_err();
    assert!(err.downcast_ref::<transfer::KeyRequired>().is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn corrupted_data_file_reports_checksum_mismatch() {
    let server = start_default_server().await;
    let work = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    let src = write_file(work.path(), "fragile.bin", &vec![7u8; 4096]);
    let outcome = transfer::send(&src, &server.list()).await.unwrap();

    // Flip one ciphertext byte well past the frame header.
    let dat = server.ctx.store.data_path(&outcome.code);
    let mut bytes = std::fs::read(&dat).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xff;
    std::fs::write(&dat, bytes).unwrap();

    let err = transfer::get(outcome.code, None, &server.list(), out.path())
        .await
        .unwrap_err();
    assert!(
        err.to_string().contains("checksum mismatch"),
        "unexpected error: {err}"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_code_is_not_found() {
    let server = start_default_server().await;
    let out = tempfile::tempdir().unwrap();

    let code = "399999".parse().unwrap();
    let err = transfer::get(code, None, &server.list(), out.path())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "code unknown or expired");
}
