//! Integration tests for the TCP server and client.
//!
//! These tests verify the full request path:
//! - Client sends a text file, server evaluates it as one batch
//! - The client's output file matches the server's results file
//! - The server keeps serving after a connection and stops on shutdown
//! - A local run (server and client in one process) writes a clean results file
//! - Archive inputs are unpacked before sending

use arith_orchestrator::archive::ArchiveError;
use arith_orchestrator::paths::{build_output_path, server_results_path};
use arith_orchestrator::transport::{
    run_with_server, ArithmeticClient, ArithmeticServer, Endpoint, TransportError,
};
use arith_orchestrator::{ArithmeticWorker, BatchScheduler};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

// ── Helper functions ──────────────────────────────────────────────

async fn start_server(output: &Path, max_workers: usize) -> ArithmeticServer {
    let scheduler = BatchScheduler::new(Arc::new(ArithmeticWorker::new()));
    let addr: SocketAddr = "127.0.0.1:0".parse().ok().unwrap();
    ArithmeticServer::bind(addr, scheduler, max_workers, output)
        .await
        .ok()
        .unwrap()
}

fn record_set(text: &str) -> HashSet<String> {
    text.lines().map(String::from).collect()
}

// ── Test: client file → server → client output file ──────────────

#[tokio::test]
async fn test_send_file_round_trip() {
    let dir = tempfile::tempdir().ok().unwrap();
    let input = dir.path().join("operations.txt");
    std::fs::write(&input, "2 + 3\n\n   4 * 5  \n2 +\n3 *\n").ok().unwrap();
    let server_output = dir.path().join("server_results.txt");
    let client_output = build_output_path(&input);

    let server = start_server(&server_output, 4).await;
    let endpoint = Endpoint::from_socket_addr(server.local_addr().ok().unwrap());
    let server_task = tokio::spawn(async move { server.serve_once().await });

    let client = ArithmeticClient::new(endpoint);
    let bytes = client.send_file(&input, &client_output).await.ok().unwrap();
    let report = server_task.await.ok().unwrap().ok().unwrap();

    assert_eq!(report.total, 4);
    assert_eq!(report.failed, 2);

    let received = std::fs::read_to_string(&client_output).ok().unwrap();
    assert_eq!(bytes, received.len() as u64);
    let records = record_set(&received);
    assert!(records.contains("2 + 3 = 5.0"));
    assert!(records.contains("4 * 5 = 20.0"));
    assert_eq!(records.iter().filter(|r| r.contains("-> ERROR:")).count(), 2);

    let on_server = std::fs::read_to_string(&server_output).ok().unwrap();
    assert_eq!(record_set(&on_server), records);
}

// ── Test: empty request gets an empty reply ──────────────────────

#[tokio::test]
async fn test_blank_payload_yields_empty_results() {
    let dir = tempfile::tempdir().ok().unwrap();
    let server = start_server(&dir.path().join("results.txt"), 2).await;
    let endpoint = Endpoint::from_socket_addr(server.local_addr().ok().unwrap());
    let server_task = tokio::spawn(async move { server.serve_once().await });

    let client = ArithmeticClient::new(endpoint);
    let output = dir.path().join("out.txt");
    let bytes = client.send_payload(b"\n  \n", &output).await.ok().unwrap();
    let report = server_task.await.ok().unwrap().ok().unwrap();

    assert_eq!(bytes, 0);
    assert_eq!(report.total, 0);
    assert_eq!(std::fs::read_to_string(&output).ok().unwrap(), "");
}

// ── Test: run() serves several clients then stops ────────────────

#[tokio::test]
async fn test_run_serves_until_shutdown() {
    let dir = tempfile::tempdir().ok().unwrap();
    let server = start_server(&dir.path().join("results.txt"), 2).await;
    let endpoint = Endpoint::from_socket_addr(server.local_addr().ok().unwrap());
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let server_task = tokio::spawn(async move { server.run(shutdown_rx).await });

    let client = ArithmeticClient::new(endpoint).with_read_chunk_bytes(7);
    for (i, expr) in ["1 + 1", "6 / 3 * 2"].iter().enumerate() {
        let output = dir.path().join(format!("out-{i}.txt"));
        client
            .send_payload(format!("{expr}\n").as_bytes(), &output)
            .await
            .ok()
            .unwrap();
        let received = std::fs::read_to_string(&output).ok().unwrap();
        assert!(received.starts_with(expr));
    }

    let _ = shutdown_tx.send(true);
    let served = server_task.await.ok().unwrap();
    assert_eq!(served, 2);
}

// ── Test: local run leaves a clean, complete results file ────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_local_run_output_is_complete_every_time() {
    const LINES: usize = 64;
    let dir = tempfile::tempdir().ok().unwrap();
    let input = dir.path().join("operations.txt");
    let payload: String = (1..=LINES).map(|i| format!("{i} + 1\n")).collect();
    std::fs::write(&input, &payload).ok().unwrap();
    let expected: HashSet<String> = (1..=LINES).map(|i| format!("{i} + 1 = {}.0", i + 1)).collect();

    for round in 0..100 {
        let output = build_output_path(&input);
        let server = start_server(&server_results_path(&output), 8).await;
        let run = run_with_server(server, 4096, &input, &output)
            .await
            .ok()
            .unwrap();

        let bytes = std::fs::read(&output).ok().unwrap();
        assert!(!bytes.contains(&0), "round {round}: NUL bytes in output");
        assert_eq!(run.bytes, bytes.len() as u64, "round {round}");
        let text = String::from_utf8(bytes).ok().unwrap();
        assert_eq!(text.lines().count(), LINES, "round {round}");
        assert_eq!(record_set(&text), expected, "round {round}");
        assert_eq!(run.report.total, LINES);
    }
}

// ── Test: archive inputs are unpacked before sending ─────────────

async fn send_and_collect(input: &Path) -> HashSet<String> {
    let dir = tempfile::tempdir().ok().unwrap();
    let output = dir.path().join("out.txt");
    let server = start_server(&server_results_path(&output), 2).await;
    let run = run_with_server(server, 4096, input, &output)
        .await
        .ok()
        .unwrap();
    assert_eq!(run.report.total, 2);
    record_set(&std::fs::read_to_string(&output).ok().unwrap())
}

fn expected_archive_records() -> HashSet<String> {
    ["2 + 3 = 5.0", "4 * 5 = 20.0"].iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_zip_input_round_trip() {
    let dir = tempfile::tempdir().ok().unwrap();
    let input = dir.path().join("operations.zip");
    let mut zip = zip::ZipWriter::new(std::fs::File::create(&input).ok().unwrap());
    zip.start_file("operations.txt", zip::write::FileOptions::default())
        .ok()
        .unwrap();
    zip.write_all(b"2 + 3\n4 * 5\n").ok().unwrap();
    zip.finish().ok().unwrap();

    assert_eq!(send_and_collect(&input).await, expected_archive_records());
}

#[tokio::test]
async fn test_tar_xz_input_round_trip() {
    let dir = tempfile::tempdir().ok().unwrap();
    let input = dir.path().join("operations.tar.xz");
    let encoder = xz2::write::XzEncoder::new(std::fs::File::create(&input).ok().unwrap(), 6);
    let mut builder = tar::Builder::new(encoder);
    let body = b"2 + 3\n4 * 5\n";
    let mut header = tar::Header::new_gnu();
    header.set_size(body.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    builder
        .append_data(&mut header, "operations.txt", &body[..])
        .ok()
        .unwrap();
    builder.into_inner().ok().unwrap().finish().ok().unwrap();

    assert_eq!(send_and_collect(&input).await, expected_archive_records());
}

#[tokio::test]
async fn test_seven_z_input_round_trip() {
    let dir = tempfile::tempdir().ok().unwrap();
    let src = dir.path().join("src");
    std::fs::create_dir(&src).ok().unwrap();
    std::fs::write(src.join("operations.txt"), "2 + 3\n4 * 5\n").ok().unwrap();
    let input = dir.path().join("operations.7z");
    sevenz_rust::compress_to_path(&src, &input).ok().unwrap();

    assert_eq!(send_and_collect(&input).await, expected_archive_records());
}

#[tokio::test]
async fn test_archive_without_text_fails_before_connecting() {
    let dir = tempfile::tempdir().ok().unwrap();
    let input = dir.path().join("operations.zip");
    let mut zip = zip::ZipWriter::new(std::fs::File::create(&input).ok().unwrap());
    zip.start_file("data.csv", zip::write::FileOptions::default())
        .ok()
        .unwrap();
    zip.write_all(b"1,2\n").ok().unwrap();
    zip.finish().ok().unwrap();

    // Nothing listens on port 9; a connect attempt would fail differently.
    let client = ArithmeticClient::new(Endpoint::new("127.0.0.1", 9).ok().unwrap());
    let result = client
        .send_file(&input, &dir.path().join("out.txt"))
        .await;
    assert!(matches!(
        result,
        Err(TransportError::Input(ArchiveError::NoTextEntry { .. }))
    ));
}
