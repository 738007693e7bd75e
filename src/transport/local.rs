//! # Local run: server and client in one process
//!
//! ## Responsibility
//! Evaluate one input file end to end: bind a server, send the file with a
//! client, wait for the batch to finish, then remove the server's copy.
//!
//! ## Guarantees
//! - The server's results file and the client's output file are never the
//!   same path; the client's output is the only file left behind on success
//! - On failure the server's results file is kept, with every record reaped
//!   before the failure
//!
//! ## NOT Responsible For
//! - Long-running serving (see: `ArithmeticServer::run`)

use crate::config::OrchestratorConfig;
use crate::paths::server_results_path;
use crate::scheduler::BatchReport;
use crate::transport::{ArithmeticClient, ArithmeticServer, Endpoint, TransportError};
use std::io;
use std::path::Path;

/// Outcome of a local run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRun {
    /// The server's batch summary.
    pub report: BatchReport,
    /// Reply bytes the client wrote to the output file.
    pub bytes: u64,
}

/// Serve `input` through a server bound at the configured endpoint and write
/// the results to `output`.
///
/// # Errors
///
/// - [`TransportError::InvalidEndpoint`] / [`TransportError::Bind`] if the server cannot start
/// - any client or batch error (see [`run_with_server`])
pub async fn run_local(
    config: &OrchestratorConfig,
    input: &Path,
    output: &Path,
) -> Result<LocalRun, TransportError> {
    let server = ArithmeticServer::from_config(config, server_results_path(output)).await?;
    run_with_server(server, config.server.read_chunk_bytes, input, output).await
}

/// Send `input` to an already-bound `server` and write the reply to `output`.
///
/// The server serves exactly one connection.
///
/// # Errors
///
/// - [`TransportError::OutputConflict`] if the server writes to `output` itself
/// - [`TransportError::Input`] / [`TransportError::Connect`] / [`TransportError::Io`] from the client
/// - [`TransportError::Scheduler`] / [`TransportError::InvalidPayload`] from the server
pub async fn run_with_server(
    server: ArithmeticServer,
    read_chunk_bytes: usize,
    input: &Path,
    output: &Path,
) -> Result<LocalRun, TransportError> {
    if server.output_path() == output {
        return Err(TransportError::OutputConflict {
            path: output.to_path_buf(),
        });
    }
    let server_results = server.output_path().to_path_buf();
    let endpoint = Endpoint::from_socket_addr(server.local_addr()?);
    let server_task = tokio::spawn(async move { server.serve_once().await });

    let client = ArithmeticClient::new(endpoint).with_read_chunk_bytes(read_chunk_bytes);
    let bytes = match client.send_file(input, output).await {
        Ok(bytes) => bytes,
        Err(e) => {
            // The server may still be waiting for a connection.
            server_task.abort();
            return Err(e);
        }
    };

    let report = server_task
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))??;

    if let Err(e) = tokio::fs::remove_file(&server_results).await {
        tracing::warn!(
            path = %server_results.display(),
            error = %e,
            "could not remove server results file"
        );
    }
    tracing::info!(
        total = report.total,
        failed = report.failed,
        bytes,
        output = %output.display(),
        "local run complete"
    );
    Ok(LocalRun { report, bytes })
}
