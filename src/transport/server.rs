//! # ArithmeticServer: one batch per TCP connection
//!
//! ## Responsibility
//! Accept a connection, read the payload until the client half-closes, run
//! the non-blank lines as one batch into a [`FileSink`], then send the whole
//! results file back.
//!
//! ## Guarantees
//! - Results are durable on disk before they are sent
//! - A client that disconnects early loses its reply, not the results file
//! - Connections are served one at a time; each one truncates the output file
//!
//! ## NOT Responsible For
//! - Evaluation or concurrency limits (see: `scheduler`)

use crate::config::OrchestratorConfig;
use crate::scheduler::{BatchReport, BatchScheduler};
use crate::sink::FileSink;
use crate::transport::{Endpoint, TransportError};
use crate::{metrics, ArithmeticWorker};
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// Pause after a failed `accept`.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// TCP server that evaluates one batch per connection.
///
/// # Panics
///
/// No methods on this type panic.
pub struct ArithmeticServer {
    listener: TcpListener,
    scheduler: BatchScheduler,
    max_workers: usize,
    output_path: PathBuf,
    read_chunk_bytes: usize,
}

impl ArithmeticServer {
    /// Bind a listening socket at `addr`.
    ///
    /// Pass port 0 to let the OS pick one; see [`ArithmeticServer::local_addr`].
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Bind`] if the address cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        scheduler: BatchScheduler,
        max_workers: usize,
        output_path: impl Into<PathBuf>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let server = Self {
            listener,
            scheduler,
            max_workers,
            output_path: output_path.into(),
            read_chunk_bytes: 4096,
        };
        tracing::info!(addr = %server.local_addr()?, max_workers, "server listening");
        Ok(server)
    }

    /// Bind at the configured endpoint with an [`ArithmeticWorker`] scheduler.
    ///
    /// # Errors
    ///
    /// - [`TransportError::InvalidEndpoint`] if host or port is unusable
    /// - [`TransportError::Bind`] if the address cannot be bound
    pub async fn from_config(
        config: &OrchestratorConfig,
        output_path: impl Into<PathBuf>,
    ) -> Result<Self, TransportError> {
        let scheduler = BatchScheduler::new(Arc::new(ArithmeticWorker::new()))
            .with_unit_timeout(config.scheduler.unit_timeout());
        let endpoint = Endpoint::from_config(&config.server)?;
        let server = Self::bind(
            endpoint.socket_addr(),
            scheduler,
            config.scheduler.max_workers(),
            output_path,
        )
        .await?;
        Ok(server.with_read_chunk_bytes(config.server.read_chunk_bytes))
    }

    /// Override the socket read size (default 4096 bytes, minimum 1).
    pub fn with_read_chunk_bytes(mut self, bytes: usize) -> Self {
        self.read_chunk_bytes = bytes.max(1);
        self
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Where results are written.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Accept and serve connections until `shutdown` becomes `true` or its
    /// sender is dropped. Returns the number of connections served.
    ///
    /// A failed `accept` or a failing connection is logged and does not stop
    /// the server.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> usize {
        let mut served = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = self.listener.accept() => {
                    let Some((stream, peer)) = accepted_connection(accepted) else {
                        // A persistent EMFILE would otherwise spin.
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    };
                    served += 1;
                    match self.serve_connection(stream).await {
                        Ok(report) => tracing::info!(
                            peer = %peer,
                            total = report.total,
                            failed = report.failed,
                            "connection served"
                        ),
                        Err(e) => tracing::error!(peer = %peer, error = %e, "connection failed"),
                    }
                }
            }
        }
        tracing::info!(served, "server stopped");
        served
    }

    /// Accept exactly one connection and serve it.
    ///
    /// # Errors
    ///
    /// See [`ArithmeticServer::serve_connection`].
    pub async fn serve_once(&self) -> Result<BatchReport, TransportError> {
        let (stream, peer) = self.listener.accept().await?;
        tracing::info!(peer = %peer, "client connected");
        self.serve_connection(stream).await
    }

    /// Read one request from `stream`, evaluate it, and send the results back.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Io`] if the request cannot be read or the output file created
    /// - [`TransportError::InvalidPayload`] if the request is not UTF-8
    /// - [`TransportError::Scheduler`] if the batch fails
    pub async fn serve_connection(
        &self,
        mut stream: TcpStream,
    ) -> Result<BatchReport, TransportError> {
        let payload = read_to_end(&mut stream, self.read_chunk_bytes).await?;
        let text = String::from_utf8(payload)
            .map_err(|e| TransportError::InvalidPayload(e.to_string()))?;
        let lines = request_lines(&text);
        tracing::info!(lines = lines.len(), "request received");

        let mut sink = FileSink::create(&self.output_path).await?;
        let report = self
            .scheduler
            .process(&lines, self.max_workers, &mut sink)
            .await?;

        if let Err(e) = send_final_payload(&mut stream, &sink).await {
            tracing::error!(error = %e, "client disconnected before receiving results");
        } else {
            tracing::info!(records = sink.records(), "results sent to client");
        }
        tracing::debug!(metrics = %metrics::gather_metrics(), "metrics snapshot");
        Ok(report)
    }
}

/// Unwrap an `accept` result, logging transient failures (`EMFILE`,
/// `ECONNABORTED`, ...) so the accept loop can continue.
fn accepted_connection(
    accepted: io::Result<(TcpStream, SocketAddr)>,
) -> Option<(TcpStream, SocketAddr)> {
    match accepted {
        Ok(conn) => Some(conn),
        Err(e) => {
            tracing::warn!(error = %e, kind = ?e.kind(), "accept failed");
            None
        }
    }
}

/// Read until the peer half-closes.
async fn read_to_end(stream: &mut TcpStream, chunk_bytes: usize) -> io::Result<Vec<u8>> {
    let mut payload = Vec::new();
    let mut chunk = vec![0u8; chunk_bytes];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(payload);
        }
        payload.extend_from_slice(&chunk[..n]);
    }
}

/// Split a request into trimmed, non-blank lines.
pub fn request_lines(payload: &str) -> Vec<&str> {
    payload
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

/// Send everything the sink has written, then close the write half.
async fn send_final_payload(stream: &mut TcpStream, sink: &FileSink) -> io::Result<()> {
    let contents = sink.contents().await?;
    stream.write_all(&contents).await?;
    stream.flush().await?;
    stream.shutdown().await
}
