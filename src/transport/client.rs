//! # ArithmeticClient: send a file, receive results
//!
//! ## Responsibility
//! Load a file of expressions (plain text or the first `.txt` in an archive),
//! send it to the server, and stream the reply into an output file.
//!
//! ## Guarantees
//! - The output file is flushed after every received chunk, so progress
//!   survives an interrupted transfer
//! - Unreadable inputs fail before connecting
//!
//! ## NOT Responsible For
//! - Choosing the output path (see: `paths`)
//! - Archive formats (see: `archive`)

use crate::archive;
use crate::transport::{Endpoint, TransportError};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Client for the arithmetic server.
///
/// # Example
///
/// ```rust,no_run
/// use arith_orchestrator::transport::{ArithmeticClient, Endpoint};
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = ArithmeticClient::new(Endpoint::new("127.0.0.1", 9000)?);
/// client.send_file(Path::new("ops.txt"), Path::new("ops_txt_results.txt")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ArithmeticClient {
    endpoint: Endpoint,
    read_chunk_bytes: usize,
}

impl ArithmeticClient {
    /// Create a client for `endpoint`.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            read_chunk_bytes: 4096,
        }
    }

    /// Override the socket read size (default 4096 bytes, minimum 1).
    pub fn with_read_chunk_bytes(mut self, bytes: usize) -> Self {
        self.read_chunk_bytes = bytes.max(1);
        self
    }

    /// Send the expressions in `input` and write the reply to `output`.
    ///
    /// Returns the number of reply bytes written.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Input`] if `input` is unsupported, unreadable, or an archive without a `.txt` entry
    /// - [`TransportError::Connect`] if the server is unreachable
    /// - [`TransportError::Io`] for file or socket failures
    pub async fn send_file(&self, input: &Path, output: &Path) -> Result<u64, TransportError> {
        let payload = load_payload(input).await?;
        self.send_payload(payload.as_bytes(), output).await
    }

    /// Send a raw payload and write the reply to `output`.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Connect`] if the server is unreachable
    /// - [`TransportError::Io`] for file or socket failures
    pub async fn send_payload(&self, payload: &[u8], output: &Path) -> Result<u64, TransportError> {
        let addr = self.endpoint.socket_addr();
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Connect { addr, source })?;
        tracing::info!(addr = %addr, bytes = payload.len(), "sending payload");

        stream.write_all(payload).await?;
        // No more requests; the server starts evaluating on EOF.
        stream.shutdown().await?;

        let mut out = File::create(output).await?;
        let mut chunk = vec![0u8; self.read_chunk_bytes];
        let mut received: u64 = 0;
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            out.write_all(&chunk[..n]).await?;
            out.flush().await?;
            received += n as u64;
        }
        tracing::info!(bytes = received, output = %output.display(), "results received");
        Ok(received)
    }
}

/// Load the payload off the runtime threads; archive decoding is blocking.
async fn load_payload(input: &Path) -> Result<String, TransportError> {
    let path = input.to_path_buf();
    let text = tokio::task::spawn_blocking(move || archive::load_text(&path))
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))??;
    tracing::debug!(input = %input.display(), bytes = text.len(), "payload loaded");
    Ok(text)
}
