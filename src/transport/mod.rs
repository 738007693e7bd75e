//! # Transport: TCP server and client around the scheduler
//!
//! ## Responsibility
//! Move a newline-separated payload from a client to the server, run it as a
//! single batch, and stream the accumulated results back.
//!
//! ```text
//! client ── payload ──► server ── lines ──► BatchScheduler ──► FileSink
//!        ◄── results ──        ◄──────── final payload ─────────┘
//! ```
//!
//! ## Protocol
//! - The client writes the whole payload, then half-closes its write side
//! - The server replies with the full results file, then half-closes
//!
//! ## NOT Responsible For
//! - Evaluating expressions (see: `scheduler`)
//! - Decoding archive inputs (see: `archive`)

pub mod client;
pub mod local;
pub mod server;

pub use client::ArithmeticClient;
pub use local::{run_local, run_with_server, LocalRun};
pub use server::ArithmeticServer;

use crate::archive::ArchiveError;
use crate::config::ServerConfig;
use crate::scheduler::SchedulerError;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use thiserror::Error;

/// Errors from the TCP server or client.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Host or port is not usable.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Binding the listening socket failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that could not be bound.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Connecting to the server failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Address that refused the connection.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The input file could not be turned into a payload.
    #[error(transparent)]
    Input(#[from] ArchiveError),

    /// The server's results file and the client's output file are the same path.
    #[error("server results and client output both use {}", path.display())]
    OutputConflict {
        /// The shared path.
        path: PathBuf,
    },

    /// The request payload was not valid UTF-8.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The batch could not be completed.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// Socket or file I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A validated `host:port` pair.
///
/// # Example
///
/// ```rust
/// use arith_orchestrator::transport::Endpoint;
/// assert!(Endpoint::new("127.0.0.1", 9000).is_ok());
/// assert!(Endpoint::new("127.0.0.1", 0).is_err());
/// assert!(Endpoint::new("not-an-ip", 9000).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    addr: SocketAddr,
}

impl Endpoint {
    /// Validate `host` as an IP address and `port` as 1..=65535.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidEndpoint`] for an unparsable host or
    /// out-of-range port.
    pub fn new(host: &str, port: u32) -> Result<Self, TransportError> {
        let ip: IpAddr = host
            .trim()
            .parse()
            .map_err(|_| TransportError::InvalidEndpoint(format!("host {host:?} is not an IP address")))?;
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| TransportError::InvalidEndpoint(format!("port {port} is out of range")))?;
        Ok(Self {
            addr: SocketAddr::new(ip, port),
        })
    }

    /// Build from the `[server]` config section.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::new`].
    pub fn from_config(config: &ServerConfig) -> Result<Self, TransportError> {
        Self::new(&config.host, config.port)
    }

    /// Wrap an already-resolved socket address (e.g. a listener's local address).
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// The socket address.
    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.addr.fmt(f)
    }
}
