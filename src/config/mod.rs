//! # Configuration
//!
//! ## Responsibility
//! Describe the server and scheduler settings, loaded from TOML:
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 9000
//!
//! [scheduler]
//! max_workers = 8
//! unit_timeout_ms = 2000
//! ```
//!
//! ## Guarantees
//! - Every field has a documented default, so an empty file is valid
//! - A config returned by [`loader`] has passed [`validation`]
//!
//! ## NOT Responsible For
//! - Running the scheduler (see: `scheduler`)
//! - Binding sockets (see: `transport`)

pub mod loader;
pub mod validation;

pub use loader::{load_from_file, load_from_str};
pub use validation::{validate, ConfigError};

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ── Default value functions ──────────────────────────────────────────────

/// Default listen / connect host.
fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// Default TCP port: 9000.
fn default_port() -> u32 {
    9000
}

/// Default socket read size: 4096 bytes.
fn default_read_chunk_bytes() -> usize {
    4096
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration.
///
/// # Panics
///
/// This type never panics during construction or access.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorConfig {
    /// TCP endpoint settings shared by server and client.
    #[serde(default)]
    pub server: ServerConfig,
    /// Batch scheduling settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// TCP endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Host or IP address to bind / connect to.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port, 1..=65535. Wider type so out-of-range values reach validation.
    #[serde(default = "default_port")]
    pub port: u32,
    /// Bytes read from the socket per call.
    #[serde(default = "default_read_chunk_bytes")]
    pub read_chunk_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            read_chunk_bytes: default_read_chunk_bytes(),
        }
    }
}

impl ServerConfig {
    /// `host:port` string suitable for binding or connecting.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Batch scheduling settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Upper bound on concurrent units. Absent means host parallelism.
    #[serde(default)]
    pub max_workers: Option<usize>,
    /// Per-unit timeout in milliseconds. Absent means units may run forever.
    #[serde(default)]
    pub unit_timeout_ms: Option<u64>,
}

impl SchedulerConfig {
    /// Concurrency cap to pass to the scheduler.
    pub fn max_workers(&self) -> usize {
        self.max_workers
            .unwrap_or_else(crate::scheduler::host_parallelism)
    }

    /// Per-unit timeout as a [`Duration`].
    pub fn unit_timeout(&self) -> Option<Duration> {
        self.unit_timeout_ms.map(Duration::from_millis)
    }
}
