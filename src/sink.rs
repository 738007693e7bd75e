//! # Result sinks
//!
//! ## Responsibility
//! Append outcomes, one record per line, in the order the scheduler reaps them.
//!
//! ## Guarantees
//! - `append` returns only after the record is written and flushed
//! - [`FileSink`] additionally syncs file data, so after N successful appends
//!   exactly N records survive a crash
//!
//! ## NOT Responsible For
//! - Ordering (records arrive in completion order, not input order)
//! - Sending results to a client (see: `transport::server`)

use crate::Outcome;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Append-only destination for outcomes.
///
/// Owned exclusively by the scheduler's control task; units never touch it.
#[async_trait]
pub trait ResultSink: Send {
    /// Write and flush one outcome.
    async fn append(&mut self, outcome: &Outcome) -> io::Result<()>;
}

/// Writes records to a file, syncing after each one.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: File,
    records: usize,
}

impl FileSink {
    /// Create (or truncate) the output file at `path`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the file cannot be created.
    pub async fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).await?;
        Ok(Self {
            path,
            file,
            records: 0,
        })
    }

    /// Path of the output file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records written so far.
    pub fn records(&self) -> usize {
        self.records
    }

    /// Read back everything written so far.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the file cannot be read.
    pub async fn contents(&self) -> io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }
}

#[async_trait]
impl ResultSink for FileSink {
    async fn append(&mut self, outcome: &Outcome) -> io::Result<()> {
        self.file.write_all(outcome.to_record().as_bytes()).await?;
        self.file.flush().await?;
        self.file.sync_data().await?;
        self.records += 1;
        Ok(())
    }
}

/// Keeps outcomes in memory, in arrival order.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    outcomes: Vec<Outcome>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcomes in the order they were appended.
    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    /// All records concatenated, as a file sink would have written them.
    pub fn render(&self) -> String {
        self.outcomes.iter().map(Outcome::to_record).collect()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn append(&mut self, outcome: &Outcome) -> io::Result<()> {
        self.outcomes.push(outcome.clone());
        Ok(())
    }
}
