//! Configuration validation.
//!
//! ## Responsibility
//! Check constraints on a parsed [`OrchestratorConfig`] that the type system
//! cannot express (port range, non-zero sizes).
//!
//! ## Guarantees
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value

use super::OrchestratorConfig;

/// Errors arising from configuration parsing, validation, or I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "server.port").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Validate all constraints on an [`OrchestratorConfig`].
///
/// # Errors
///
/// Returns every violation found, as [`ConfigError::InvalidField`] values.
///
/// # Panics
///
/// This function never panics.
pub fn validate(config: &OrchestratorConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Server ───────────────────────────────────────────────────────
    if config.server.host.trim().is_empty() {
        errors.push(ConfigError::InvalidField {
            field: "server.host".into(),
            value: String::new(),
            reason: "host must not be empty".into(),
        });
    }

    if !(1..=65535).contains(&config.server.port) {
        errors.push(ConfigError::InvalidField {
            field: "server.port".into(),
            value: config.server.port.to_string(),
            reason: "must be between 1 and 65535".into(),
        });
    }

    if config.server.read_chunk_bytes == 0 {
        errors.push(ConfigError::InvalidField {
            field: "server.read_chunk_bytes".into(),
            value: "0".into(),
            reason: "must be at least 1".into(),
        });
    }

    // ── Scheduler ────────────────────────────────────────────────────
    if config.scheduler.max_workers == Some(0) {
        errors.push(ConfigError::InvalidField {
            field: "scheduler.max_workers".into(),
            value: "0".into(),
            reason: "must be at least 1".into(),
        });
    }

    if config.scheduler.unit_timeout_ms == Some(0) {
        errors.push(ConfigError::InvalidField {
            field: "scheduler.unit_timeout_ms".into(),
            value: "0".into(),
            reason: "must be at least 1ms when set".into(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
