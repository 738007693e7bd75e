//! # arith-orchestrator
//!
//! Evaluates newline-separated arithmetic expressions sent over TCP, one
//! isolated unit of work per expression, streaming results back to the client.
//!
//! ## Architecture
//!
//! ```text
//! client ──TCP──► server ──lines──► BatchScheduler ──► unit 1 ──┐
//!                                      │   (≤ max_workers)  unit 2 ──┤ completion order
//!                                      │                    unit N ──┘
//!                                      ▼
//!                                  ResultSink (flushed per outcome) ──► payload ──► client
//! ```
//!
//! - [`evaluator`]: tokenizer, shunting-yard RPN conversion, stack evaluation
//! - [`scheduler`]: bounded worker scheduler with per-expression fault isolation
//! - [`sink`]: durable, append-only result destinations
//! - [`transport`]: TCP server and client around the scheduler
//! - [`archive`]: client input loading from text files or archives

// ── Lint policy ───────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use std::fmt;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod archive;
pub mod config;
pub mod evaluator;
pub mod metrics;
pub mod paths;
pub mod scheduler;
pub mod sink;
pub mod transport;
pub mod worker;

// Re-exports for convenience
pub use evaluator::{evaluate, EvalError};
pub use scheduler::{BatchReport, BatchScheduler, SchedulerError};
pub use sink::{FileSink, MemorySink, ResultSink};
pub use worker::{ArithmeticWorker, ExpressionWorker};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"`: structured JSON output for log aggregators
/// - anything else (including unset): human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=debug`).
///
/// # Errors
///
/// Returns [`OrchestratorError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
pub fn init_tracing() -> Result<(), OrchestratorError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| OrchestratorError::Other(format!("tracing init failed: {e}")))
}

/// Top-level errors.
///
/// Every error surface in the crate is mapped to a variant here.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// A batch could not be completed.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// Configuration could not be loaded or failed validation.
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    /// The TCP server or client failed.
    #[error(transparent)]
    Transport(#[from] transport::TransportError),

    /// A value object was constructed with invalid data.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}

/// One arithmetic input line and its 1-based position in the batch.
///
/// Immutable once created; the constructor rejects blank text and a zero
/// line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    line_number: usize,
    text: String,
}

impl Expression {
    /// Create a new expression.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidInput`] if `text` is empty or
    /// whitespace-only, or if `line_number` is 0.
    ///
    /// # Example
    ///
    /// ```rust
    /// use arith_orchestrator::Expression;
    /// assert!(Expression::new(1, "2 + 3").is_ok());
    /// assert!(Expression::new(1, "   ").is_err());
    /// assert!(Expression::new(0, "2 + 3").is_err());
    /// ```
    pub fn new(line_number: usize, text: impl Into<String>) -> Result<Self, OrchestratorError> {
        let text = text.into();
        if line_number == 0 {
            return Err(OrchestratorError::InvalidInput(
                "line_number must be >= 1".to_string(),
            ));
        }
        if text.trim().is_empty() {
            return Err(OrchestratorError::InvalidInput(
                "expression cannot be empty".to_string(),
            ));
        }
        Ok(Self { line_number, text })
    }

    /// 1-based position of this expression within its batch.
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// The raw expression text.
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Success or failure of evaluating one expression.
///
/// Produced exactly once per expression by exactly one unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The expression evaluated to `value`.
    Success {
        /// The evaluated expression.
        expression: Expression,
        /// Its numeric result.
        value: f64,
    },
    /// The expression could not be evaluated.
    Failure {
        /// The expression that failed.
        expression: Expression,
        /// Human-readable reason.
        error: String,
    },
}

impl Outcome {
    /// The expression this outcome belongs to.
    pub fn expression(&self) -> &Expression {
        match self {
            Self::Success { expression, .. } | Self::Failure { expression, .. } => expression,
        }
    }

    /// Shorthand for `self.expression().line_number()`.
    pub fn line_number(&self) -> usize {
        self.expression().line_number()
    }

    /// `true` for [`Outcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Render the newline-terminated output record.
    ///
    /// - success: `"{expression} = {value}\n"`
    /// - failure: `"{expression} -> ERROR: {error}\n"`
    ///
    /// # Example
    ///
    /// ```rust
    /// use arith_orchestrator::{Expression, Outcome};
    /// # fn main() -> Result<(), arith_orchestrator::OrchestratorError> {
    /// let outcome = Outcome::Success { expression: Expression::new(1, "2 + 3")?, value: 5.0 };
    /// assert_eq!(outcome.to_record(), "2 + 3 = 5.0\n");
    /// # Ok(()) }
    /// ```
    pub fn to_record(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { expression, value } => {
                write!(f, "{} = {}", expression.text(), format_value(*value))
            }
            Self::Failure { expression, error } => {
                write!(f, "{} -> ERROR: {}", expression.text(), error)
            }
        }
    }
}

/// Format a float the way results are written to the sink.
///
/// Integral values keep a trailing `.0` (`5.0`, not `5`); non-finite values
/// are written `inf`, `-inf` and `nan`. Very large or very small magnitudes
/// use a signed exponent of at least two digits (`1e+16`, `1e-05`).
///
/// # Example
///
/// ```rust
/// use arith_orchestrator::format_value;
/// assert_eq!(format_value(20.0), "20.0");
/// assert_eq!(format_value(2.5), "2.5");
/// assert_eq!(format_value(1e16), "1e+16");
/// assert_eq!(format_value(f64::INFINITY), "inf");
/// ```
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value.is_sign_positive() { "inf" } else { "-inf" }.to_string();
    }

    // Debug keeps the fractional part for integral floats and switches to
    // scientific notation below 1e-4 and from 1e16 upwards.
    let shortest = format!("{value:?}");
    let Some((mantissa, exponent)) = shortest.split_once('e') else {
        return shortest;
    };
    match exponent.parse::<i32>() {
        Ok(exp) => {
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.unsigned_abs())
        }
        Err(_) => shortest,
    }
}
