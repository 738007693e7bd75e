//! Expression worker abstraction
//!
//! Defines the trait a scheduler unit calls to evaluate its one expression.
//! [`ArithmeticWorker`] is the production implementation; [`DelayedWorker`]
//! adds latency and is useful for exercising completion ordering.

use crate::evaluator::{self, EvalError};
use async_trait::async_trait;
use std::time::Duration;

/// Trait for expression evaluation backends
///
/// Implementations must be thread-safe (Send + Sync) because every unit
/// runs on its own task and shares the worker through an `Arc`.
/// The trait is object-safe to allow dynamic dispatch via `Arc<dyn ExpressionWorker>`.
#[async_trait]
pub trait ExpressionWorker: Send + Sync {
    /// Evaluate one expression.
    async fn evaluate(&self, expression: &str) -> Result<f64, EvalError>;
}

/// Evaluates expressions with [`evaluator::evaluate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ArithmeticWorker;

impl ArithmeticWorker {
    /// Create a new worker.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExpressionWorker for ArithmeticWorker {
    async fn evaluate(&self, expression: &str) -> Result<f64, EvalError> {
        evaluator::evaluate(expression)
    }
}

/// Caps proportional delays so huge results cannot overflow a `Duration`.
const MAX_SCALE: f64 = 1_000_000.0;

/// Sleeps before evaluating.
///
/// The delay is either fixed or derived from the expression's value
/// (`value × unit`), so a test can decide which unit finishes first.
#[derive(Debug, Clone)]
pub struct DelayedWorker {
    /// Fixed delay added to every evaluation.
    pub delay: Duration,
    /// When set, additionally sleep `result × per_unit` for successful results.
    pub per_unit: Option<Duration>,
}

impl DelayedWorker {
    /// Sleep a fixed `delay_ms` before every evaluation.
    pub fn with_delay(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            per_unit: None,
        }
    }

    /// Sleep `result × per_unit_ms` milliseconds before returning.
    pub fn proportional(per_unit_ms: u64) -> Self {
        Self {
            delay: Duration::ZERO,
            per_unit: Some(Duration::from_millis(per_unit_ms)),
        }
    }
}

#[async_trait]
impl ExpressionWorker for DelayedWorker {
    async fn evaluate(&self, expression: &str) -> Result<f64, EvalError> {
        let result = evaluator::evaluate(expression);
        let mut delay = self.delay;
        if let (Some(unit), Ok(value)) = (self.per_unit, &result) {
            if value.is_finite() && *value > 0.0 {
                delay += unit.mul_f64(value.min(MAX_SCALE));
            }
        }
        tokio::time::sleep(delay).await;
        result
    }
}
