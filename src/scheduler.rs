//! # BatchScheduler: bounded, fault-isolated evaluation of one batch
//!
//! ## Responsibility
//! Launch one isolated unit per expression, never more than `capacity` at a
//! time, and hand each outcome to the sink as soon as its unit is reaped.
//!
//! ```text
//! for expr in batch:                      ┌──────────── active set ────────────┐
//!     while active == capacity:           │ unit(line 1)  unit(line 2)  ...    │
//!         reap_one() ──► sink.append()    └────────────────────────────────────┘
//!     launch(expr)
//! while active > 0: reap_one() ──► sink.append()
//! ```
//!
//! ## Guarantees
//! - Bounded: `0 <= active <= min(max_concurrency, N)` at every instant
//! - Exactly once: every expression yields one outcome, reaped once
//!   (`JoinSet::join_next_with_id` hands each finished task out a single time)
//! - Completion order: outcomes reach the sink in the order units finish
//! - Isolated: a failing, panicking or timed-out unit becomes a `Failure`
//!   outcome and never aborts the batch
//! - Durable progress: the sink flushes each record before the next slot is
//!   dispatched or drained
//!
//! ## NOT Responsible For
//! - Parsing or evaluating arithmetic (see: `evaluator`, `worker`)
//! - Reading requests or sending replies (see: `transport`)

use crate::sink::ResultSink;
use crate::worker::ExpressionWorker;
use crate::{metrics, Expression, Outcome};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::{self, JoinError, JoinSet};
use tracing::Instrument;

/// Errors that stop a batch.
///
/// Evaluation failures are never reported here; they become
/// [`Outcome::Failure`] records.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// An input line was rejected before anything was launched.
    #[error("invalid expression on line {line_number}: {reason}")]
    InvalidInput {
        /// 1-based line of the rejected input.
        line_number: usize,
        /// Why it was rejected.
        reason: String,
    },

    /// `max_concurrency` was 0 for a non-empty batch.
    #[error("max_concurrency must be at least 1")]
    ZeroConcurrency,

    /// Writing an outcome to the sink failed; in-flight units were aborted.
    #[error("sink write failed for line {line_number}: {source}")]
    Sink {
        /// Line whose record could not be written.
        line_number: usize,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A finished task was not in the active set.
    #[error("reaped unit {0} is not tracked by the active set")]
    UntrackedUnit(String),
}

/// Summary of a completed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Expressions in the batch.
    pub total: usize,
    /// Outcomes that were `Success`.
    pub succeeded: usize,
    /// Outcomes that were `Failure`.
    pub failed: usize,
    /// Concurrency cap used for this batch: `min(max_concurrency, total)`.
    pub capacity: usize,
    /// Largest active-set size observed.
    pub peak_active: usize,
}

/// Number of units the host can run in parallel (at least 1).
pub fn host_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Scheduler-side record of a running unit.
#[derive(Debug)]
struct PendingUnit {
    expression: Expression,
    launched_at: Instant,
}

/// Units currently running or holding an unreaped outcome.
///
/// Owned by the scheduler's control task only.
struct ActiveSet {
    units: JoinSet<Outcome>,
    pending: HashMap<task::Id, PendingUnit>,
    peak: usize,
}

impl ActiveSet {
    fn new() -> Self {
        Self {
            units: JoinSet::new(),
            pending: HashMap::new(),
            peak: 0,
        }
    }

    fn len(&self) -> usize {
        self.units.len()
    }

    fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    fn launch(
        &mut self,
        worker: Arc<dyn ExpressionWorker>,
        expression: Expression,
        timeout: Option<Duration>,
    ) {
        let line_number = expression.line_number();
        let handle = self
            .units
            .spawn(run_unit(worker, expression.clone(), timeout));
        self.pending.insert(
            handle.id(),
            PendingUnit {
                expression,
                launched_at: Instant::now(),
            },
        );
        self.peak = self.peak.max(self.len());

        metrics::inc_launched();
        metrics::set_active_units(self.len());
        tracing::debug!(line_number, active = self.len(), "unit launched");
    }

    /// Wait for any unit to finish and take its outcome.
    ///
    /// Returns `Ok(None)` when the set is empty.
    async fn reap_one(&mut self) -> Result<Option<(Outcome, Duration)>, SchedulerError> {
        let Some(joined) = self.units.join_next_with_id().await else {
            return Ok(None);
        };

        let reaped = match joined {
            Ok((id, outcome)) => {
                let unit = self.take_pending(id)?;
                (outcome, unit.launched_at.elapsed())
            }
            Err(err) => {
                let unit = self.take_pending(err.id())?;
                let lifetime = unit.launched_at.elapsed();
                (dead_unit_outcome(unit.expression, &err), lifetime)
            }
        };

        metrics::set_active_units(self.len());
        Ok(Some(reaped))
    }

    fn take_pending(&mut self, id: task::Id) -> Result<PendingUnit, SchedulerError> {
        self.pending
            .remove(&id)
            .ok_or_else(|| SchedulerError::UntrackedUnit(id.to_string()))
    }

    async fn abort_all(&mut self) {
        self.units.shutdown().await;
        self.pending.clear();
        metrics::set_active_units(0);
    }
}

/// Body of one unit: evaluate its single expression and produce one outcome.
async fn run_unit(
    worker: Arc<dyn ExpressionWorker>,
    expression: Expression,
    timeout: Option<Duration>,
) -> Outcome {
    let evaluation = worker.evaluate(expression.text());
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, evaluation).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!("timed out after {} ms", limit.as_millis())),
        },
        None => evaluation.await.map_err(|e| e.to_string()),
    };

    match result {
        Ok(value) => Outcome::Success { expression, value },
        Err(error) => Outcome::Failure { expression, error },
    }
}

/// A unit that ended without producing an outcome is reported as a failure.
fn dead_unit_outcome(expression: Expression, err: &JoinError) -> Outcome {
    let cause = if err.is_panic() {
        "panicked"
    } else {
        "cancelled"
    };
    Outcome::Failure {
        expression,
        error: format!("worker died: {cause}"),
    }
}

/// Runs batches of expressions through isolated, bounded units.
///
/// # Example
///
/// ```rust
/// use arith_orchestrator::{ArithmeticWorker, BatchScheduler, MemorySink};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let scheduler = BatchScheduler::new(Arc::new(ArithmeticWorker::new()));
/// let mut sink = MemorySink::new();
/// let report = scheduler.process(&["2 + 3", "4 * 5"], 2, &mut sink).await?;
/// assert_eq!(report.total, 2);
/// # Ok(())
/// # }
/// ```
///
/// # Panics
///
/// No methods on this type panic.
#[derive(Clone)]
pub struct BatchScheduler {
    worker: Arc<dyn ExpressionWorker>,
    unit_timeout: Option<Duration>,
}

impl BatchScheduler {
    /// Create a scheduler that evaluates through `worker`.
    pub fn new(worker: Arc<dyn ExpressionWorker>) -> Self {
        Self {
            worker,
            unit_timeout: None,
        }
    }

    /// Fail any unit that runs longer than `timeout`.
    ///
    /// Without a timeout a hung unit stalls the batch.
    pub fn with_unit_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.unit_timeout = timeout;
        self
    }

    /// Evaluate one batch.
    ///
    /// Each line is an expression whose `line_number` is its 1-based index.
    /// At most `min(max_concurrency, lines.len())` units run at once.
    /// Outcomes are appended to `sink` in completion order.
    ///
    /// # Errors
    ///
    /// - [`SchedulerError::InvalidInput`] if a line is blank (nothing is launched)
    /// - [`SchedulerError::ZeroConcurrency`] if `max_concurrency` is 0 and the batch is not empty
    /// - [`SchedulerError::Sink`] if the sink fails; remaining units are aborted
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub async fn process<S, L>(
        &self,
        lines: &[L],
        max_concurrency: usize,
        sink: &mut S,
    ) -> Result<BatchReport, SchedulerError>
    where
        S: ResultSink + ?Sized,
        L: AsRef<str>,
    {
        let expressions = lines
            .iter()
            .enumerate()
            .map(|(i, line)| {
                Expression::new(i + 1, line.as_ref()).map_err(|e| SchedulerError::InvalidInput {
                    line_number: i + 1,
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let total = expressions.len();
        if total == 0 {
            return Ok(BatchReport::default());
        }
        if max_concurrency == 0 {
            return Err(SchedulerError::ZeroConcurrency);
        }
        let capacity = max_concurrency.min(total);

        let span = tracing::info_span!(
            "scheduler.batch",
            total,
            capacity,
            succeeded = tracing::field::Empty,
            failed = tracing::field::Empty,
        );

        async move {
            let mut active = ActiveSet::new();
            let mut report = BatchReport {
                total,
                capacity,
                ..Default::default()
            };

            let result = self
                .run_batch(expressions, capacity, &mut active, &mut report, sink)
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, in_flight = active.len(), "batch aborted");
                active.abort_all().await;
                return Err(e);
            }

            report.peak_active = active.peak;
            tracing::Span::current().record("succeeded", report.succeeded);
            tracing::Span::current().record("failed", report.failed);
            tracing::info!(
                total = report.total,
                succeeded = report.succeeded,
                failed = report.failed,
                peak_active = report.peak_active,
                "batch complete"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    async fn run_batch<S>(
        &self,
        expressions: Vec<Expression>,
        capacity: usize,
        active: &mut ActiveSet,
        report: &mut BatchReport,
        sink: &mut S,
    ) -> Result<(), SchedulerError>
    where
        S: ResultSink + ?Sized,
    {
        // Dispatch loop.
        for expression in expressions {
            while active.len() >= capacity {
                if !self.drain_one(active, report, sink).await? {
                    break;
                }
            }
            active.launch(Arc::clone(&self.worker), expression, self.unit_timeout);
        }

        // Batch tail.
        while self.drain_one(active, report, sink).await? {}
        Ok(())
    }

    /// Reap one unit and persist its outcome. Returns `false` if nothing was active.
    async fn drain_one<S>(
        &self,
        active: &mut ActiveSet,
        report: &mut BatchReport,
        sink: &mut S,
    ) -> Result<bool, SchedulerError>
    where
        S: ResultSink + ?Sized,
    {
        let Some((outcome, lifetime)) = active.reap_one().await? else {
            return Ok(false);
        };

        let line_number = outcome.line_number();
        match &outcome {
            Outcome::Success { value, .. } => {
                report.succeeded += 1;
                tracing::debug!(
                    line_number,
                    value,
                    duration_ms = lifetime.as_millis() as u64,
                    "unit finished"
                );
            }
            Outcome::Failure { error, .. } => {
                report.failed += 1;
                tracing::warn!(
                    line_number,
                    error = %error,
                    duration_ms = lifetime.as_millis() as u64,
                    "unit failed"
                );
            }
        }
        metrics::record_outcome(outcome.is_success(), lifetime);

        sink.append(&outcome)
            .await
            .map_err(|source| SchedulerError::Sink {
                line_number,
                source,
            })?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::EvalError;
    use crate::sink::MemorySink;
    use crate::worker::{ArithmeticWorker, DelayedWorker};
    use async_trait::async_trait;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn arithmetic() -> BatchScheduler {
        BatchScheduler::new(Arc::new(ArithmeticWorker::new()))
    }

    /// Tracks how many evaluations run at the same time.
    struct GaugedWorker {
        running: AtomicUsize,
        max_seen: AtomicUsize,
    }

    impl GaugedWorker {
        fn new() -> Self {
            Self {
                running: AtomicUsize::new(0),
                max_seen: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ExpressionWorker for GaugedWorker {
        async fn evaluate(&self, expression: &str) -> Result<f64, EvalError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            crate::evaluator::evaluate(expression)
        }
    }

    /// Panics on expressions containing `boom`.
    struct PanickingWorker;

    #[async_trait]
    impl ExpressionWorker for PanickingWorker {
        #[allow(clippy::panic)]
        async fn evaluate(&self, expression: &str) -> Result<f64, EvalError> {
            if expression.contains("boom") {
                panic!("unit crashed");
            }
            crate::evaluator::evaluate(expression)
        }
    }

    /// Fails every append after the first `ok` ones.
    struct FlakySink {
        ok: usize,
        written: usize,
    }

    #[async_trait]
    impl ResultSink for FlakySink {
        async fn append(&mut self, _outcome: &Outcome) -> io::Result<()> {
            if self.written >= self.ok {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.written += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_empty_batch_never_touches_sink() {
        let mut sink = MemorySink::new();
        let lines: [&str; 0] = [];
        let report = arithmetic().process(&lines, 4, &mut sink).await.ok().unwrap();
        assert_eq!(report, BatchReport::default());
        assert!(sink.outcomes().is_empty());
    }

    #[tokio::test]
    async fn test_two_expressions_produce_expected_records() {
        let mut sink = MemorySink::new();
        arithmetic()
            .process(&["2 + 3", "4 * 5"], 2, &mut sink)
            .await
            .ok()
            .unwrap();

        let rendered = sink.render();
        assert!(rendered.contains("2 + 3 = 5.0\n"));
        assert!(rendered.contains("4 * 5 = 20.0\n"));
    }

    #[tokio::test]
    async fn test_malformed_expressions_become_failures() {
        let mut sink = MemorySink::new();
        let report = arithmetic()
            .process(&["2 +", "3 *"], 2, &mut sink)
            .await
            .ok()
            .unwrap();

        assert_eq!(report.failed, 2);
        assert_eq!(report.succeeded, 0);
        for outcome in sink.outcomes() {
            assert!(outcome.to_record().contains("ERROR"));
        }
    }

    #[tokio::test]
    async fn test_every_line_number_reported_once() {
        let lines: Vec<String> = (0..25).map(|i| format!("{i} + 1")).collect();
        let mut sink = MemorySink::new();
        let report = arithmetic().process(&lines, 3, &mut sink).await.ok().unwrap();

        assert_eq!(report.total, 25);
        let mut seen: Vec<usize> = sink.outcomes().iter().map(Outcome::line_number).collect();
        seen.sort_unstable();
        assert_eq!(seen, (1..=25).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_outcome_matches_its_line() {
        let lines = ["1 + 1", "2 + 2", "3 + 3", "4 + 4"];
        let mut sink = MemorySink::new();
        arithmetic().process(&lines, 2, &mut sink).await.ok().unwrap();

        for outcome in sink.outcomes() {
            let n = outcome.line_number();
            assert_eq!(outcome.expression().text(), lines[n - 1]);
            assert_eq!(
                outcome,
                &Outcome::Success {
                    expression: outcome.expression().clone(),
                    value: (2 * n) as f64,
                }
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_active_set_never_exceeds_capacity() {
        let worker = Arc::new(GaugedWorker::new());
        let scheduler = BatchScheduler::new(worker.clone());
        let lines: Vec<String> = (0..30).map(|i| format!("{i} * 2")).collect();
        let mut sink = MemorySink::new();

        let report = scheduler.process(&lines, 3, &mut sink).await.ok().unwrap();

        assert_eq!(report.capacity, 3);
        assert!(report.peak_active <= 3);
        assert!(worker.max_seen.load(Ordering::SeqCst) <= 3);
        assert_eq!(sink.outcomes().len(), 30);
    }

    #[tokio::test]
    async fn test_capacity_is_capped_by_batch_size() {
        let mut sink = MemorySink::new();
        let report = arithmetic()
            .process(&["1 + 1", "2 + 2"], 64, &mut sink)
            .await
            .ok()
            .unwrap();
        assert_eq!(report.capacity, 2);
        assert!(report.peak_active <= 2);
    }

    #[tokio::test]
    async fn test_outcomes_arrive_in_completion_order() {
        // Line 1 sleeps 300ms, line 2 sleeps 10ms.
        let scheduler = BatchScheduler::new(Arc::new(DelayedWorker::proportional(10)));
        let mut sink = MemorySink::new();
        scheduler
            .process(&["10 * 3", "1 * 1"], 2, &mut sink)
            .await
            .ok()
            .unwrap();

        let order: Vec<usize> = sink.outcomes().iter().map(Outcome::line_number).collect();
        assert_eq!(order, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_batch() {
        let mut sink = MemorySink::new();
        let report = arithmetic()
            .process(&["1 + 1", "oops", "+ 2", "3 * 3"], 1, &mut sink)
            .await
            .ok()
            .unwrap();
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(sink.outcomes().len(), 4);
    }

    #[tokio::test]
    async fn test_panicking_unit_reported_as_dead_worker() {
        let scheduler = BatchScheduler::new(Arc::new(PanickingWorker));
        let mut sink = MemorySink::new();
        let report = scheduler
            .process(&["1 + 1", "boom", "2 + 2"], 2, &mut sink)
            .await
            .ok()
            .unwrap();

        assert_eq!(report.failed, 1);
        let dead = sink
            .outcomes()
            .iter()
            .find(|o| o.line_number() == 2)
            .map(Outcome::to_record)
            .unwrap_or_default();
        assert_eq!(dead, "boom -> ERROR: worker died: panicked\n");
    }

    #[tokio::test]
    async fn test_unit_timeout_becomes_failure() {
        let scheduler = BatchScheduler::new(Arc::new(DelayedWorker::with_delay(500)))
            .with_unit_timeout(Some(Duration::from_millis(20)));
        let mut sink = MemorySink::new();
        let report = scheduler.process(&["1 + 1"], 1, &mut sink).await.ok().unwrap();

        assert_eq!(report.failed, 1);
        assert!(sink.render().contains("timed out after 20 ms"));
    }

    #[tokio::test]
    async fn test_blank_line_rejected_before_launch() {
        let mut sink = MemorySink::new();
        let result = arithmetic().process(&["1 + 1", "  "], 2, &mut sink).await;
        assert!(matches!(
            result,
            Err(SchedulerError::InvalidInput { line_number: 2, .. })
        ));
        assert!(sink.outcomes().is_empty());
    }

    #[tokio::test]
    async fn test_zero_concurrency_rejected() {
        let mut sink = MemorySink::new();
        let result = arithmetic().process(&["1 + 1"], 0, &mut sink).await;
        assert!(matches!(result, Err(SchedulerError::ZeroConcurrency)));
    }

    #[tokio::test]
    async fn test_sink_failure_aborts_batch() {
        let mut sink = FlakySink { ok: 1, written: 0 };
        let lines: Vec<String> = (0..10).map(|i| format!("{i} + 0")).collect();
        let result = arithmetic().process(&lines, 2, &mut sink).await;

        assert!(matches!(result, Err(SchedulerError::Sink { .. })));
        assert_eq!(sink.written, 1);
    }

    #[test]
    fn test_host_parallelism_is_positive() {
        assert!(host_parallelism() >= 1);
    }

    #[test]
    fn test_scheduler_error_display() {
        let err = SchedulerError::InvalidInput {
            line_number: 4,
            reason: "expression cannot be empty".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("line 4"));
        assert!(msg.contains("cannot be empty"));
    }
}
