//! Prometheus metrics for batch scheduling.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup. The recording helpers are
//! no-ops until then.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `arith_units_launched_total` | Counter | none |
//! | `arith_outcomes_total` | Counter | `kind` |
//! | `arith_active_units` | Gauge | none |
//! | `arith_unit_duration_seconds` | Histogram | none |

use crate::OrchestratorError;
use prometheus::{
    Counter, CounterVec, Encoder, Histogram, HistogramOpts, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;
use std::time::Duration;

/// All metrics, bundled so they can live in a single [`OnceLock`].
pub struct Metrics {
    /// Registry that owns all metric descriptors.
    pub registry: Registry,
    /// Units launched across all batches.
    pub units_launched: Counter,
    /// Reaped outcomes by kind (`success` / `failure`).
    pub outcomes_total: CounterVec,
    /// Units currently in the active set.
    pub active_units: IntGauge,
    /// Launch-to-reap latency of a unit.
    pub unit_duration: Histogram,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn init_err(e: prometheus::Error) -> OrchestratorError {
    OrchestratorError::Other(format!("metrics init failed: {e}"))
}

/// Initialise all metrics and register them with a private registry.
///
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`OrchestratorError::Other`] if metric construction or registration fails.
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), OrchestratorError> {
    if METRICS.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let units_launched = Counter::with_opts(Opts::new(
        "arith_units_launched_total",
        "Evaluation units launched",
    ))
    .map_err(init_err)?;
    registry
        .register(Box::new(units_launched.clone()))
        .map_err(init_err)?;

    let outcomes_total = CounterVec::new(
        Opts::new("arith_outcomes_total", "Reaped outcomes by kind"),
        &["kind"],
    )
    .map_err(init_err)?;
    registry
        .register(Box::new(outcomes_total.clone()))
        .map_err(init_err)?;

    let active_units = IntGauge::with_opts(Opts::new(
        "arith_active_units",
        "Units currently running or awaiting reap",
    ))
    .map_err(init_err)?;
    registry
        .register(Box::new(active_units.clone()))
        .map_err(init_err)?;

    let unit_duration = Histogram::with_opts(HistogramOpts::new(
        "arith_unit_duration_seconds",
        "Time from unit launch to reap",
    ))
    .map_err(init_err)?;
    registry
        .register(Box::new(unit_duration.clone()))
        .map_err(init_err)?;

    // A racing initialiser produces identical descriptors; first one wins.
    let _ = METRICS.set(Metrics {
        registry,
        units_launched,
        outcomes_total,
        active_units,
        unit_duration,
    });

    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

/// Count a launched unit.
pub fn inc_launched() {
    if let Some(m) = metrics() {
        m.units_launched.inc();
    }
}

/// Count a reaped outcome and record how long its unit lived.
pub fn record_outcome(success: bool, lifetime: Duration) {
    if let Some(m) = metrics() {
        let kind = if success { "success" } else { "failure" };
        if let Ok(c) = m.outcomes_total.get_metric_with_label_values(&[kind]) {
            c.inc();
        }
        m.unit_duration.observe(lifetime.as_secs_f64());
    }
}

/// Set the active-set size gauge.
pub fn set_active_units(active: usize) {
    if let Some(m) = metrics() {
        m.active_units.set(i64::try_from(active).unwrap_or(i64::MAX));
    }
}

/// Gather and encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics have not been initialised or if
/// encoding fails.
///
/// # Panics
///
/// This function never panics.
pub fn gather_metrics() -> String {
    let Some(m) = metrics() else {
        return String::new();
    };
    let families = m.registry.gather();
    let mut buffer = Vec::new();
    if TextEncoder::new().encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
