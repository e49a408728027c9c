//! Structured observability hooks for the drift run lifecycle.
//!
//! This module provides:
//! - A run-scoped tracing span via [`RunSpan`]
//! - Emission functions for lifecycle events: start, phase change, finish,
//!   alert decision, notification failure
//!
//! Events are emitted at `info!` level (failures at `warn!`); filtering and
//! JSON output are configured through [`crate::telemetry::init_tracing`].

use std::future::Future;

use driftwatch_model::{RunId, Severity, TargetKey};
use tracing::instrument::Instrumented;
use tracing::{info, warn, Instrument};

use crate::orchestrator::RunPhase;
use crate::policy::AlertDecision;

/// Span covering one run of one target. The run id is recorded once the
/// classifier assigns it.
#[derive(Debug, Clone)]
pub struct RunSpan {
    span: tracing::Span,
}

impl RunSpan {
    pub fn new(target: &TargetKey) -> Self {
        let span = tracing::info_span!(
            "driftwatch.run",
            target = %target,
            run_id = tracing::field::Empty,
        );
        Self { span }
    }

    pub fn record_run_id(&self, run_id: &RunId) {
        self.span.record("run_id", tracing::field::display(run_id));
    }

    /// Attach the span to a future so every event inside carries the target.
    pub fn instrument<F: Future>(&self, fut: F) -> Instrumented<F> {
        fut.instrument(self.span.clone())
    }
}

/// Emit event: run started for a target.
pub fn emit_run_started(target: &TargetKey) {
    info!(event = "run.started", target = %target);
}

/// Emit event: the run's state machine entered a new phase.
pub fn emit_run_phase(target: &TargetKey, phase: RunPhase) {
    info!(event = "run.phase", target = %target, phase = %phase);
}

/// Emit event: run reached a terminal phase.
pub fn emit_run_finished(
    target: &TargetKey,
    run_id: Option<&RunId>,
    phase: RunPhase,
    severity: Option<Severity>,
    duration_ms: u64,
) {
    let run_id = run_id.map(RunId::as_str).unwrap_or("-");
    let severity = severity.map(Severity::as_str).unwrap_or("-");
    if matches!(phase, RunPhase::Failed(_)) {
        warn!(
            event = "run.finished",
            target = %target,
            run_id,
            phase = %phase,
            severity,
            duration_ms,
            success = false,
        );
    } else {
        info!(
            event = "run.finished",
            target = %target,
            run_id,
            phase = %phase,
            severity,
            duration_ms,
            success = true,
        );
    }
}

/// Emit event: alert policy evaluated.
pub fn emit_alert_decided(decision: &AlertDecision) {
    info!(
        event = "alert.decided",
        target = %decision.target,
        run_id = %decision.run_id,
        notify = decision.notify,
        severity = %decision.severity,
        reason = %decision.reason,
        new = decision.new_addresses.len(),
    );
}

/// Emit event: notification delivery failed after retries (warning level).
pub fn emit_notify_failed(target: &TargetKey, run_id: &RunId, error: &dyn std::fmt::Display) {
    warn!(event = "notify.failed", target = %target, run_id = %run_id, error = %error);
}
