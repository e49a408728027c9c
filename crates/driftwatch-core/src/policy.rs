//! Alert policy: decide whether a drift report is worth a notification.
//!
//! The rule is transition-based. Drift that was already reported and is
//! still unresolved never re-alerts on its own; any newly drifted address
//! that was clean in the previous report always does.

use std::fmt;

use driftwatch_model::{DriftReport, RunId, Severity, TargetKey};
use serde::{Deserialize, Serialize};

/// Why a decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertReason {
    /// The report has no drift.
    NoDrift,
    /// No previous report exists for the target.
    FirstRun,
    /// The previous report had no drift.
    PreviouslyClean,
    /// At least one address drifted that was clean in the previous report.
    NewDrift,
    /// All drift was already known from the previous report.
    SuppressedKnownDrift,
    /// Would alert, but the severity is under the configured minimum.
    BelowThreshold,
}

impl AlertReason {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertReason::NoDrift => "no_drift",
            AlertReason::FirstRun => "first_run",
            AlertReason::PreviouslyClean => "previously_clean",
            AlertReason::NewDrift => "new_drift",
            AlertReason::SuppressedKnownDrift => "suppressed_known_drift",
            AlertReason::BelowThreshold => "below_threshold",
        }
    }
}

impl fmt::Display for AlertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the alert policy, handed to the notifier when `notify` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertDecision {
    pub notify: bool,
    pub severity: Severity,
    pub summary: String,
    pub target: TargetKey,
    pub run_id: RunId,
    /// Newly drifted addresses that were not drifted in the previous report.
    pub new_addresses: Vec<String>,
    pub reason: AlertReason,
}

/// Alert policy with a minimum severity threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertPolicy {
    min_severity: Severity,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            min_severity: Severity::Low,
        }
    }
}

impl AlertPolicy {
    pub fn new(min_severity: Severity) -> Self {
        Self { min_severity }
    }

    pub fn min_severity(&self) -> Severity {
        self.min_severity
    }

    pub fn evaluate(&self, report: &DriftReport, previous: Option<&DriftReport>) -> AlertDecision {
        let new_addresses: Vec<String> = report
            .newly_drifted()
            .filter(|(addr, _)| previous.map_or(true, |p| !p.is_drifted(addr)))
            .map(|(addr, _)| addr.to_string())
            .collect();

        let reason = if report.severity == Severity::None {
            AlertReason::NoDrift
        } else {
            match previous {
                None => AlertReason::FirstRun,
                Some(prev) if prev.severity == Severity::None => AlertReason::PreviouslyClean,
                Some(_) if !new_addresses.is_empty() => AlertReason::NewDrift,
                Some(_) => AlertReason::SuppressedKnownDrift,
            }
        };

        let would_notify = matches!(
            reason,
            AlertReason::FirstRun | AlertReason::PreviouslyClean | AlertReason::NewDrift
        );
        let (notify, reason) = if would_notify && report.severity < self.min_severity {
            (false, AlertReason::BelowThreshold)
        } else {
            (would_notify, reason)
        };

        AlertDecision {
            notify,
            severity: report.severity,
            summary: summarize(report),
            target: report.target(),
            run_id: report.run_id.clone(),
            new_addresses,
            reason,
        }
    }
}

/// `aws/prod: HIGH drift, 2 new, 1 still drifted, 0 resolved`
pub fn summarize(report: &DriftReport) -> String {
    let counts = report.counts();
    let label = match report.severity {
        Severity::None => "no drift".to_string(),
        severity => format!("{} drift", severity.as_str().to_uppercase()),
    };
    format!(
        "{}: {}, {} new, {} still drifted, {} resolved",
        report.target(),
        label,
        counts.newly_drifted,
        counts.still_drifted,
        counts.resolved
    )
}

/// Evaluate with the default policy (minimum severity `low`).
pub fn should_alert(report: &DriftReport, previous: Option<&DriftReport>) -> AlertDecision {
    AlertPolicy::default().evaluate(report, previous)
}
