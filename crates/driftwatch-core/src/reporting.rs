//! Human-readable drift reports and the per-target status table.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use driftwatch_model::{DriftReport, ResourceVerdict, VerdictStatus};
use serde::Serialize;
use serde_json::Value;

use crate::orchestrator::{BatchSummary, RunPhase};
use crate::policy::AlertDecision;

const RULE: &str = "======================================================================";

/// Statuses rendered in the body, in display order.
const SECTIONS: [(VerdictStatus, &str); 3] = [
    (VerdictStatus::NewlyDrifted, "Newly drifted"),
    (VerdictStatus::StillDrifted, "Still drifted"),
    (VerdictStatus::Resolved, "Resolved"),
];

/// Render a report as plain text.
///
/// Resources are grouped by status, then ordered by action (most severe
/// first) and address, so the output is stable for a given report.
pub fn render_text_report(report: &DriftReport, decision: Option<&AlertDecision>) -> String {
    let counts = report.counts();
    let mut out = String::new();

    out.push_str(RULE);
    out.push('\n');
    let _ = writeln!(out, " Drift report: {}", report.target());
    let _ = writeln!(out, " Run:          {}", report.run_id);
    let _ = writeln!(
        out,
        " Baseline:     {}",
        report
            .baseline_run_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "(none, first run)".to_string())
    );
    let _ = writeln!(out, " Generated:    {}", report.created_at.to_rfc3339());
    let _ = writeln!(out, " Severity:     {}", report.severity.as_str().to_uppercase());
    out.push_str(RULE);
    out.push('\n');

    if report.has_drift() {
        let _ = writeln!(
            out,
            "DRIFT DETECTED: {} new, {} still drifted, {} resolved",
            counts.newly_drifted, counts.still_drifted, counts.resolved
        );
    } else {
        let _ = writeln!(
            out,
            "No drift detected ({} resolved, {} unchanged)",
            counts.resolved, counts.unchanged
        );
    }
    if let Some(decision) = decision {
        let verb = if decision.notify { "notify" } else { "suppressed" };
        let _ = writeln!(out, "Alert: {verb} ({})", decision.reason);
    }

    for (status, title) in SECTIONS {
        let mut entries: Vec<(&str, &ResourceVerdict)> = report
            .resource_verdicts
            .iter()
            .filter(|(_, v)| v.status == status)
            .map(|(addr, v)| (addr.as_str(), v))
            .collect();
        if entries.is_empty() {
            continue;
        }
        entries.sort_by(|(a_addr, a), (b_addr, b)| {
            action_rank(b)
                .cmp(&action_rank(a))
                .then_with(|| a_addr.cmp(b_addr))
        });

        let _ = writeln!(out, "\n{title} ({})", entries.len());
        for (address, verdict) in entries {
            render_verdict(&mut out, address, verdict);
        }
    }
    out
}

fn action_rank(verdict: &ResourceVerdict) -> u8 {
    verdict.change.as_ref().map_or(0, |c| c.action().rank())
}

fn render_verdict(out: &mut String, address: &str, verdict: &ResourceVerdict) {
    let Some(change) = verdict.change.as_ref().filter(|c| c.action().is_drift()) else {
        let _ = writeln!(out, "      {address}");
        return;
    };
    let _ = writeln!(
        out,
        "  {:>3} {} ({}, {})",
        change.action().symbol(),
        address,
        change.resource_type(),
        change.action()
    );
    for diff in change.attribute_diffs() {
        let path = if diff.path.is_empty() { "(resource)" } else { &diff.path };
        let marker = if diff.forces_replacement {
            "  # forces replacement"
        } else {
            ""
        };
        let _ = writeln!(
            out,
            "        {path}: {} -> {}{marker}",
            short_value(&diff.old_value),
            short_value(&diff.new_value)
        );
    }
}

/// Compact single-line rendering of a diff value.
fn short_value(value: &Value) -> String {
    const MAX: usize = 80;
    let rendered = value.to_string();
    if rendered.chars().count() <= MAX {
        rendered
    } else {
        let cut: String = rendered.chars().take(MAX - 3).collect();
        format!("{cut}...")
    }
}

/// Render the per-target status table for a batch.
pub fn render_status_table(summary: &BatchSummary) -> String {
    let header = [
        "TARGET", "STATUS", "SEVERITY", "NEW", "STILL", "RESOLVED", "ALERT", "DETAIL",
    ];
    let rows: Vec<[String; 8]> = summary
        .outcomes
        .iter()
        .map(|outcome| {
            let counts = outcome.report.as_ref().map(|r| r.counts());
            let status = match outcome.phase {
                RunPhase::Done => "ok".to_string(),
                phase => phase.to_string(),
            };
            let severity = outcome
                .report
                .as_ref()
                .map_or("-", |r| r.severity.as_str())
                .to_string();
            let alert = match (&outcome.decision, &outcome.notify_warning) {
                (Some(_), Some(_)) => "failed",
                (Some(d), None) if d.notify => "sent",
                (Some(_), None) => "no",
                (None, _) => "-",
            }
            .to_string();
            let detail = outcome
                .detail
                .clone()
                .or_else(|| outcome.notify_warning.clone())
                .unwrap_or_default();
            let count = |f: fn(&driftwatch_model::VerdictCounts) -> usize| {
                counts.as_ref().map_or("-".to_string(), |c| f(c).to_string())
            };
            [
                outcome.target.to_string(),
                status,
                severity,
                count(|c| c.newly_drifted),
                count(|c| c.still_drifted),
                count(|c| c.resolved),
                alert,
                detail,
            ]
        })
        .collect();

    let mut widths = header.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_row(&mut out, &header.map(str::to_string), &widths);
    let divider = widths.map(|w| "-".repeat(w));
    push_row(&mut out, &divider, &widths);
    for row in &rows {
        push_row(&mut out, row, &widths);
    }
    let _ = writeln!(
        out,
        "\n{} succeeded, {} failed",
        summary.succeeded(),
        summary.failed()
    );
    out
}

fn push_row(out: &mut String, cells: &[String; 8], widths: &[usize; 8]) {
    let line = cells
        .iter()
        .zip(widths.iter())
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join(" | ");
    out.push_str(line.trim_end());
    out.push('\n');
}

#[derive(Serialize)]
struct ReportArtifact<'a> {
    report: &'a DriftReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    decision: Option<&'a AlertDecision>,
}

/// Paths written by [`write_report`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenReport {
    pub text: PathBuf,
    pub json: PathBuf,
}

/// Write `drift_report_<cloud>_<environment>_<run_id>.txt` and the matching
/// `.json` into `dir`, creating it if needed.
pub fn write_report(
    dir: &Path,
    report: &DriftReport,
    decision: Option<&AlertDecision>,
) -> Result<WrittenReport> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {:?}", dir))?;
    let stem = format!(
        "drift_report_{}_{}_{}",
        report.cloud, report.environment, report.run_id
    );

    let text = dir.join(format!("{stem}.txt"));
    std::fs::write(&text, render_text_report(report, decision))
        .with_context(|| format!("write {:?}", text))?;

    let json = dir.join(format!("{stem}.json"));
    let content = serde_json::to_string_pretty(&ReportArtifact { report, decision })
        .context("serialize drift report")?;
    std::fs::write(&json, content).with_context(|| format!("write {:?}", json))?;

    Ok(WrittenReport { text, json })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::orchestrator::{FailureReason, RunOutcome};
    use crate::policy::should_alert;
    use chrono::Utc;
    use driftwatch_model::{
        Action, AttributeDiff, ChangeDocument, Cloud, Environment, ResourceChange, TargetKey,
    };
    use serde_json::json;

    fn doc(changes: Vec<ResourceChange>) -> ChangeDocument {
        ChangeDocument::new(Cloud::Aws, Environment::new("prod").unwrap(), Utc::now(), changes)
            .unwrap()
    }

    fn vpc_update() -> ResourceChange {
        ResourceChange::new(
            "aws_vpc.main",
            "aws_vpc",
            Action::Update,
            vec![AttributeDiff::new(
                "cidr_block",
                json!("10.0.0.0/16"),
                json!("10.1.0.0/16"),
            )],
        )
        .unwrap()
    }

    #[test]
    fn text_report_lists_drift_by_status() {
        let first = classify(&doc(vec![vpc_update()]), None).unwrap();
        let replace = ResourceChange::new(
            "aws_instance.web",
            "aws_instance",
            Action::Replace,
            vec![AttributeDiff::new("ami", json!("ami-1"), json!("ami-2")).forcing_replacement()],
        )
        .unwrap();
        let second = classify(&doc(vec![vpc_update(), replace]), Some(&first)).unwrap();
        let decision = should_alert(&second, Some(&first));

        let text = render_text_report(&second, Some(&decision));
        assert!(text.contains("Drift report: aws/prod"));
        assert!(text.contains("DRIFT DETECTED: 1 new, 1 still drifted, 0 resolved"));
        assert!(text.contains("Alert: notify (new_drift)"));
        assert!(text.contains("-/+ aws_instance.web (aws_instance, replace)"));
        assert!(text.contains("ami: \"ami-1\" -> \"ami-2\"  # forces replacement"));
        assert!(text.contains("Still drifted (1)"));
        assert!(text.find("Newly drifted").unwrap() < text.find("Still drifted").unwrap());
        assert!(text.contains(&format!("Baseline:     {}", first.run_id)));
    }

    #[test]
    fn clean_report_says_so() {
        let first = classify(&doc(vec![vpc_update()]), None).unwrap();
        let clean = classify(&doc(vec![]), Some(&first)).unwrap();
        let text = render_text_report(&clean, None);
        assert!(text.contains("No drift detected (1 resolved, 0 unchanged)"));
        assert!(text.contains("Resolved (1)\n      aws_vpc.main"));
        assert!(!text.contains("Alert:"));
    }

    #[test]
    fn long_values_are_truncated() {
        let long = Value::String("x".repeat(200));
        let rendered = short_value(&long);
        assert_eq!(rendered.chars().count(), 80);
        assert!(rendered.ends_with("..."));
    }

    #[test]
    fn status_table_has_one_row_per_outcome() {
        let report = classify(&doc(vec![vpc_update()]), None).unwrap();
        let decision = should_alert(&report, None);
        let ok = RunOutcome {
            target: report.target(),
            run_id: Some(report.run_id.clone()),
            phase: RunPhase::Done,
            transitions: vec![RunPhase::Done],
            report: Some(report),
            decision: Some(decision),
            notify_warning: None,
            detail: None,
        };
        let failed = RunOutcome {
            target: TargetKey::parse("gcp", "dev").unwrap(),
            run_id: None,
            phase: RunPhase::Failed(FailureReason::PlannerUnavailable),
            transitions: vec![RunPhase::Fetching],
            report: None,
            decision: None,
            notify_warning: None,
            detail: Some("planner down".to_string()),
        };
        let table = render_status_table(&BatchSummary {
            outcomes: vec![ok, failed],
        });
        let lines: Vec<&str> = table.lines().collect();
        assert!(lines[0].starts_with("TARGET"));
        assert!(lines[0].contains("| RESOLVED |"));
        assert!(lines[2].starts_with("aws/prod"));
        assert!(lines[2].contains("| ok "));
        assert!(lines[2].contains("| medium "));
        assert!(lines[2].contains("| sent"));
        assert!(lines[3].contains("failed(planner_unavailable)"));
        assert!(lines[3].ends_with("planner down"));
        assert!(table.ends_with("1 succeeded, 1 failed\n"));
    }

    #[test]
    fn write_report_creates_text_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let report = classify(&doc(vec![vpc_update()]), None).unwrap();
        let decision = should_alert(&report, None);
        let out_dir = dir.path().join("reports");

        let written = write_report(&out_dir, &report, Some(&decision)).unwrap();
        let name = written.text.file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(name, format!("drift_report_aws_prod_{}.txt", report.run_id));

        let json: Value =
            serde_json::from_str(&std::fs::read_to_string(&written.json).unwrap()).unwrap();
        assert_eq!(json["report"]["severity"], "medium");
        assert_eq!(json["decision"]["reason"], "first_run");
    }
}
