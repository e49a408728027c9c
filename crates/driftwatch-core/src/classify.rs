//! Drift classification against the previous baseline.
//!
//! Classification is pure: the same document and baseline always produce
//! the same verdicts and severity. Only `run_id` and `created_at` differ
//! between two classifications of identical input.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use driftwatch_model::{
    Action, ChangeDocument, DriftReport, ModelError, ResourceChange, ResourceVerdict, RunId,
    Severity, VerdictStatus,
};
use serde::{Deserialize, Serialize};

use crate::error::{DriftError, Result};

/// Severity given to resources that were already drifted in the baseline.
///
/// Written as `"carry"` or a severity name (`"low"`) in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StillDriftedRule {
    /// Keep the severity the resource's action maps to.
    #[default]
    Carry,
    /// Use a fixed severity regardless of action.
    Fixed(Severity),
}

impl FromStr for StillDriftedRule {
    type Err = ModelError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("carry") {
            return Ok(StillDriftedRule::Carry);
        }
        s.parse().map(StillDriftedRule::Fixed)
    }
}

impl TryFrom<String> for StillDriftedRule {
    type Error = ModelError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<StillDriftedRule> for String {
    fn from(rule: StillDriftedRule) -> Self {
        match rule {
            StillDriftedRule::Carry => "carry".to_string(),
            StillDriftedRule::Fixed(severity) => severity.as_str().to_string(),
        }
    }
}

/// Action-to-severity mapping used by the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityPolicy {
    pub create: Severity,
    pub update: Severity,
    pub delete: Severity,
    pub replace: Severity,
    pub unknown: Severity,
    pub still_drifted: StillDriftedRule,
}

impl Default for SeverityPolicy {
    fn default() -> Self {
        Self {
            create: Severity::Low,
            update: Severity::Medium,
            delete: Severity::High,
            replace: Severity::High,
            unknown: Severity::Medium,
            still_drifted: StillDriftedRule::Carry,
        }
    }
}

impl SeverityPolicy {
    pub fn for_action(&self, action: Action) -> Severity {
        match action {
            Action::NoOp => Severity::None,
            Action::Create => self.create,
            Action::Update => self.update,
            Action::Delete => self.delete,
            Action::Replace => self.replace,
            Action::Unknown => self.unknown,
        }
    }

    /// Severity contributed by one verdict. Attribute diffs never matter,
    /// only the action does.
    pub fn for_verdict(&self, status: VerdictStatus, action: Action) -> Severity {
        match status {
            VerdictStatus::NewlyDrifted => self.for_action(action),
            VerdictStatus::StillDrifted => match self.still_drifted {
                StillDriftedRule::Carry => self.for_action(action),
                StillDriftedRule::Fixed(severity) => severity,
            },
            VerdictStatus::Unchanged | VerdictStatus::Resolved => Severity::None,
        }
    }
}

/// Compares change documents against the previous report for the same target.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    policy: SeverityPolicy,
}

impl Classifier {
    pub fn new(policy: SeverityPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SeverityPolicy {
        &self.policy
    }

    /// Classify `doc` against `baseline` with a fresh run id and timestamp.
    pub fn classify(
        &self,
        doc: &ChangeDocument,
        baseline: Option<&DriftReport>,
    ) -> Result<DriftReport> {
        self.classify_as(doc, baseline, RunId::generate(), Utc::now())
    }

    /// Classify with a caller-supplied run id and timestamp.
    pub fn classify_as(
        &self,
        doc: &ChangeDocument,
        baseline: Option<&DriftReport>,
        run_id: RunId,
        created_at: DateTime<Utc>,
    ) -> Result<DriftReport> {
        if let Some(base) = baseline {
            if base.target() != doc.target() {
                return Err(DriftError::invariant(
                    doc.target().to_string(),
                    format!("baseline {} belongs to {}", base.run_id, base.target()),
                ));
            }
            if base.run_id >= run_id {
                return Err(DriftError::invariant(
                    doc.target().to_string(),
                    format!("baseline {} is not older than run {run_id}", base.run_id),
                ));
            }
        }

        let known = baseline_fingerprints(baseline)?;
        let mut verdicts = BTreeMap::new();

        for change in doc.changes() {
            let address = change.address().to_string();
            let status = if change.action().is_drift() {
                let fingerprint = change.fingerprint()?;
                match known.get(address.as_str()) {
                    Some(Some(known_fp)) if *known_fp == fingerprint => {
                        VerdictStatus::StillDrifted
                    }
                    _ => VerdictStatus::NewlyDrifted,
                }
            } else if known.contains_key(address.as_str()) {
                VerdictStatus::Resolved
            } else {
                VerdictStatus::Unchanged
            };
            verdicts.insert(
                address,
                ResourceVerdict {
                    status,
                    change: Some(change.clone()),
                },
            );
        }

        for address in known.keys() {
            if doc.get(address).is_none() {
                verdicts.insert(
                    address.to_string(),
                    ResourceVerdict {
                        status: VerdictStatus::Resolved,
                        change: None,
                    },
                );
            }
        }

        let severity = self.severity_of(&verdicts);
        Ok(DriftReport {
            run_id,
            cloud: doc.cloud().clone(),
            environment: doc.environment().clone(),
            baseline_run_id: baseline.map(|b| b.run_id.clone()),
            created_at,
            document_digest: doc.digest()?,
            resource_verdicts: verdicts,
            severity,
        })
    }

    /// Highest severity over all verdicts.
    fn severity_of(&self, verdicts: &BTreeMap<String, ResourceVerdict>) -> Severity {
        verdicts
            .values()
            .filter_map(|v| {
                v.change
                    .as_ref()
                    .map(|c| self.policy.for_verdict(v.status, c.action()))
            })
            .max()
            .unwrap_or(Severity::None)
    }
}

/// Fingerprints of the baseline's drifted resources, keyed by address.
///
/// A drifted verdict without its change cannot be compared, so it is kept
/// with no fingerprint and anything at that address counts as newly drifted.
fn baseline_fingerprints(baseline: Option<&DriftReport>) -> Result<HashMap<&str, Option<String>>> {
    let Some(base) = baseline else {
        return Ok(HashMap::new());
    };
    base.resource_verdicts
        .iter()
        .filter(|(_, v)| v.status.is_drifted())
        .map(|(addr, v)| {
            let fp = v
                .change
                .as_ref()
                .map(ResourceChange::fingerprint)
                .transpose()?;
            Ok((addr.as_str(), fp))
        })
        .collect()
}

/// Classify with the default severity policy.
pub fn classify(doc: &ChangeDocument, baseline: Option<&DriftReport>) -> Result<DriftReport> {
    Classifier::default().classify(doc, baseline)
}
