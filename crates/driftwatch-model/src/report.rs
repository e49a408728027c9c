//! Drift reports: the classifier's per-run verdicts.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::change::ResourceChange;
use crate::digest::digest_of;
use crate::error::{ModelError, Result};
use crate::target::{Cloud, Environment, TargetKey};

/// Unique, time-ordered run identifier (UUIDv7).
///
/// The hyphenated lowercase form sorts lexicographically in creation order,
/// which the history stores rely on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Generate a new time-ordered RunId.
    pub fn generate() -> Self {
        RunId(uuid::Uuid::now_v7().hyphenated().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 8 chars) for log lines and tables.
    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RunId {
    type Err = ModelError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let valid = !s.is_empty()
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(ModelError::Invalid {
                kind: "run id",
                value: s.to_string(),
            });
        }
        Ok(RunId(s.to_string()))
    }
}

/// Coarse ordinal summary of a report's worst drifted resource.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ModelError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Severity::None),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            _ => Err(ModelError::Invalid {
                kind: "severity",
                value: s.to_string(),
            }),
        }
    }
}

/// Per-resource classification relative to the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Unchanged,
    NewlyDrifted,
    StillDrifted,
    Resolved,
}

impl VerdictStatus {
    /// Newly or still drifted.
    pub fn is_drifted(self) -> bool {
        matches!(self, VerdictStatus::NewlyDrifted | VerdictStatus::StillDrifted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VerdictStatus::Unchanged => "unchanged",
            VerdictStatus::NewlyDrifted => "newly_drifted",
            VerdictStatus::StillDrifted => "still_drifted",
            VerdictStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict for one resource address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceVerdict {
    pub status: VerdictStatus,
    /// The change from the current document, when it has an entry for the address.
    pub change: Option<ResourceChange>,
}

/// Tally of verdicts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictCounts {
    pub unchanged: usize,
    pub newly_drifted: usize,
    pub still_drifted: usize,
    pub resolved: usize,
}

/// The classifier's verdict for one run. Immutable once appended to history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub run_id: RunId,
    pub cloud: Cloud,
    pub environment: Environment,
    /// Run this report was compared against; `None` on the first run for the target.
    pub baseline_run_id: Option<RunId>,
    pub created_at: DateTime<Utc>,
    /// Content hash of the change document this report was built from.
    pub document_digest: String,
    pub resource_verdicts: BTreeMap<String, ResourceVerdict>,
    pub severity: Severity,
}

impl DriftReport {
    pub fn target(&self) -> TargetKey {
        TargetKey::new(self.cloud.clone(), self.environment.clone())
    }

    /// Addresses marked newly or still drifted.
    pub fn drifted_addresses(&self) -> BTreeSet<&str> {
        self.resource_verdicts
            .iter()
            .filter(|(_, v)| v.status.is_drifted())
            .map(|(addr, _)| addr.as_str())
            .collect()
    }

    pub fn is_drifted(&self, address: &str) -> bool {
        self.resource_verdicts
            .get(address)
            .map(|v| v.status.is_drifted())
            .unwrap_or(false)
    }

    /// Verdicts with a given status, in address order.
    pub fn with_status(
        &self,
        status: VerdictStatus,
    ) -> impl Iterator<Item = (&str, &ResourceVerdict)> {
        self.resource_verdicts
            .iter()
            .filter(move |(_, v)| v.status == status)
            .map(|(addr, v)| (addr.as_str(), v))
    }

    pub fn newly_drifted(&self) -> impl Iterator<Item = (&str, &ResourceVerdict)> {
        self.with_status(VerdictStatus::NewlyDrifted)
    }

    pub fn counts(&self) -> VerdictCounts {
        let mut counts = VerdictCounts::default();
        for verdict in self.resource_verdicts.values() {
            match verdict.status {
                VerdictStatus::Unchanged => counts.unchanged += 1,
                VerdictStatus::NewlyDrifted => counts.newly_drifted += 1,
                VerdictStatus::StillDrifted => counts.still_drifted += 1,
                VerdictStatus::Resolved => counts.resolved += 1,
            }
        }
        counts
    }

    pub fn has_drift(&self) -> bool {
        self.resource_verdicts.values().any(|v| v.status.is_drifted())
    }

    /// Digest over everything except `run_id` and `created_at`.
    ///
    /// Two classifications of the same document against the same baseline
    /// produce equal content digests.
    pub fn content_digest(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Content<'a> {
            cloud: &'a Cloud,
            environment: &'a Environment,
            baseline_run_id: &'a Option<RunId>,
            document_digest: &'a str,
            resource_verdicts: &'a BTreeMap<String, ResourceVerdict>,
            severity: Severity,
        }
        digest_of(&Content {
            cloud: &self.cloud,
            environment: &self.environment,
            baseline_run_id: &self.baseline_run_id,
            document_digest: &self.document_digest,
            resource_verdicts: &self.resource_verdicts,
            severity: self.severity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_are_time_ordered() {
        let a = RunId::generate();
        let b = RunId::generate();
        assert!(a < b, "{a} should sort before {b}");
        assert_eq!(a.short().len(), 8);
    }

    #[test]
    fn run_id_rejects_path_characters() {
        assert!("../etc".parse::<RunId>().is_err());
        assert!("".parse::<RunId>().is_err());
        assert!("0190f2a4-1b2c-7d3e-8f40-123456789abc".parse::<RunId>().is_ok());
    }

    #[test]
    fn severity_ordering_and_parse() {
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Low > Severity::None);
        assert_eq!("HIGH".parse::<Severity>().unwrap(), Severity::High);
        assert!("critical".parse::<Severity>().is_err());
    }

    #[test]
    fn verdict_status_serde_names() {
        let json = serde_json::to_string(&VerdictStatus::NewlyDrifted).unwrap();
        assert_eq!(json, "\"newly_drifted\"");
    }
}
