//! `driftwatch.toml` configuration.
//!
//! Every section and field has a default, so an absent file (or an empty
//! one) yields a working local setup: filesystem history under
//! `.driftwatch/history`, plans read from `plans/<cloud>/<environment>.json`
//! and alerts written to the log.

use std::path::{Path, PathBuf};
use std::time::Duration;

use driftwatch_model::{Environment, Severity, TargetKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classify::{Classifier, SeverityPolicy, StillDriftedRule};
use crate::orchestrator::RetryPolicies;
use crate::policy::AlertPolicy;
use crate::retry::RetryPolicy;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "driftwatch.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of targets processed at once.
    pub concurrency: usize,
    /// Known environment names. Targets must use one of them.
    pub environments: Vec<Environment>,
    /// Where rendered reports are written. Unset disables report files.
    pub reports_dir: Option<PathBuf>,
    pub targets: Vec<TargetKey>,
    pub store: StoreConfig,
    pub planner: PlannerConfig,
    pub notify: NotifyConfig,
    pub retry: RetryConfig,
    pub severity: SeverityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: 4,
            environments: ["dev", "staging", "prod"]
                .into_iter()
                .filter_map(|name| Environment::new(name).ok())
                .collect(),
            reports_dir: Some(PathBuf::from("reports")),
            targets: Vec::new(),
            store: StoreConfig::default(),
            planner: PlannerConfig::default(),
            notify: NotifyConfig::default(),
            retry: RetryConfig::default(),
            severity: SeverityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Fs,
    Surreal,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// History root for `fs`; database directory for `surreal` without a `url`.
    pub path: PathBuf,
    /// SurrealDB endpoint (`surrealkv://...`, `ws://...`, `mem://`).
    pub url: Option<String>,
    /// Keep full change documents; otherwise only their digest is stored.
    pub retain_documents: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Fs,
            path: PathBuf::from(".driftwatch/history"),
            url: None,
            retain_documents: true,
        }
    }
}

impl StoreConfig {
    /// Endpoint for the surreal backend: `url` if set, else an embedded
    /// SurrealKV database at `path`.
    pub fn surreal_url(&self) -> String {
        self.url
            .clone()
            .unwrap_or_else(|| format!("surrealkv://{}", self.path.display()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerKind {
    File,
    Command,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub kind: PlannerKind,
    /// `file`: plans are read from `<plans_dir>/<cloud>/<environment>.json`.
    pub plans_dir: PathBuf,
    /// `command`: program and arguments; `{cloud}` and `{environment}` are substituted.
    pub command: Vec<String>,
    pub working_dir: Option<String>,
    pub timeout_secs: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            kind: PlannerKind::File,
            plans_dir: PathBuf::from("plans"),
            command: Vec::new(),
            working_dir: None,
            timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyKind {
    Log,
    Webhook,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub kind: NotifyKind,
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            kind: NotifyKind::Log,
            webhook_url: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
            multiplier: policy.multiplier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityConfig {
    pub create: Severity,
    pub update: Severity,
    pub delete: Severity,
    pub replace: Severity,
    pub unknown: Severity,
    pub still_drifted: StillDriftedRule,
    /// Decisions below this severity never notify.
    pub min_alert: Severity,
}

impl Default for SeverityConfig {
    fn default() -> Self {
        let policy = SeverityPolicy::default();
        Self {
            create: policy.create,
            update: policy.update,
            delete: policy.delete,
            replace: policy.replace,
            unknown: policy.unknown,
            still_drifted: policy.still_drifted,
            min_alert: AlertPolicy::default().min_severity(),
        }
    }
}

impl Config {
    /// Load and validate `path`. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML without validating.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::invalid("concurrency", "must be greater than 0"));
        }
        if self.environments.is_empty() {
            return Err(ConfigError::invalid(
                "environments",
                "at least one environment is required",
            ));
        }
        for (i, target) in self.targets.iter().enumerate() {
            if !self.environments.contains(&target.environment) {
                return Err(ConfigError::invalid(
                    format!("targets[{i}].environment"),
                    format!(
                        "{} is not one of the configured environments",
                        target.environment
                    ),
                ));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be greater than 0"));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::invalid("retry.multiplier", "must be at least 1.0"));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::invalid(
                "retry.initial_backoff_ms",
                "must not exceed retry.max_backoff_ms",
            ));
        }
        if self.planner.kind == PlannerKind::Command && self.planner.command.is_empty() {
            return Err(ConfigError::invalid(
                "planner.command",
                "required when planner.kind = \"command\"",
            ));
        }
        if self.planner.timeout_secs == 0 {
            return Err(ConfigError::invalid("planner.timeout_secs", "must be greater than 0"));
        }
        if self.notify.kind == NotifyKind::Webhook && self.notify.webhook_url.is_none() {
            return Err(ConfigError::invalid(
                "notify.webhook_url",
                "required when notify.kind = \"webhook\"",
            ));
        }
        if self.notify.timeout_secs == 0 {
            return Err(ConfigError::invalid("notify.timeout_secs", "must be greater than 0"));
        }
        Ok(())
    }

    /// Check that `environment` is one of the configured environments.
    pub fn check_environment(&self, environment: &Environment) -> Result<(), ConfigError> {
        if self.environments.contains(environment) {
            Ok(())
        } else {
            Err(ConfigError::invalid(
                "environment",
                format!(
                    "{environment} is not one of: {}",
                    self.environments
                        .iter()
                        .map(Environment::as_str)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            ))
        }
    }

    fn base_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            multiplier: self.retry.multiplier,
            timeout: None,
        }
    }

    /// Fetch and notify carry their configured per-attempt timeouts; store
    /// calls rely on the backend's own timeouts.
    pub fn retry_policies(&self) -> RetryPolicies {
        let base = self.base_retry();
        RetryPolicies {
            fetch: base
                .clone()
                .with_timeout(Duration::from_secs(self.planner.timeout_secs)),
            persist: base.clone(),
            notify: base.with_timeout(Duration::from_secs(self.notify.timeout_secs)),
        }
    }

    pub fn severity_policy(&self) -> SeverityPolicy {
        SeverityPolicy {
            create: self.severity.create,
            update: self.severity.update,
            delete: self.severity.delete,
            replace: self.severity.replace,
            unknown: self.severity.unknown,
            still_drifted: self.severity.still_drifted,
        }
    }

    pub fn classifier(&self) -> Classifier {
        Classifier::new(self.severity_policy())
    }

    pub fn alert_policy(&self) -> AlertPolicy {
        AlertPolicy::new(self.severity.min_alert)
    }
}
