//! driftwatch-core: drift detection engine
//!
//! ## Layer 2 - Engine
//!
//! - `ingest`: planner output -> `ChangeDocument`, one normalizer per cloud
//! - `classify`: `ChangeDocument` + baseline -> `DriftReport`
//! - `policy`: transition-based alert decision
//! - `orchestrator`: fetch -> ingest -> classify -> persist -> evaluate -> notify,
//!   with retries, per-target isolation and bounded concurrency
//! - `reporting`, `config`, `obs`, `telemetry`: ambient plumbing for the binary

pub mod cancel;
pub mod classify;
pub mod config;
mod error;
pub mod ingest;
pub mod obs;
pub mod orchestrator;
pub mod policy;
pub mod reporting;
pub mod retry;
pub mod telemetry;

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use classify::{classify, Classifier, SeverityPolicy, StillDriftedRule};
pub use config::{Config, ConfigError};
pub use error::{DriftError, Result};
pub use ingest::{ingest, NormalizerRegistry, PlanNormalizer, RawPlan, TerraformNormalizer};
pub use orchestrator::{
    BatchSummary, FailureReason, Notifier, NotifyError, Orchestrator, PlannerClient,
    PlannerError, RetryPolicies, RunOutcome, RunPhase, RunRequest,
};
pub use policy::{should_alert, summarize, AlertDecision, AlertPolicy, AlertReason};
pub use reporting::{render_status_table, render_text_report, write_report, WrittenReport};
pub use retry::{Retried, RetryError, RetryPolicy, Transient};
