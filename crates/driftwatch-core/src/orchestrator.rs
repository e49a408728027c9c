//! Run orchestration: one detection run per (cloud, environment) target.
//!
//! ```text
//! Fetching -> Ingesting -> Classifying -> Persisting -> Evaluating -> Notifying -> Done
//!     \__________\_____________\_____________\______________________________> Failed(reason)
//! ```
//!
//! Collaborator calls (planner, store, notifier) are wrapped in a
//! [`RetryPolicy`]; ingestion and classification are pure and never retried.
//! Runs for different targets proceed concurrently under a semaphore; runs for
//! the same target are serialized by a per-key lock taken before fetching and
//! held through the append, so appends follow initiation order and run N+1
//! always classifies against run N.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use driftwatch_model::{ChangeDocument, DriftReport, RunId, TargetKey};
use driftwatch_state::{HistoryStore, StorageError};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use crate::cancel::CancelSignal;
use crate::classify::Classifier;
use crate::error::DriftError;
use crate::ingest::{NormalizerRegistry, RawPlan};
use crate::obs;
use crate::policy::{AlertDecision, AlertPolicy};
use crate::retry::{RetryError, RetryPolicy, Transient};

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Errors from the planner collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlannerError {
    #[error("planner unavailable: {0}")]
    Unavailable(String),
    #[error("planner rate limited: {0}")]
    RateLimited(String),
    #[error("planner timed out: {0}")]
    Timeout(String),
    #[error("planner rejected the request: {0}")]
    Rejected(String),
}

impl Transient for PlannerError {
    fn is_transient(&self) -> bool {
        !matches!(self, PlannerError::Rejected(_))
    }
}

/// Errors from the notification collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("notifier unavailable: {0}")]
    Unavailable(String),
    #[error("notifier rate limited: {0}")]
    RateLimited(String),
    #[error("notification timed out: {0}")]
    Timeout(String),
    #[error("notification rejected: {0}")]
    Rejected(String),
}

impl Transient for NotifyError {
    fn is_transient(&self) -> bool {
        !matches!(self, NotifyError::Rejected(_))
    }
}

/// Produces the raw planner output for a target.
#[async_trait]
pub trait PlannerClient: Send + Sync {
    async fn fetch_change_document(&self, target: &TargetKey) -> Result<RawPlan, PlannerError>;
}

/// Delivers alert decisions. Only called when `decision.notify` is set.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, decision: &AlertDecision) -> Result<(), NotifyError>;
}

// ---------------------------------------------------------------------------
// Run state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    PlannerUnavailable,
    PlannerRejected,
    MalformedDocument,
    DuplicateResource,
    InvariantViolation,
    BaselineNotFound,
    StoreUnavailable,
    Cancelled,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::PlannerUnavailable => "planner_unavailable",
            FailureReason::PlannerRejected => "planner_rejected",
            FailureReason::MalformedDocument => "malformed_document",
            FailureReason::DuplicateResource => "duplicate_resource",
            FailureReason::InvariantViolation => "invariant_violation",
            FailureReason::BaselineNotFound => "baseline_not_found",
            FailureReason::StoreUnavailable => "store_unavailable",
            FailureReason::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&DriftError> for FailureReason {
    fn from(err: &DriftError) -> Self {
        match err {
            DriftError::MalformedDocument { .. } => FailureReason::MalformedDocument,
            DriftError::DuplicateResource { .. } => FailureReason::DuplicateResource,
            DriftError::InvariantViolation { .. } => FailureReason::InvariantViolation,
            DriftError::Storage(_) => FailureReason::StoreUnavailable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Fetching,
    Ingesting,
    Classifying,
    Persisting,
    Evaluating,
    Notifying,
    Done,
    Failed(FailureReason),
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Failed(_))
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Fetching => f.write_str("fetching"),
            RunPhase::Ingesting => f.write_str("ingesting"),
            RunPhase::Classifying => f.write_str("classifying"),
            RunPhase::Persisting => f.write_str("persisting"),
            RunPhase::Evaluating => f.write_str("evaluating"),
            RunPhase::Notifying => f.write_str("notifying"),
            RunPhase::Done => f.write_str("done"),
            RunPhase::Failed(reason) => write!(f, "failed({reason})"),
        }
    }
}

/// One request to run detection for a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub target: TargetKey,
    /// Classify against this stored run instead of the latest one.
    pub baseline_override: Option<RunId>,
}

impl RunRequest {
    pub fn new(target: TargetKey) -> Self {
        Self {
            target,
            baseline_override: None,
        }
    }

    pub fn with_baseline(mut self, run_id: RunId) -> Self {
        self.baseline_override = Some(run_id);
        self
    }
}

/// Result of one run, successful or not.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub target: TargetKey,
    /// Assigned when classification succeeds.
    pub run_id: Option<RunId>,
    pub phase: RunPhase,
    /// Every phase entered, in order, ending with the terminal phase.
    pub transitions: Vec<RunPhase>,
    pub report: Option<DriftReport>,
    pub decision: Option<AlertDecision>,
    /// Notification failure. The report is persisted regardless.
    pub notify_warning: Option<String>,
    /// Diagnostic for a failed run.
    pub detail: Option<String>,
}

impl RunOutcome {
    fn new(target: TargetKey) -> Self {
        Self {
            target,
            run_id: None,
            phase: RunPhase::Fetching,
            transitions: Vec::new(),
            report: None,
            decision: None,
            notify_warning: None,
            detail: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.phase == RunPhase::Done
    }

    pub fn failure(&self) -> Option<FailureReason> {
        match self.phase {
            RunPhase::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    fn enter(&mut self, phase: RunPhase) {
        self.phase = phase;
        self.transitions.push(phase);
        obs::emit_run_phase(&self.target, phase);
    }

    fn fail(mut self, reason: FailureReason, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        warn!(target = %self.target, reason = %reason, detail = %detail, "run failed");
        self.detail = Some(detail);
        self.enter(RunPhase::Failed(reason));
        self
    }
}

/// Outcomes of a batch, in request order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub outcomes: Vec<RunOutcome>,
}

impl BatchSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Some targets succeeded and some failed.
    pub fn is_partial(&self) -> bool {
        self.succeeded() > 0 && self.failed() > 0
    }

    /// `0` when at least one target completed, `1` otherwise. Drift itself
    /// never affects the exit code.
    pub fn exit_code(&self) -> i32 {
        if self.succeeded() > 0 {
            0
        } else {
            1
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Retry policies for each kind of collaborator call.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicies {
    pub fetch: RetryPolicy,
    pub persist: RetryPolicy,
    pub notify: RetryPolicy,
}

type KeyLocks = Arc<Mutex<HashMap<TargetKey, Arc<Mutex<()>>>>>;

/// Coordinates detection runs. Cheap to clone; clones share the per-key locks.
#[derive(Clone)]
pub struct Orchestrator {
    planner: Arc<dyn PlannerClient>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn HistoryStore>,
    registry: NormalizerRegistry,
    classifier: Classifier,
    alert_policy: AlertPolicy,
    retries: RetryPolicies,
    concurrency: usize,
    key_locks: KeyLocks,
}

impl Orchestrator {
    pub fn new(
        planner: Arc<dyn PlannerClient>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            planner,
            notifier,
            store,
            registry: NormalizerRegistry::default(),
            classifier: Classifier::default(),
            alert_policy: AlertPolicy::default(),
            retries: RetryPolicies::default(),
            concurrency: 4,
            key_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_registry(mut self, registry: NormalizerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_alert_policy(mut self, policy: AlertPolicy) -> Self {
        self.alert_policy = policy;
        self
    }

    pub fn with_retries(mut self, retries: RetryPolicies) -> Self {
        self.retries = retries;
        self
    }

    /// Maximum number of targets processed at once (at least 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn HistoryStore> {
        &self.store
    }

    async fn key_lock(&self, target: &TargetKey) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        Arc::clone(locks.entry(target.clone()).or_default())
    }

    /// Run detection for one target.
    pub async fn run_one(&self, request: RunRequest, cancel: &CancelSignal) -> RunOutcome {
        let span = obs::RunSpan::new(&request.target);
        let started = Instant::now();
        let outcome = span.instrument(self.drive(request, cancel, &span)).await;
        obs::emit_run_finished(
            &outcome.target,
            outcome.run_id.as_ref(),
            outcome.phase,
            outcome.report.as_ref().map(|r| r.severity),
            started.elapsed().as_millis() as u64,
        );
        outcome
    }

    async fn drive(
        &self,
        request: RunRequest,
        cancel: &CancelSignal,
        span: &obs::RunSpan,
    ) -> RunOutcome {
        let target = request.target.clone();
        let mut outcome = RunOutcome::new(target.clone());
        obs::emit_run_started(&target);

        // Taken before the first await on a collaborator. The per-key mutex is
        // FIFO, so same-target runs proceed in the order they were started.
        let key_lock = self.key_lock(&target).await;
        let key_guard = key_lock.lock().await;

        // Fetching
        if cancel.is_cancelled() {
            return outcome.fail(FailureReason::Cancelled, "cancelled before fetching");
        }
        outcome.enter(RunPhase::Fetching);
        let planner = Arc::clone(&self.planner);
        let fetched = self
            .retries
            .fetch
            .run("fetch_change_document", cancel, || {
                let planner = Arc::clone(&planner);
                let target = target.clone();
                async move { planner.fetch_change_document(&target).await }
            })
            .await;
        let raw = match fetched {
            Ok(retried) => retried.value,
            Err(RetryError::Cancelled { .. }) => {
                return outcome.fail(FailureReason::Cancelled, "cancelled while fetching")
            }
            Err(err @ RetryError::Permanent { .. }) => {
                return outcome.fail(FailureReason::PlannerRejected, err.to_string())
            }
            Err(err @ RetryError::Exhausted { .. }) => {
                return outcome.fail(FailureReason::PlannerUnavailable, err.to_string())
            }
        };

        // Ingesting
        if cancel.is_cancelled() {
            return outcome.fail(FailureReason::Cancelled, "cancelled before ingesting");
        }
        outcome.enter(RunPhase::Ingesting);
        let doc = match self.registry.ingest(
            &raw,
            target.cloud.clone(),
            target.environment.clone(),
        ) {
            Ok(doc) => doc,
            Err(err) => return outcome.fail(FailureReason::from(&err), err.to_string()),
        };

        // Classifying
        if cancel.is_cancelled() {
            return outcome.fail(FailureReason::Cancelled, "cancelled before classifying");
        }
        outcome.enter(RunPhase::Classifying);
        let baseline = match self
            .read_baseline(&target, request.baseline_override.as_ref(), cancel)
            .await
        {
            Ok(baseline) => baseline,
            Err((reason, detail)) => return outcome.fail(reason, detail),
        };
        let report = match self.classifier.classify(&doc, baseline.as_ref()) {
            Ok(report) => report,
            Err(err) => return outcome.fail(FailureReason::from(&err), err.to_string()),
        };
        span.record_run_id(&report.run_id);
        outcome.run_id = Some(report.run_id.clone());
        debug!(
            target = %target,
            run_id = %report.run_id,
            severity = %report.severity,
            verdicts = report.resource_verdicts.len(),
            "classified"
        );

        // Persisting. Not cancellable once started.
        if cancel.is_cancelled() {
            return outcome.fail(FailureReason::Cancelled, "cancelled before persisting");
        }
        outcome.enter(RunPhase::Persisting);
        if let Err((reason, detail)) = self.persist(&report, &doc).await {
            return outcome.fail(reason, detail);
        }
        drop(key_guard);
        outcome.report = Some(report.clone());

        // Evaluating. From here on the run always completes; notification
        // failures become warnings.
        outcome.enter(RunPhase::Evaluating);
        let decision = self.alert_policy.evaluate(&report, baseline.as_ref());
        obs::emit_alert_decided(&decision);

        if decision.notify {
            outcome.enter(RunPhase::Notifying);
            let notifier = Arc::clone(&self.notifier);
            let sent = self
                .retries
                .notify
                .run("notify", cancel, || {
                    let notifier = Arc::clone(&notifier);
                    let decision = decision.clone();
                    async move { notifier.send(&decision).await }
                })
                .await;
            if let Err(err) = sent {
                obs::emit_notify_failed(&target, &report.run_id, &err);
                outcome.notify_warning = Some(err.to_string());
            }
        }
        outcome.decision = Some(decision);
        outcome.enter(RunPhase::Done);
        outcome
    }

    async fn read_baseline(
        &self,
        target: &TargetKey,
        override_id: Option<&RunId>,
        cancel: &CancelSignal,
    ) -> Result<Option<DriftReport>, (FailureReason, String)> {
        let store = Arc::clone(&self.store);
        let result = match override_id {
            Some(run_id) => self
                .retries
                .persist
                .run("read_baseline", cancel, || {
                    let store = Arc::clone(&store);
                    let target = target.clone();
                    let run_id = run_id.clone();
                    async move { store.get(&target, &run_id).await.map(|e| Some(e.report)) }
                })
                .await,
            None => self
                .retries
                .persist
                .run("read_latest", cancel, || {
                    let store = Arc::clone(&store);
                    let target = target.clone();
                    async move { store.latest(&target).await }
                })
                .await,
        };
        match result {
            Ok(retried) => Ok(retried.value),
            Err(RetryError::Cancelled { .. }) => Err((
                FailureReason::Cancelled,
                "cancelled while reading baseline".to_string(),
            )),
            Err(RetryError::Permanent {
                error: StorageError::NotFound { run_id, .. },
                ..
            }) => Err((
                FailureReason::BaselineNotFound,
                format!("baseline run {run_id} not found for {target}"),
            )),
            Err(err) => Err((FailureReason::StoreUnavailable, err.to_string())),
        }
    }

    /// Append with retries. Runs to completion regardless of cancellation.
    async fn persist(
        &self,
        report: &DriftReport,
        doc: &ChangeDocument,
    ) -> Result<(), (FailureReason, String)> {
        let store = Arc::clone(&self.store);
        let result = self
            .retries
            .persist
            .run("append", &CancelSignal::never(), || {
                let store = Arc::clone(&store);
                let report = report.clone();
                let doc = doc.clone();
                async move { store.append(&report, &doc).await }
            })
            .await;

        let err = match result {
            Ok(_) => return Ok(()),
            Err(err) => err,
        };
        // A retried append may have landed before its error surfaced.
        if let RetryError::Permanent {
            error: StorageError::OutOfOrder { .. },
            attempts,
            ..
        } = &err
        {
            if *attempts > 1 && self.already_stored(report).await {
                return Ok(());
            }
        }
        match err {
            RetryError::Permanent {
                error: StorageError::Mismatch(_) | StorageError::OutOfOrder { .. },
                ..
            } => Err((FailureReason::InvariantViolation, err.to_string())),
            _ => Err((FailureReason::StoreUnavailable, err.to_string())),
        }
    }

    async fn already_stored(&self, report: &DriftReport) -> bool {
        matches!(
            self.store.get(&report.target(), &report.run_id).await,
            Ok(entry) if entry.report == *report
        )
    }

    /// Run a batch of requests. Requests for the same target run one after
    /// another in request order; different targets run concurrently, bounded
    /// by the configured concurrency. One target's failure never affects
    /// another's.
    pub async fn run_all(&self, requests: Vec<RunRequest>, cancel: &CancelSignal) -> BatchSummary {
        let total = requests.len();
        let mut groups: BTreeMap<TargetKey, Vec<(usize, RunRequest)>> = BTreeMap::new();
        for (index, request) in requests.into_iter().enumerate() {
            groups
                .entry(request.target.clone())
                .or_default()
                .push((index, request));
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = Vec::with_capacity(groups.len());
        for (target, group) in groups {
            let this = self.clone();
            let cancel = cancel.clone();
            let semaphore = Arc::clone(&semaphore);
            let indices: Vec<usize> = group.iter().map(|(i, _)| *i).collect();
            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let mut outcomes = Vec::with_capacity(group.len());
                for (index, request) in group {
                    outcomes.push((index, this.run_one(request, &cancel).await));
                }
                outcomes
            });
            tasks.push((target, indices, handle));
        }

        let mut slots: Vec<Option<RunOutcome>> = vec![None; total];
        let joined = futures::future::join_all(tasks.into_iter().map(
            |(target, indices, handle)| async move { (target, indices, handle.await) },
        ))
        .await;
        for (target, indices, joined) in joined {
            match joined {
                Ok(outcomes) => {
                    for (index, outcome) in outcomes {
                        slots[index] = Some(outcome);
                    }
                }
                Err(err) => {
                    warn!(target = %target, error = %err, "run task aborted");
                    for index in indices {
                        slots[index] = Some(RunOutcome::new(target.clone()).fail(
                            FailureReason::InvariantViolation,
                            format!("run task aborted: {err}"),
                        ));
                    }
                }
            }
        }

        BatchSummary {
            outcomes: slots.into_iter().flatten().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_display() {
        assert_eq!(RunPhase::Persisting.to_string(), "persisting");
        assert_eq!(
            RunPhase::Failed(FailureReason::StoreUnavailable).to_string(),
            "failed(store_unavailable)"
        );
        assert!(RunPhase::Done.is_terminal());
        assert!(!RunPhase::Notifying.is_terminal());
    }

    #[test]
    fn collaborator_errors_classify_transience() {
        assert!(PlannerError::Timeout("600s".into()).is_transient());
        assert!(PlannerError::RateLimited("429".into()).is_transient());
        assert!(!PlannerError::Rejected("bad credentials".into()).is_transient());
        assert!(NotifyError::Unavailable("503".into()).is_transient());
        assert!(!NotifyError::Rejected("400".into()).is_transient());
    }

    #[test]
    fn batch_exit_code_policy() {
        let target = TargetKey::parse("aws", "prod").unwrap();
        let ok = RunOutcome {
            phase: RunPhase::Done,
            ..RunOutcome::new(target.clone())
        };
        let failed = RunOutcome::new(target).fail(FailureReason::PlannerUnavailable, "down");

        let partial = BatchSummary {
            outcomes: vec![ok.clone(), failed.clone()],
        };
        assert!(partial.is_partial());
        assert_eq!(partial.exit_code(), 0);

        let all_failed = BatchSummary {
            outcomes: vec![failed],
        };
        assert_eq!(all_failed.exit_code(), 1);
        assert_eq!(BatchSummary::default().exit_code(), 1);
    }
}
