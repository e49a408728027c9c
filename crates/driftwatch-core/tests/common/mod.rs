//! Shared fixtures for driftwatch-core integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use driftwatch_core::{
    AlertDecision, Notifier, NotifyError, PlannerClient, PlannerError, RawPlan, RetryPolicies,
    RetryPolicy,
};
use driftwatch_model::TargetKey;
use serde_json::{json, Value};

pub fn target(cloud: &str, env: &str) -> TargetKey {
    TargetKey::parse(cloud, env).unwrap()
}

/// One terraform `resource_changes` entry for `address` with the given
/// terraform action list.
pub fn tf_change(address: &str, actions: &[&str]) -> Value {
    let resource_type = address.split('.').next().unwrap_or(address);
    let (before, after) = match actions {
        ["create"] => (Value::Null, json!({"size": 2})),
        ["delete"] => (json!({"size": 1}), Value::Null),
        ["no-op"] | ["read"] => (json!({"size": 1}), json!({"size": 1})),
        _ => (json!({"size": 1}), json!({"size": 2})),
    };
    let mut change = json!({
        "actions": actions,
        "before": before,
        "after": after,
    });
    if actions.len() == 2 {
        change["replace_paths"] = json!([["size"]]);
    }
    json!({
        "address": address,
        "type": resource_type,
        "change": change,
    })
}

/// A terraform JSON plan with the given `(address, actions)` entries.
pub fn tf_plan(changes: &[(&str, &[&str])]) -> RawPlan {
    let entries: Vec<Value> = changes
        .iter()
        .map(|(address, actions)| tf_change(address, actions))
        .collect();
    RawPlan::Structured(json!({
        "format_version": "1.2",
        "terraform_version": "1.7.5",
        "resource_changes": entries,
    }))
}

/// Short backoffs so paused-time tests stay readable.
pub fn fast_retries() -> RetryPolicies {
    let base = RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(100),
        max_backoff: Duration::from_secs(1),
        multiplier: 2.0,
        timeout: None,
    };
    RetryPolicies {
        fetch: base.clone().with_timeout(Duration::from_secs(5)),
        persist: base.clone(),
        notify: base.with_timeout(Duration::from_secs(5)),
    }
}

type Scripted = (Option<Duration>, Result<RawPlan, PlannerError>);

/// Planner returning scripted responses per target, in call order.
/// An exhausted script is a permanent rejection.
#[derive(Default)]
pub struct ScriptedPlanner {
    script: Mutex<HashMap<TargetKey, VecDeque<Scripted>>>,
    calls: AtomicU32,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch sleeps for `delay` before answering.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn push(&self, target: &TargetKey, response: Result<RawPlan, PlannerError>) -> &Self {
        self.enqueue(target, None, response)
    }

    /// Like `push`, but the call answering with `response` takes `delay`.
    pub fn push_delayed(
        &self,
        target: &TargetKey,
        delay: Duration,
        response: Result<RawPlan, PlannerError>,
    ) -> &Self {
        self.enqueue(target, Some(delay), response)
    }

    fn enqueue(
        &self,
        target: &TargetKey,
        delay: Option<Duration>,
        response: Result<RawPlan, PlannerError>,
    ) -> &Self {
        self.script
            .lock()
            .unwrap()
            .entry(target.clone())
            .or_default()
            .push_back((delay, response));
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlannerClient for ScriptedPlanner {
    async fn fetch_change_document(&self, target: &TargetKey) -> Result<RawPlan, PlannerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap()
            .get_mut(target)
            .and_then(VecDeque::pop_front);
        let (entry_delay, response) = next.unwrap_or_else(|| {
            (
                None,
                Err(PlannerError::Rejected(format!("no plan scripted for {target}"))),
            )
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = entry_delay.or(self.delay) {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

/// Planner that never answers.
pub struct HangingPlanner;

#[async_trait]
impl PlannerClient for HangingPlanner {
    async fn fetch_change_document(&self, _target: &TargetKey) -> Result<RawPlan, PlannerError> {
        std::future::pending().await
    }
}

/// Notifier that records deliveries and can fail the first `n` sends.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<AlertDecision>>,
    failures: AtomicU32,
    attempts: AtomicU32,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(n: u32) -> Self {
        let notifier = Self::default();
        notifier.failures.store(n, Ordering::SeqCst);
        notifier
    }

    pub fn sent(&self) -> Vec<AlertDecision> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, decision: &AlertDecision) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(NotifyError::Unavailable("webhook returned 503".to_string()));
        }
        self.sent.lock().unwrap().push(decision.clone());
        Ok(())
    }
}

pub fn planner() -> Arc<ScriptedPlanner> {
    Arc::new(ScriptedPlanner::new())
}

pub fn notifier() -> Arc<RecordingNotifier> {
    Arc::new(RecordingNotifier::new())
}
