//! Planner collaborators: where change documents come from.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use driftwatch_core::config::{PlannerConfig, PlannerKind};
use driftwatch_core::{PlannerClient, PlannerError, RawPlan};
use driftwatch_model::TargetKey;
use tokio::process::Command;
use tracing::debug;

pub fn build_planner(config: &PlannerConfig) -> Arc<dyn PlannerClient> {
    match config.kind {
        PlannerKind::File => Arc::new(FilePlanner::new(config.plans_dir.clone())),
        PlannerKind::Command => Arc::new(CommandPlanner::new(
            config.command.clone(),
            config.working_dir.clone(),
        )),
    }
}

/// Raw planner output: JSON when it looks like JSON, plan text otherwise.
fn raw_plan(output: Vec<u8>) -> RawPlan {
    let looks_like_json = output
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'{');
    if looks_like_json {
        RawPlan::Bytes(output)
    } else {
        RawPlan::Text(String::from_utf8_lossy(&output).into_owned())
    }
}

/// Reads `<plans_dir>/<cloud>/<environment>.json` (or `.txt` for saved
/// human-readable plans) written by an earlier pipeline step.
pub struct FilePlanner {
    plans_dir: PathBuf,
}

impl FilePlanner {
    pub fn new(plans_dir: PathBuf) -> Self {
        Self { plans_dir }
    }

    fn candidates(&self, target: &TargetKey) -> [PathBuf; 2] {
        let dir = self.plans_dir.join(target.cloud.as_str());
        let env = target.environment.as_str();
        [dir.join(format!("{env}.json")), dir.join(format!("{env}.txt"))]
    }
}

#[async_trait]
impl PlannerClient for FilePlanner {
    async fn fetch_change_document(&self, target: &TargetKey) -> Result<RawPlan, PlannerError> {
        for path in self.candidates(target) {
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    debug!(path = %path.display(), bytes = bytes.len(), "read plan file");
                    return Ok(raw_plan(bytes));
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(PlannerError::Unavailable(format!(
                        "read {}: {err}",
                        path.display()
                    )))
                }
            }
        }
        Err(PlannerError::Rejected(format!(
            "no plan file for {target} under {}",
            self.plans_dir.display()
        )))
    }
}

/// Runs the configured planner command once per fetch.
///
/// `{cloud}` and `{environment}` are substituted in every argument and in
/// the working directory. Exit codes 0 and 2 are success (`-detailed-exitcode`
/// reports drift as 2). The child is killed if the fetch times out.
pub struct CommandPlanner {
    command: Vec<String>,
    working_dir: Option<String>,
}

impl CommandPlanner {
    pub fn new(command: Vec<String>, working_dir: Option<String>) -> Self {
        Self {
            command,
            working_dir,
        }
    }
}

fn substitute(template: &str, target: &TargetKey) -> String {
    template
        .replace("{cloud}", target.cloud.as_str())
        .replace("{environment}", target.environment.as_str())
}

/// Map a failed planner exit to a retryable or permanent error.
fn classify_failure(code: Option<i32>, stderr: &str) -> PlannerError {
    let lower = stderr.to_ascii_lowercase();
    let summary = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    let detail = match code {
        Some(code) => format!("planner exited with {code}: {summary}"),
        None => format!("planner killed by signal: {summary}"),
    };
    if lower.contains("rate exceeded")
        || lower.contains("throttling")
        || lower.contains("too many requests")
        || lower.contains("429")
    {
        PlannerError::RateLimited(detail)
    } else if lower.contains("timeout") || lower.contains("timed out") {
        PlannerError::Timeout(detail)
    } else {
        PlannerError::Unavailable(detail)
    }
}

#[async_trait]
impl PlannerClient for CommandPlanner {
    async fn fetch_change_document(&self, target: &TargetKey) -> Result<RawPlan, PlannerError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(PlannerError::Rejected("planner command is empty".to_string()));
        };
        let mut cmd = Command::new(substitute(program, target));
        cmd.args(args.iter().map(|a| substitute(a, target)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(substitute(dir, target));
        }

        let child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                PlannerError::Rejected(format!("cannot start {program}: {e}"))
            }
            _ => PlannerError::Unavailable(format!("cannot start {program}: {e}")),
        })?;
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| PlannerError::Unavailable(format!("waiting for {program}: {e}")))?;

        match output.status.code() {
            Some(0) | Some(2) => {
                debug!(program = %program, target = %target, "planner finished");
                Ok(raw_plan(output.stdout))
            }
            code => Err(classify_failure(
                code,
                &String::from_utf8_lossy(&output.stderr),
            )),
        }
    }
}
