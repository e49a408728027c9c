//! driftwatch - infrastructure drift detection CLI
//!
//! ## Commands
//!
//! - `run`: detect drift for one target or every configured target
//! - `history`: list stored reports for a target
//! - `show`: print one stored report
//! - `check-config`: validate `driftwatch.toml` and print the resolved setup

mod notifier;
mod planner;
mod store;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use driftwatch_core::config::{Config, DEFAULT_CONFIG_FILE};
use driftwatch_core::{
    cancel_pair, render_status_table, render_text_report, write_report, BatchSummary,
    Orchestrator, RunRequest,
};
use driftwatch_model::{Cloud, Environment, RunId, TargetKey};
use driftwatch_state::HistoryStore;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "driftwatch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Infrastructure drift detection and reporting", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "DRIFTWATCH_CONFIG",
        default_value = DEFAULT_CONFIG_FILE
    )]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run drift detection
    Run {
        /// Cloud provider (aws, gcp, ...)
        #[arg(long)]
        cloud: Option<String>,

        /// Environment name
        #[arg(long = "env")]
        environment: Option<String>,

        /// Compare against this stored run instead of the latest
        #[arg(long)]
        baseline: Option<String>,

        /// Run every target listed in the configuration
        #[arg(long, conflicts_with_all = ["cloud", "environment", "baseline"])]
        all: bool,

        /// Print reports as JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// List stored drift reports, most recent first
    History {
        #[arg(long)]
        cloud: String,

        #[arg(long = "env")]
        environment: String,

        /// Maximum number of reports to show
        #[arg(short, long, default_value = "10")]
        limit: usize,

        #[arg(long)]
        json: bool,
    },

    /// Show one stored report (the latest if no run id is given)
    Show {
        #[arg(long)]
        cloud: String,

        #[arg(long = "env")]
        environment: String,

        /// Run id to show
        run_id: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Validate the configuration file
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    driftwatch_core::telemetry::init_tracing(cli.json_logs, level);

    let config = Config::load(&cli.config)
        .with_context(|| format!("load configuration from {}", cli.config.display()))?;

    match cli.command {
        Commands::Run {
            cloud,
            environment,
            baseline,
            all,
            json,
        } => {
            let requests = run_requests(&config, cloud, environment, baseline, all)?;
            cmd_run(&config, requests, json).await
        }
        Commands::History {
            cloud,
            environment,
            limit,
            json,
        } => {
            let target = parse_target(&config, &cloud, &environment)?;
            cmd_history(&config, &target, limit, json).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Show {
            cloud,
            environment,
            run_id,
            json,
        } => {
            let target = parse_target(&config, &cloud, &environment)?;
            cmd_show(&config, &target, run_id.as_deref(), json).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::CheckConfig => {
            cmd_check_config(&cli.config, &config);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn parse_target(config: &Config, cloud: &str, environment: &str) -> Result<TargetKey> {
    let cloud: Cloud = cloud.parse().context("invalid --cloud")?;
    let environment: Environment = environment.parse().context("invalid --env")?;
    config.check_environment(&environment)?;
    Ok(TargetKey::new(cloud, environment))
}

fn run_requests(
    config: &Config,
    cloud: Option<String>,
    environment: Option<String>,
    baseline: Option<String>,
    all: bool,
) -> Result<Vec<RunRequest>> {
    match (cloud, environment) {
        (Some(cloud), Some(environment)) => {
            let mut request = RunRequest::new(parse_target(config, &cloud, &environment)?);
            if let Some(baseline) = baseline {
                let run_id: RunId = baseline.parse().context("invalid --baseline run id")?;
                request = request.with_baseline(run_id);
            }
            Ok(vec![request])
        }
        (None, None) if all || baseline.is_none() => {
            if config.targets.is_empty() {
                bail!("no targets configured; pass --cloud and --env or add [[targets]]");
            }
            Ok(config
                .targets
                .iter()
                .cloned()
                .map(RunRequest::new)
                .collect())
        }
        (None, None) => bail!("--baseline needs --cloud and --env"),
        _ => bail!("--cloud and --env must be given together"),
    }
}

async fn cmd_run(config: &Config, requests: Vec<RunRequest>, json: bool) -> Result<ExitCode> {
    let store = store::open_store(&config.store).await?;
    let planner = planner::build_planner(&config.planner);
    let notifier = notifier::build_notifier(&config.notify)?;

    let orchestrator = Orchestrator::new(planner, notifier, store)
        .with_classifier(config.classifier())
        .with_alert_policy(config.alert_policy())
        .with_retries(config.retry_policies())
        .with_concurrency(config.concurrency);

    let (handle, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling pending runs");
            handle.cancel();
        }
    });

    info!(targets = requests.len(), "starting drift detection");
    let summary = orchestrator.run_all(requests, &signal).await;

    print_reports(config, &summary, json)?;
    print!("{}", render_status_table(&summary));
    Ok(ExitCode::from(summary.exit_code() as u8))
}

fn print_reports(config: &Config, summary: &BatchSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&summary.outcomes)?);
    }
    for outcome in &summary.outcomes {
        let Some(report) = &outcome.report else {
            continue;
        };
        if !json {
            println!("{}", render_text_report(report, outcome.decision.as_ref()));
        }
        if let Some(dir) = &config.reports_dir {
            match write_report(dir, report, outcome.decision.as_ref()) {
                Ok(written) => info!(path = %written.text.display(), "report written"),
                Err(err) => warn!(error = %err, "failed to write report file"),
            }
        }
    }
    Ok(())
}

async fn cmd_history(config: &Config, target: &TargetKey, limit: usize, json: bool) -> Result<()> {
    let store = store::open_store(&config.store).await?;
    let reports = store
        .history(target, limit)
        .await
        .with_context(|| format!("read history for {target}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }
    if reports.is_empty() {
        println!("No runs recorded for {target}");
        return Ok(());
    }
    println!(
        "{:<36}  {:<20}  {:<8}  {:>3}  {:>5}  {:>8}  BASELINE",
        "RUN ID", "CREATED", "SEVERITY", "NEW", "STILL", "RESOLVED"
    );
    for report in &reports {
        let counts = report.counts();
        println!(
            "{:<36}  {:<20}  {:<8}  {:>3}  {:>5}  {:>8}  {}",
            report.run_id,
            report.created_at.format("%Y-%m-%d %H:%M:%S"),
            report.severity,
            counts.newly_drifted,
            counts.still_drifted,
            counts.resolved,
            report
                .baseline_run_id
                .as_ref()
                .map_or("-", |id| id.short())
        );
    }
    Ok(())
}

async fn cmd_show(
    config: &Config,
    target: &TargetKey,
    run_id: Option<&str>,
    json: bool,
) -> Result<()> {
    let store = store::open_store(&config.store).await?;
    let report = match run_id {
        Some(raw) => {
            let run_id: RunId = raw.parse().context("invalid run id")?;
            store
                .get(target, &run_id)
                .await
                .with_context(|| format!("load run {run_id} for {target}"))?
                .report
        }
        None => match store.latest(target).await? {
            Some(report) => report,
            None => bail!("no runs recorded for {target}"),
        },
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_text_report(&report, None));
    }
    Ok(())
}

fn cmd_check_config(path: &Path, config: &Config) {
    let source = if path.exists() {
        path.display().to_string()
    } else {
        format!("{} (not found, using defaults)", path.display())
    };
    println!("Configuration: {source}");
    println!("Concurrency:   {}", config.concurrency);
    println!(
        "Environments:  {}",
        config
            .environments
            .iter()
            .map(Environment::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("Store:         {:?} at {}", config.store.backend, config.store.path.display());
    println!("Planner:       {:?}", config.planner.kind);
    println!("Notify:        {:?}", config.notify.kind);
    println!("Min alert:     {}", config.severity.min_alert);
    if config.targets.is_empty() {
        println!("Targets:       (none)");
    } else {
        println!("Targets:");
        for target in &config.targets {
            println!("  - {target}");
        }
    }
    println!("OK");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_targets() -> Config {
        Config::parse(
            r#"
environments = ["staging", "prod"]
[[targets]]
cloud = "aws"
environment = "prod"
[[targets]]
cloud = "gcp"
environment = "staging"
"#,
        )
        .unwrap()
    }

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "driftwatch",
            "--config",
            "custom.toml",
            "run",
            "--cloud",
            "aws",
            "--env",
            "prod",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        assert!(matches!(
            cli.command,
            Commands::Run { cloud: Some(_), environment: Some(_), all: false, .. }
        ));
    }

    #[test]
    fn all_conflicts_with_single_target() {
        assert!(Cli::try_parse_from(["driftwatch", "run", "--all", "--cloud", "aws"]).is_err());
    }

    #[test]
    fn configured_targets_are_used_without_flags() {
        let config = config_with_targets();
        let requests = run_requests(&config, None, None, None, false).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].target.to_string(), "gcp/staging");
    }

    #[test]
    fn single_target_must_be_complete_and_known() {
        let config = config_with_targets();
        assert!(run_requests(&config, Some("aws".into()), None, None, false).is_err());
        assert!(run_requests(&config, Some("aws".into()), Some("qa".into()), None, false).is_err());

        let run_id = RunId::generate();
        let requests = run_requests(
            &config,
            Some("aws".into()),
            Some("prod".into()),
            Some(run_id.to_string()),
            false,
        )
        .unwrap();
        assert_eq!(requests[0].baseline_override, Some(run_id));
    }

    #[test]
    fn baseline_without_target_is_rejected() {
        let config = config_with_targets();
        assert!(run_requests(&config, None, None, Some("x".into()), false).is_err());
        assert!(run_requests(&Config::default(), None, None, None, true).is_err());
    }
}
