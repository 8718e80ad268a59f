//! Command implementations and dispatch.
//!
//! Every handler takes the working directory explicitly so the whole surface
//! can be driven from tests against temporary project trees.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::FutureExt;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{info, warn};

use sdp_ci::{
    checkpoint_now, AutoFixer, CiLoop, CiLoopConfig, FixerRegistry, GhChecks, GhFailureLog,
    LoopOutcome, LoopStateStore,
};
use sdp_core::dispatch::clean_orphan_tmp;
use sdp_core::{
    advisor, config, evidence, validate_feature_id, Dispatcher, DispatcherConfig,
    WorkstreamGraph,
};

use crate::args::{Cli, Commands, EvidenceCommands};

/// Map a loop outcome to the process exit code contract.
pub fn outcome_exit_code(outcome: LoopOutcome) -> i32 {
    match outcome {
        LoopOutcome::Green => 0,
        LoopOutcome::MaxIter => 2,
        LoopOutcome::Escalated => 3,
    }
}

/// Resolve a command to its exit code, working relative to `cwd`.
pub async fn dispatch_in(cli: Cli, cwd: &Path) -> Result<i32> {
    match cli.command {
        Commands::Init { path } => {
            let target = if path.is_absolute() {
                path
            } else {
                cwd.join(path)
            };
            let config_path = config::init_project(&target)?;
            println!("initialized {}", config_path.display());
            Ok(0)
        }
        Commands::Doctor => run_doctor(cwd),
        Commands::Next => run_next(cwd),
        Commands::Feedback { verdict } => run_feedback(cwd, &verdict),
        Commands::Lesson { ws, report } => run_lesson(cwd, &ws, &report),
        Commands::Run {
            feature,
            plan,
            exec,
            concurrency,
        } => run_dispatch(cwd, feature, plan, exec, concurrency).await,
        Commands::Ci {
            pr,
            feature,
            max_iter,
            max_pending_retries,
            poll_delay,
            retry_delay,
            no_fix,
        } => {
            run_ci_loop(
                cwd,
                pr,
                feature,
                max_iter,
                max_pending_retries,
                poll_delay,
                retry_delay,
                no_fix,
            )
            .await
        }
        Commands::Evidence { command } => run_evidence(cwd, command),
    }
}

fn project_root_from(cwd: &Path) -> Result<PathBuf> {
    config::find_project_root(cwd)
        .with_context(|| format!("no .sdp/config.yml found above {}", cwd.display()))
}

fn log_path(root: &Path) -> Result<PathBuf> {
    let cfg = config::load_config(root)?;
    Ok(cfg.log_path_under(root))
}

/// Assemble the advisor's view of the project. The workstream board comes
/// from external tooling; here we surface the git/config facts.
pub fn gather_state(cwd: &Path) -> advisor::ProjectState {
    advisor::ProjectState {
        git: advisor::GitState {
            is_repo: sdp_core::is_git_repo(cwd),
            has_uncommitted: sdp_core::has_uncommitted_changes(cwd),
        },
        config: advisor::ConfigState {
            has_sdp_config: config::find_project_root(cwd).is_some(),
        },
        ..Default::default()
    }
}

fn run_doctor(cwd: &Path) -> Result<i32> {
    let root = config::find_project_root(cwd).unwrap_or_else(|| cwd.to_path_buf());
    let checks = config::doctor(&root);
    let mut failed = false;
    for check in &checks {
        println!(
            "[{}] {}: {}",
            if check.ok { "ok" } else { "fail" },
            check.name,
            check.detail
        );
        failed |= !check.ok;
    }
    Ok(if failed { 1 } else { 0 })
}

fn run_next(cwd: &Path) -> Result<i32> {
    let recommendation = advisor::recommend(&gather_state(cwd));
    recommendation.validate()?;
    println!(
        "{} ({}, confidence {:.2})",
        recommendation.command,
        recommendation.category.as_str(),
        recommendation.confidence
    );
    println!("  {}", recommendation.reason);
    for alt in &recommendation.alternatives {
        println!("  alt: {} - {}", alt.command, alt.reason);
    }
    // Remember it so `sdp feedback` can attribute the verdict.
    if let Some(root) = config::find_project_root(cwd) {
        sdp_core::dispatch::write_json_atomic(
            &root.join(".sdp/last-recommendation.json"),
            &recommendation,
        )?;
    }
    Ok(0)
}

fn run_feedback(cwd: &Path, verdict: &str) -> Result<i32> {
    let kind = match verdict {
        "accepted" => advisor::FeedbackKind::Accepted,
        "rejected" => advisor::FeedbackKind::Rejected,
        "refined" => advisor::FeedbackKind::Refined,
        other => anyhow::bail!("unknown verdict {other:?} (use accepted, rejected, or refined)"),
    };

    let root = project_root_from(cwd)?;
    let last_path = root.join(".sdp/last-recommendation.json");
    let recommendation: advisor::Recommendation = sdp_core::dispatch::read_json_limited(
        &last_path,
        sdp_core::dispatch::MAX_STATE_FILE_BYTES,
    )
    .context("no recommendation on record; run `sdp next` first")?;

    let metrics_path = root.join(".sdp/advisor-metrics.json");
    let mut metrics = advisor::AdvisorMetrics::load(&metrics_path)?;
    metrics.record(kind, &recommendation);
    metrics.save(&metrics_path)?;

    let report = advisor::QualityGates::default().evaluate(&metrics);
    println!(
        "{} decision(s); acceptance {:.0}%, correction {:.0}%",
        metrics.decisions(),
        metrics.acceptance_rate() * 100.0,
        metrics.correction_rate() * 100.0
    );
    if report.tripped() {
        println!("quality gate tripped: {report:?}");
    }
    Ok(0)
}

fn run_lesson(cwd: &Path, ws_id: &str, report_path: &Path) -> Result<i32> {
    sdp_core::validate_ws_id(ws_id)?;
    let raw = std::fs::read_to_string(report_path)
        .with_context(|| format!("cannot read report {}", report_path.display()))?;
    let report: sdp_core::VerificationReport = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a verification report", report_path.display()))?;

    let lesson = sdp_core::evidence::extract_lesson(ws_id, &report);
    let event = sdp_core::evidence::lesson_event(&lesson, Vec::new());

    let root = project_root_from(cwd)?;
    let emitter = evidence::Emitter::from_project(&root)?;
    emitter.emit_sync(event)?;

    println!("lesson recorded ({}, {})", lesson.outcome, lesson.category);
    Ok(0)
}

#[derive(Deserialize)]
struct PlanEntry {
    id: String,
    #[serde(default)]
    depends_on: Vec<String>,
}

/// Parse a JSON workstream plan into a validated graph.
pub fn load_plan(path: &Path) -> Result<WorkstreamGraph> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read plan {}", path.display()))?;
    let entries: Vec<PlanEntry> = serde_json::from_str(&raw)
        .with_context(|| format!("plan {} is not a JSON array of workstreams", path.display()))?;

    let mut graph = WorkstreamGraph::new();
    for entry in &entries {
        sdp_core::validate_ws_id(&entry.id)?;
        graph.add_node(&entry.id, &entry.depends_on)?;
    }
    Ok(graph)
}

fn cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; shutting down");
            let _ = tx.send(true);
        }
    });
    rx
}

async fn run_dispatch(
    cwd: &Path,
    feature: String,
    plan: PathBuf,
    exec: String,
    concurrency: usize,
) -> Result<i32> {
    validate_feature_id(&feature)?;
    let root = project_root_from(cwd)?;
    let plan = if plan.is_absolute() {
        plan
    } else {
        cwd.join(plan)
    };
    let graph = load_plan(&plan)?;
    let checkpoint_dir = root.join(".sdp/checkpoints");
    clean_orphan_tmp(&checkpoint_dir).ok();

    let dispatcher = Dispatcher::new(
        graph,
        DispatcherConfig::new(&feature)
            .with_concurrency(concurrency)
            .with_checkpoint_dir(&checkpoint_dir)
            .with_cancel(cancel_on_ctrl_c()),
    )?;

    let emitter = evidence::Emitter::from_project(&root)?;
    let template = Arc::new(exec);
    let workdir = Arc::new(root.clone());
    let emitter_cb = emitter.clone();
    let callback: sdp_core::WorkstreamCallback = Arc::new(move |ws_id: String| {
        let template = Arc::clone(&template);
        let workdir = Arc::clone(&workdir);
        let emitter = emitter_cb.clone();
        async move {
            let command = template.replace("{ws}", &ws_id);
            let parts = sdp_ci::split_command(&command);
            let Some((exe, args)) = parts.split_first() else {
                anyhow::bail!("empty exec template");
            };
            let status = tokio::process::Command::new(exe)
                .args(args)
                .current_dir(workdir.as_path())
                .status()
                .await
                .with_context(|| format!("spawning {command:?}"))?;
            let passed = status.success();
            emitter.emit_sync(evidence::Event::new(
                ws_id.clone(),
                evidence::EventBody::Acceptance(evidence::event::AcceptanceData {
                    command,
                    passed,
                    output: status.to_string(),
                    timeout_seconds: 0,
                }),
            ))?;
            if !passed {
                anyhow::bail!("workstream {ws_id} exited with {status}");
            }
            Ok(())
        }
        .boxed()
    });

    let report = dispatcher.execute(callback).await?;
    println!(
        "completed: {}  failed: {}",
        report.completed.len(),
        report.failed.len()
    );
    for (ws_id, error) in &report.failed {
        println!("  {ws_id}: {error}");
    }
    Ok(if report.all_green() { 0 } else { 3 })
}

#[allow(clippy::too_many_arguments)]
async fn run_ci_loop(
    cwd: &Path,
    pr: u64,
    feature: String,
    max_iter: u32,
    max_pending_retries: u32,
    poll_delay: u64,
    retry_delay: u64,
    no_fix: bool,
) -> Result<i32> {
    validate_feature_id(&feature)?;
    let root = project_root_from(cwd)?;
    clean_orphan_tmp(&root.join(".sdp/checkpoints")).ok();

    let store = Arc::new(LoopStateStore::new(&root));
    store.save_checkpoint(&checkpoint_now(&feature, "", Some(pr), "", "ci-loop"))?;
    let run = store.start_run(&feature, "oneshot", "")?;
    store.append_run_event(&feature, "ci-loop", "started", Some(&format!("pr #{pr}")))?;
    info!(run_id = %run.run_id, "run file opened");

    let poller = Arc::new(GhChecks::new(&root));
    let escalation_store = Arc::clone(&store);
    let escalation_feature = feature.clone();
    let escalation: sdp_ci::driver::EscalationCallback = Box::new(move |e| {
        warn!(pr = e.pr_number, "escalation: {}", e.reason);
        let checkpoint =
            checkpoint_now(&escalation_feature, "", Some(e.pr_number), "", "escalated");
        if let Err(err) = escalation_store.save_checkpoint(&checkpoint) {
            warn!("checkpoint save failed during escalation: {err}");
        }
    });

    let mut ci_loop = CiLoop::new(
        CiLoopConfig {
            pr_number: pr,
            max_iter,
            max_pending_retries,
            poll_delay: (poll_delay > 0).then(|| std::time::Duration::from_secs(poll_delay)),
            retry_delay: std::time::Duration::from_secs(retry_delay),
        },
        poller,
        escalation,
    )
    .with_cancel(cancel_on_ctrl_c());

    if !no_fix {
        let mut registry = FixerRegistry::builtin();
        registry.load_yaml(&root.join(".sdp/auto-fixers.yaml"))?;
        let fixer = AutoFixer::new(&root, pr, &feature, Box::new(GhFailureLog::new(&root)))?
            .with_registry(registry);
        ci_loop = ci_loop.with_fixer(Arc::new(fixer));
    }

    let poll_error_store = Arc::clone(&store);
    let poll_error_feature = feature.clone();
    ci_loop = ci_loop.with_poll_error_callback(Box::new(move |e| {
        let checkpoint = checkpoint_now(&poll_error_feature, "", Some(pr), "", "poll-error");
        if let Err(err) = poll_error_store.save_checkpoint(&checkpoint) {
            warn!("checkpoint save failed after poll error {e}: {err}");
        }
    }));

    let outcome = ci_loop.run().await?;
    let phase = match outcome {
        LoopOutcome::Green => "green",
        LoopOutcome::Escalated => "escalated",
        LoopOutcome::MaxIter => "max-iter",
    };
    store.save_checkpoint(&checkpoint_now(&feature, "", Some(pr), "", phase))?;
    store.append_run_event(
        &feature,
        "ci-loop",
        phase,
        Some(&format!(
            "{} iteration(s), {} pending round(s)",
            ci_loop.iterations(),
            ci_loop.pending_rounds()
        )),
    )?;
    info!(pr, outcome = phase, "ci loop finished");

    Ok(outcome_exit_code(outcome))
}

fn run_evidence(cwd: &Path, command: EvidenceCommands) -> Result<i32> {
    let root = project_root_from(cwd)?;
    let path = log_path(&root)?;
    match command {
        EvidenceCommands::Verify => match evidence::verify(&path) {
            Ok(count) => {
                println!("chain OK: {count} event(s)");
                Ok(0)
            }
            Err(e) => {
                println!("chain BROKEN: {e}");
                Ok(1)
            }
        },
        EvidenceCommands::Export { format } => {
            let events = evidence::read_all(&path)?;
            match format.as_str() {
                "csv" => print!("{}", evidence::to_csv(&events)),
                "json" => println!("{}", evidence::to_json(&events)?),
                other => anyhow::bail!("unknown format {other:?} (use csv or json)"),
            }
            Ok(0)
        }
        EvidenceCommands::Stats => {
            let events = evidence::read_all(&path)?;
            let stats = evidence::stats(&events);
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(0)
        }
        EvidenceCommands::Tail { count } => {
            let events = evidence::read_all(&path)?;
            for event in evidence::query::last_n(&events, count) {
                println!(
                    "{} {:12} {} {}",
                    event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    event.kind().as_str(),
                    event.ws_id,
                    event.id
                );
            }
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_exit_codes() {
        assert_eq!(outcome_exit_code(LoopOutcome::Green), 0);
        assert_eq!(outcome_exit_code(LoopOutcome::MaxIter), 2);
        assert_eq!(outcome_exit_code(LoopOutcome::Escalated), 3);
    }

    #[test]
    fn test_load_plan_builds_graph() {
        let dir = tempfile::tempdir().unwrap();
        let plan = dir.path().join("plan.json");
        std::fs::write(
            &plan,
            r#"[
                {"id": "00-001-01"},
                {"id": "00-001-02", "depends_on": ["00-001-01"]}
            ]"#,
        )
        .unwrap();
        let graph = load_plan(&plan).unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.get_ready(), vec!["00-001-01"]);
    }

    #[test]
    fn test_load_plan_rejects_bad_ws_id() {
        let dir = tempfile::tempdir().unwrap();
        let plan = dir.path().join("plan.json");
        std::fs::write(&plan, r#"[{"id": "../evil"}]"#).unwrap();
        assert!(load_plan(&plan).is_err());
    }

    #[test]
    fn test_load_plan_rejects_forward_reference() {
        let dir = tempfile::tempdir().unwrap();
        let plan = dir.path().join("plan.json");
        std::fs::write(
            &plan,
            r#"[{"id": "00-001-01", "depends_on": ["00-001-99"]}]"#,
        )
        .unwrap();
        assert!(load_plan(&plan).is_err());
    }

    #[test]
    fn test_load_plan_rejects_non_array() {
        let dir = tempfile::tempdir().unwrap();
        let plan = dir.path().join("plan.json");
        std::fs::write(&plan, r#"{"id": "00-001-01"}"#).unwrap();
        assert!(load_plan(&plan).is_err());
        assert!(load_plan(&dir.path().join("absent.json")).is_err());
    }

    #[test]
    fn test_gather_state_reflects_config_presence() {
        let dir = tempfile::tempdir().unwrap();
        let state = gather_state(dir.path());
        assert!(!state.config.has_sdp_config);
        assert!(state.workstreams.is_empty());

        config::init_project(dir.path()).unwrap();
        let state = gather_state(dir.path());
        assert!(state.config.has_sdp_config);
    }
}
