//! Batch execution of scenario directories.
//!
//! Each scenario is solved on the blocking pool; solves are CPU bound and the
//! backend is synchronous. Every scenario that gets a run directory also gets
//! an `outcome.json`, whatever happened.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn};

use crate::config::Config;
use crate::domain::Schedule;
use crate::error::{Result, SchedulerError};
use crate::io::{export_schedule, load_horizon, run_dir, write_outcome_json, OutcomeRecord, ScenarioFiles};
use crate::optimizer::{MilpOptimizer, RunOutcome, ScheduleOptimizer};
use crate::telemetry;

/// Result of one scenario run.
#[derive(Debug)]
pub struct ScenarioReport {
    pub scenario: String,
    pub outcome: RunOutcome,
    /// `None` when the run directory itself could not be created
    pub run_dir: Option<PathBuf>,
    pub message: Option<String>,
    pub schedule: Option<Schedule>,
}

/// Reports in input order. `interrupted` is set when a shutdown signal
/// arrived before every scenario finished.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub reports: Vec<ScenarioReport>,
    pub interrupted: bool,
}

impl BatchReport {
    pub fn all_succeeded(&self) -> bool {
        !self.interrupted && self.reports.iter().all(|r| r.outcome.is_success())
    }
}

/// Solve `dirs` with at most `parallel` scenarios in flight.
pub async fn run_scenarios(config: Arc<Config>, dirs: Vec<PathBuf>, parallel: usize) -> BatchReport {
    let total = dirs.len();
    let mut queue = dirs.into_iter().enumerate();
    let mut pending: JoinSet<(usize, ScenarioReport)> = JoinSet::new();
    let mut finished: Vec<(usize, ScenarioReport)> = Vec::with_capacity(total);
    let mut interrupted = false;

    let shutdown = telemetry::shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        while pending.len() < parallel.max(1) {
            let Some((index, dir)) = queue.next() else { break };
            let config = Arc::clone(&config);
            pending.spawn_blocking(move || (index, run_one(&config, &dir)));
        }
        if pending.is_empty() {
            break;
        }

        tokio::select! {
            joined = pending.join_next() => match joined {
                Some(Ok(done)) => finished.push(done),
                Some(Err(e)) => error!(error = %e, "scenario task panicked"),
                None => break,
            },
            _ = &mut shutdown => {
                warn!(in_flight = pending.len(), remaining = queue.len(), "shutdown requested, not waiting for remaining scenarios");
                interrupted = true;
                break;
            }
        }
    }

    finished.sort_by_key(|(index, _)| *index);
    let reports: Vec<ScenarioReport> = finished.into_iter().map(|(_, report)| report).collect();
    let succeeded = reports.iter().filter(|r| r.outcome.is_success()).count();
    info!(total, finished = reports.len(), succeeded, "batch complete");

    BatchReport { reports, interrupted }
}

/// Solve one scenario directory end to end. Never panics on bad input; the
/// outcome carries the failure instead.
pub fn run_one(config: &Config, dir: &Path) -> ScenarioReport {
    let files = ScenarioFiles::in_dir(dir);
    let span = info_span!("scenario", name = %files.name);
    let _guard = span.enter();

    let out_dir = match run_dir(&config.output.directory, &files.name, Utc::now()) {
        Ok(out_dir) => out_dir,
        Err(e) => {
            error!(error = %e, "cannot create run directory");
            return ScenarioReport {
                scenario: files.name,
                outcome: RunOutcome::Failed,
                run_dir: None,
                message: Some(format!("cannot create run directory: {e}")),
                schedule: None,
            };
        }
    };

    let result = solve_and_export(config, &files, &out_dir);
    let outcome = RunOutcome::of(&result);
    let message = match &result {
        Ok(schedule) => Some(format!("{} objective={:.4}", schedule.status, schedule.objective)),
        Err(e) => Some(e.to_string()),
    };
    match &result {
        Ok(_) => info!(%outcome, dir = %out_dir.display(), "scenario finished"),
        Err(SchedulerError::Infeasible(report)) => warn!(%outcome, %report, "scenario infeasible"),
        Err(e) => error!(%outcome, error = %e, "scenario failed"),
    }

    let record = OutcomeRecord {
        scenario: files.name.clone(),
        outcome,
        message: message.clone(),
        finished_at: Utc::now(),
    };
    if let Err(e) = write_outcome_json(&record, &out_dir.join("outcome.json")) {
        warn!(error = %e, "failed to write outcome.json");
    }

    ScenarioReport {
        scenario: files.name,
        outcome,
        run_dir: Some(out_dir),
        message,
        schedule: result.ok(),
    }
}

fn solve_and_export(config: &Config, files: &ScenarioFiles, out_dir: &Path) -> Result<Schedule> {
    let horizon = load_horizon(files, config)?;
    let solver = MilpOptimizer::new(config.solve_settings())
        .with_artifact_dir(out_dir)
        .with_model_file(config.output.write_lp);
    let schedule = ScheduleOptimizer::new(config.to_constraints(), solver).optimize(horizon)?;

    export_schedule(&schedule, out_dir, config.output.write_csv, config.output.write_json)?;
    Ok(schedule)
}
