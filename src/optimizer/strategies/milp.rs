//! MILP solver adapter
//!
//! The schedule model is solver independent; this module hands it to a
//! [`MipBackend`] and turns the raw outcome into a [`SolverRun`]:
//! - the model is persisted as `model.lp` before solving, whatever the outcome
//! - a solve the backend stopped at the time limit returns the best incumbent
//!   with a gap estimated against the LP relaxation, or
//!   [`SolverError::NoIncumbent`] when there is none
//! - an infeasible model triggers the IIS search and is reported as
//!   [`SchedulerError::Infeasible`], never as partial values
//!
//! The default backend is HiGHS through `good_lp`.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{SchedulerError, SolverError};
use crate::optimizer::iis::{find_iis, IisReport};
use crate::optimizer::lp_format::{write_lp, write_lp_subset};
use crate::optimizer::model::ScheduleModel;
use crate::optimizer::{DecisionValues, SolveStatus};

/// Largest row/bound violation accepted from a time-limited incumbent
const INCUMBENT_TOLERANCE: f64 = 1e-5;

#[derive(Debug, Clone, PartialEq)]
pub struct SolveSettings {
    pub time_limit: Option<Duration>,
    /// Relative MIP gap at which the search stops
    pub mip_gap: Option<f64>,
    pub random_seed: Option<i32>,
    pub threads: Option<u32>,
    /// Forward the backend's own log output
    pub verbose: bool,
    /// Maximum number of feasibility solves spent on the IIS search
    pub iis_max_solves: usize,
    /// Wall clock budget of the whole IIS search
    pub iis_time_limit: Option<Duration>,
}

impl Default for SolveSettings {
    fn default() -> Self {
        Self {
            time_limit: None,
            mip_gap: None,
            random_seed: None,
            threads: None,
            verbose: false,
            iis_max_solves: 400,
            iis_time_limit: Some(Duration::from_secs(120)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectiveMode {
    Full,
    /// Zero objective; only feasibility of the selected rows matters
    FeasibilityOnly,
}

/// What to hand to the backend: which rows, which objective, which integrality.
#[derive(Debug, Clone, Copy)]
pub struct SolveRequest<'a> {
    /// Row indices to include; `None` means every row
    pub rows: Option<&'a [usize]>,
    pub objective: ObjectiveMode,
    pub relax_integrality: bool,
}

impl<'a> SolveRequest<'a> {
    pub fn full() -> Self {
        Self {
            rows: None,
            objective: ObjectiveMode::Full,
            relax_integrality: false,
        }
    }

    pub fn relaxation() -> Self {
        Self {
            relax_integrality: true,
            ..Self::full()
        }
    }

    pub fn feasibility(rows: &'a [usize]) -> Self {
        Self {
            rows: Some(rows),
            objective: ObjectiveMode::FeasibilityOnly,
            relax_integrality: false,
        }
    }

    /// Row indices selected by this request
    pub fn selected_rows(&self, model: &ScheduleModel) -> Vec<usize> {
        match self.rows {
            Some(rows) => rows.to_vec(),
            None => (0..model.rows().len()).collect(),
        }
    }
}

/// Why the backend stopped with a feasible point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    Optimal,
    /// Stopped by the time limit (or another work limit) before proving optimality
    TimeLimit,
    /// Stopped once the relative MIP gap fell below the configured tolerance
    GapLimit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackendOutcome {
    Solved {
        values: Vec<f64>,
        status: BackendStatus,
        elapsed: Duration,
    },
    /// A limit was hit before any feasible point was found
    NoSolution,
    Infeasible,
    Unbounded,
}

/// A MIP solver able to optimise a [`ScheduleModel`] or a subset of its rows.
pub trait MipBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn optimize(
        &self,
        model: &ScheduleModel,
        request: &SolveRequest<'_>,
        settings: &SolveSettings,
    ) -> Result<BackendOutcome, SolverError>;
}

/// HiGHS through `good_lp`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HighsBackend;

#[cfg(feature = "optimization")]
impl MipBackend for HighsBackend {
    fn name(&self) -> &'static str {
        "highs"
    }

    fn optimize(
        &self,
        model: &ScheduleModel,
        request: &SolveRequest<'_>,
        settings: &SolveSettings,
    ) -> Result<BackendOutcome, SolverError> {
        use good_lp::{
            constraint, highs, variable, Expression, ProblemVariables, ResolutionError, Solution, SolutionStatus,
            SolverModel, Variable,
        };

        use crate::optimizer::model::{LinExpr, Sense, VarKind};

        fn expression(expr: &LinExpr, vars: &[Variable]) -> Expression {
            let mut out = Expression::from(expr.constant_value());
            for (var, coefficient) in expr.terms() {
                out += *coefficient * vars[var.index()];
            }
            out
        }

        let started = std::time::Instant::now();

        let mut problem = ProblemVariables::new();
        let vars: Vec<Variable> = model
            .variables()
            .iter()
            .map(|spec| {
                let mut definition = variable();
                if spec.lower.is_finite() {
                    definition = definition.min(spec.lower);
                }
                if spec.upper.is_finite() {
                    definition = definition.max(spec.upper);
                }
                if !request.relax_integrality && spec.kind != VarKind::Continuous {
                    definition = definition.integer();
                }
                problem.add(definition)
            })
            .collect();

        let objective = match request.objective {
            ObjectiveMode::Full => expression(model.objective(), &vars),
            ObjectiveMode::FeasibilityOnly => Expression::from(0.0),
        };

        let mut solver = problem.minimise(objective).using(highs);
        for index in request.selected_rows(model) {
            let row = model.row(index);
            let lhs = expression(&row.expr, &vars);
            let rhs = row.rhs;
            match row.sense {
                Sense::Le => solver.add_constraint(constraint!(lhs <= rhs)),
                Sense::Ge => solver.add_constraint(constraint!(lhs >= rhs)),
                Sense::Eq => solver.add_constraint(constraint!(lhs == rhs)),
            };
        }

        solver = solver.set_option("output_flag", settings.verbose);
        if let Some(limit) = settings.time_limit {
            solver = solver.set_option("time_limit", limit.as_secs_f64());
        }
        if let Some(gap) = settings.mip_gap {
            solver = solver.set_option("mip_rel_gap", gap);
        }
        if let Some(seed) = settings.random_seed {
            solver = solver.set_option("random_seed", seed);
        }
        if let Some(threads) = settings.threads {
            solver = solver.set_option("threads", threads as i32);
        }

        match solver.solve() {
            Ok(solution) => Ok(BackendOutcome::Solved {
                values: vars.iter().map(|var| solution.value(*var)).collect(),
                status: match solution.status() {
                    SolutionStatus::Optimal => BackendStatus::Optimal,
                    SolutionStatus::TimeLimit => BackendStatus::TimeLimit,
                    SolutionStatus::GapLimit => BackendStatus::GapLimit,
                },
                elapsed: started.elapsed(),
            }),
            Err(ResolutionError::Infeasible) => Ok(BackendOutcome::Infeasible),
            Err(ResolutionError::Unbounded) => Ok(BackendOutcome::Unbounded),
            // HiGHS stopped at a limit without a primal feasible point
            Err(ResolutionError::Other("NoSolutionFound")) => Ok(BackendOutcome::NoSolution),
            Err(other) => Err(SolverError::Backend(other.to_string())),
        }
    }
}

#[cfg(not(feature = "optimization"))]
impl MipBackend for HighsBackend {
    fn name(&self) -> &'static str {
        "highs"
    }

    fn optimize(
        &self,
        _model: &ScheduleModel,
        _request: &SolveRequest<'_>,
        _settings: &SolveSettings,
    ) -> Result<BackendOutcome, SolverError> {
        Err(SolverError::Backend(
            "MILP optimization requires 'optimization' feature to be enabled".to_string(),
        ))
    }
}

/// Result of a successful solve.
#[derive(Debug, Clone)]
pub struct SolverRun {
    pub status: SolveStatus,
    pub values: DecisionValues,
    pub objective: f64,
    pub elapsed: Duration,
    /// Where the model was persisted, if an artifact directory was set
    pub lp_path: Option<PathBuf>,
}

/// MILP Optimizer with artifact persistence and infeasibility diagnosis
pub struct MilpOptimizer {
    backend: Box<dyn MipBackend>,
    settings: SolveSettings,
    artifact_dir: Option<PathBuf>,
    write_model: bool,
}

impl Default for MilpOptimizer {
    fn default() -> Self {
        Self::new(SolveSettings::default())
    }
}

impl MilpOptimizer {
    pub fn new(settings: SolveSettings) -> Self {
        Self::with_backend(Box::new(HighsBackend), settings)
    }

    pub fn with_backend(backend: Box<dyn MipBackend>, settings: SolveSettings) -> Self {
        Self {
            backend,
            settings,
            artifact_dir: None,
            write_model: true,
        }
    }

    /// Persist `model.lp` and IIS artifacts under `dir`
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    /// Skip `model.lp`; IIS artifacts are still written
    pub fn with_model_file(mut self, enabled: bool) -> Self {
        self.write_model = enabled;
        self
    }

    pub fn solve(&self, model: &ScheduleModel) -> Result<SolverRun, SchedulerError> {
        let lp_path = self.persist_model(model)?;

        info!(
            backend = self.backend.name(),
            variables = model.variables().len(),
            rows = model.rows().len(),
            time_limit_s = self.settings.time_limit.map(|d| d.as_secs_f64()),
            mip_gap = self.settings.mip_gap,
            "solving schedule model"
        );

        match self.backend.optimize(model, &SolveRequest::full(), &self.settings)? {
            BackendOutcome::Solved { values, status, elapsed } => {
                let objective = model.objective().eval(&values);

                let status = match status {
                    BackendStatus::Optimal => SolveStatus::Optimal,
                    BackendStatus::GapLimit => {
                        debug!(mip_gap = self.settings.mip_gap, "stopped at the configured MIP gap");
                        SolveStatus::Optimal
                    }
                    BackendStatus::TimeLimit => {
                        let violation = model.max_violation(&values);
                        if violation > INCUMBENT_TOLERANCE {
                            warn!(violation, "time limit reached before a feasible incumbent was found");
                            return Err(SolverError::NoIncumbent.into());
                        }
                        let gap = self.relaxation_gap(model, objective);
                        warn!(?gap, elapsed_ms = elapsed.as_millis() as u64, "time limit reached");
                        SolveStatus::Feasible { gap }
                    }
                };

                info!(
                    %status,
                    objective,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "solve finished"
                );
                Ok(SolverRun {
                    status,
                    values: DecisionValues::new(values),
                    objective,
                    elapsed,
                    lp_path,
                })
            }
            BackendOutcome::Infeasible => {
                warn!(horizon = model.horizon().name(), "model infeasible, searching conflicting rows");
                let report = find_iis(self.backend.as_ref(), model, &self.settings)?;
                warn!(
                    rows = report.rows.len(),
                    families = ?report.families,
                    irreducible = report.irreducible,
                    solves = report.solves,
                    "infeasible subset found"
                );
                self.persist_iis(model, &report)?;
                Err(SchedulerError::Infeasible(report))
            }
            BackendOutcome::NoSolution => {
                warn!(
                    time_limit_s = self.settings.time_limit.map(|d| d.as_secs_f64()),
                    "time limit reached before a feasible incumbent was found"
                );
                Err(SolverError::NoIncumbent.into())
            }
            BackendOutcome::Unbounded => Err(SolverError::Unbounded.into()),
        }
    }

    /// Relative distance between an incumbent and the LP-relaxation bound
    fn relaxation_gap(&self, model: &ScheduleModel, incumbent: f64) -> Option<f64> {
        match self.backend.optimize(model, &SolveRequest::relaxation(), &self.settings) {
            Ok(BackendOutcome::Solved { values, .. }) => {
                let bound = model.objective().eval(&values);
                Some(((incumbent - bound) / incumbent.abs().max(1e-9)).max(0.0))
            }
            Ok(outcome) => {
                debug!(?outcome, "relaxation gave no bound");
                None
            }
            Err(e) => {
                debug!(error = %e, "relaxation solve failed");
                None
            }
        }
    }

    fn persist_model(&self, model: &ScheduleModel) -> Result<Option<PathBuf>, SolverError> {
        let Some(dir) = self.artifact_dir.as_ref().filter(|_| self.write_model) else {
            return Ok(None);
        };
        let path = dir.join("model.lp");
        write_artifact(&path, |w| write_lp(model, w))?;
        debug!(path = %path.display(), "model persisted");
        Ok(Some(path))
    }

    fn persist_iis(&self, model: &ScheduleModel, report: &IisReport) -> Result<(), SolverError> {
        let Some(dir) = &self.artifact_dir else {
            return Ok(());
        };
        let rows: Vec<usize> = report.rows.iter().map(|row| row.index).collect();
        write_artifact(&dir.join("model_iis.ilp"), |w| write_lp_subset(model, &rows, w))?;
        write_artifact(&dir.join("iis.json"), |w| {
            serde_json::to_writer_pretty(&mut *w, report).map_err(io::Error::from)?;
            writeln!(w)
        })?;
        Ok(())
    }
}

fn write_artifact<F>(path: &Path, write: F) -> Result<(), SolverError>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    let attempt = || -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        write(&mut writer)?;
        writer.flush()
    };
    attempt().map_err(|source| SolverError::Artifact {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EnergyProfile, Horizon, IntervalLimits, TimeGrid};
    use crate::optimizer::builder::ModelBuilder;
    use crate::optimizer::Constraints;
    use chrono::NaiveDate;

    /// Replays a fixed outcome; relaxations come back unbounded.
    struct Scripted {
        outcome: BackendOutcome,
    }

    impl MipBackend for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn optimize(
            &self,
            _model: &ScheduleModel,
            request: &SolveRequest<'_>,
            _settings: &SolveSettings,
        ) -> Result<BackendOutcome, SolverError> {
            if request.relax_integrality {
                return Ok(BackendOutcome::Unbounded);
            }
            Ok(self.outcome.clone())
        }
    }

    fn model() -> ScheduleModel {
        let start = NaiveDate::from_ymd_opt(2024, 7, 15)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let horizon = Horizon::new(
            "unit",
            TimeGrid::new(start, 2),
            EnergyProfile::new(vec![1.0; 2], vec![0.0; 2], vec![0.0; 2], vec![0.1; 2]),
            vec![],
            IntervalLimits::constant(2, 0.0, 65.0, 0.0),
        )
        .unwrap();
        ModelBuilder::new(&Constraints::default()).build(horizon).unwrap()
    }

    fn scripted(outcome: BackendOutcome) -> Scripted {
        Scripted { outcome }
    }

    /// No flexible load, so keeping every interval in place is feasible
    fn idle_values(model: &ScheduleModel) -> Vec<f64> {
        let mut values = vec![0.0; model.variables().len()];
        for stay in &model.index().stay {
            values[stay.index()] = 1.0;
        }
        values
    }

    fn limited(seconds: u64) -> SolveSettings {
        SolveSettings {
            time_limit: Some(Duration::from_secs(seconds)),
            ..SolveSettings::default()
        }
    }

    #[test]
    fn test_solved_without_limit_is_optimal() {
        let model = model();
        let backend = scripted(BackendOutcome::Solved {
            values: idle_values(&model),
            status: BackendStatus::Optimal,
            elapsed: Duration::from_millis(3),
        });
        let run = MilpOptimizer::with_backend(Box::new(backend), SolveSettings::default())
            .solve(&model)
            .unwrap();
        assert_eq!(run.status, SolveStatus::Optimal);
        assert!(run.lp_path.is_none());
        assert!((run.objective - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_optimal_status_near_the_limit_stays_optimal() {
        let model = model();
        let backend = scripted(BackendOutcome::Solved {
            values: idle_values(&model),
            status: BackendStatus::Optimal,
            elapsed: Duration::from_secs(2),
        });
        let run = MilpOptimizer::with_backend(Box::new(backend), limited(2))
            .solve(&model)
            .unwrap();
        assert_eq!(run.status, SolveStatus::Optimal);
    }

    #[test]
    fn test_gap_limit_counts_as_optimal() {
        let model = model();
        let backend = scripted(BackendOutcome::Solved {
            values: idle_values(&model),
            status: BackendStatus::GapLimit,
            elapsed: Duration::from_millis(40),
        });
        let run = MilpOptimizer::with_backend(Box::new(backend), SolveSettings::default())
            .solve(&model)
            .unwrap();
        assert!(run.status.is_optimal());
    }

    #[test]
    fn test_time_limit_incumbent_is_feasible() {
        let model = model();
        let backend = scripted(BackendOutcome::Solved {
            values: idle_values(&model),
            status: BackendStatus::TimeLimit,
            elapsed: Duration::from_millis(500),
        });
        let optimizer = MilpOptimizer::with_backend(Box::new(backend), limited(2));
        let run = optimizer.solve(&model).unwrap();
        // the scripted relaxation is unbounded, so no bound is available
        assert_eq!(run.status, SolveStatus::Feasible { gap: None });
    }

    #[test]
    fn test_time_limited_infeasible_values_have_no_incumbent() {
        let model = model();
        // offset and stay at 0 violate assign_once
        let backend = scripted(BackendOutcome::Solved {
            values: vec![0.0; model.variables().len()],
            status: BackendStatus::TimeLimit,
            elapsed: Duration::from_secs(2),
        });
        let err = MilpOptimizer::with_backend(Box::new(backend), limited(2))
            .solve(&model)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Solver(SolverError::NoIncumbent)));
    }

    #[test]
    fn test_no_solution_found_is_no_incumbent() {
        let model = model();
        let err = MilpOptimizer::with_backend(Box::new(scripted(BackendOutcome::NoSolution)), limited(1))
            .solve(&model)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Solver(SolverError::NoIncumbent)));
    }

    #[test]
    fn test_model_is_persisted_before_solving() {
        let dir = tempfile::tempdir().unwrap();
        let model = model();
        let err = MilpOptimizer::with_backend(Box::new(scripted(BackendOutcome::Unbounded)), SolveSettings::default())
            .with_artifact_dir(dir.path().join("run"))
            .solve(&model)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Solver(SolverError::Unbounded)));
        let lp = std::fs::read_to_string(dir.path().join("run/model.lp")).unwrap();
        assert!(lp.contains("Subject To"));
    }

    #[test]
    fn test_feasibility_request_selects_rows() {
        let model = model();
        let rows = [0usize, 2];
        assert_eq!(SolveRequest::feasibility(&rows).selected_rows(&model), vec![0, 2]);
        assert_eq!(SolveRequest::full().selected_rows(&model).len(), model.rows().len());
    }
}
