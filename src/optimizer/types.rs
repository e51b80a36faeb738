use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use super::builder::ModelBuilder;
use super::extract::extract;
use super::model::VarId;
use super::strategies::MilpOptimizer;
use super::Constraints;
use crate::domain::{Horizon, Schedule};
use crate::error::{Result, SchedulerError};

/// How a returned schedule was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SolveStatus {
    /// Proven optimal within the configured MIP gap
    Optimal,
    /// Best incumbent when the time limit was reached; `gap` is relative to
    /// the LP-relaxation bound when it could be computed
    Feasible { gap: Option<f64> },
}

impl SolveStatus {
    pub fn is_optimal(&self) -> bool {
        matches!(self, SolveStatus::Optimal)
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveStatus::Optimal => write!(f, "optimal"),
            SolveStatus::Feasible { gap: Some(gap) } => write!(f, "feasible (gap {:.2}%)", gap * 100.0),
            SolveStatus::Feasible { gap: None } => write!(f, "feasible (gap unknown)"),
        }
    }
}

/// Solved value of every model variable, indexed by [`VarId`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecisionValues {
    values: Vec<f64>,
}

impl DecisionValues {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn value(&self, var: VarId) -> f64 {
        self.values[var.index()]
    }

    /// Binary/integer decisions come back with solver noise
    pub fn is_set(&self, var: VarId) -> bool {
        self.value(var) > 0.5
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The single user-visible ending of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    SolvedOptimal,
    SolvedWithinGap,
    InfeasibleWithDiagnostic,
    InputRejected,
    /// Backend errors, artifact failures and post-solve invariant violations
    Failed,
}

impl RunOutcome {
    pub fn of(result: &Result<Schedule>) -> Self {
        match result {
            Ok(schedule) if schedule.status.is_optimal() => RunOutcome::SolvedOptimal,
            Ok(_) => RunOutcome::SolvedWithinGap,
            Err(SchedulerError::Input(_)) => RunOutcome::InputRejected,
            Err(SchedulerError::Infeasible(_)) => RunOutcome::InfeasibleWithDiagnostic,
            Err(_) => RunOutcome::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::SolvedOptimal | RunOutcome::SolvedWithinGap)
    }
}

/// Build, solve and extract one horizon.
pub struct ScheduleOptimizer {
    pub constraints: Constraints,
    pub solver: MilpOptimizer,
}

impl ScheduleOptimizer {
    pub fn new(constraints: Constraints, solver: MilpOptimizer) -> Self {
        Self { constraints, solver }
    }

    pub fn optimize(&self, horizon: Horizon) -> Result<Schedule> {
        let model = ModelBuilder::new(&self.constraints).build(horizon)?;
        let run = self.solver.solve(&model)?;
        let schedule = extract(&model, &run)?;

        info!(
            horizon = %schedule.horizon,
            status = %schedule.status,
            objective = schedule.objective,
            shifted_kw = schedule.summary.total_shifted_kw,
            elapsed_ms = run.elapsed.as_millis() as u64,
            "schedule ready"
        );
        if let SolveStatus::Feasible { gap } = schedule.status {
            warn!(?gap, "returning time-limited incumbent");
        }
        Ok(schedule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InputError;

    #[test]
    fn test_status_display() {
        assert_eq!(SolveStatus::Optimal.to_string(), "optimal");
        assert_eq!(
            SolveStatus::Feasible { gap: Some(0.0125) }.to_string(),
            "feasible (gap 1.25%)"
        );
    }

    #[test]
    fn test_status_serializes_tagged() {
        let json = serde_json::to_string(&SolveStatus::Feasible { gap: Some(0.5) }).unwrap();
        assert_eq!(json, r#"{"status":"feasible","gap":0.5}"#);
    }

    #[test]
    fn test_outcome_of_errors() {
        let rejected: Result<Schedule> = Err(InputError::EmptyHorizon.into());
        assert_eq!(RunOutcome::of(&rejected), RunOutcome::InputRejected);
        assert_eq!(RunOutcome::of(&rejected).to_string(), "input_rejected");

        let failed: Result<Schedule> = Err(SchedulerError::InvariantViolations(vec![]));
        assert_eq!(RunOutcome::of(&failed), RunOutcome::Failed);
        assert!(!RunOutcome::of(&failed).is_success());
    }

    #[test]
    fn test_decision_values() {
        let values = DecisionValues::new(vec![0.0, 0.999_999, 3.5]);
        assert!(!values.is_set(VarId(0)));
        assert!(values.is_set(VarId(1)));
        assert_eq!(values.value(VarId(2)), 3.5);
    }
}
