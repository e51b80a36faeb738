use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::optimizer::iis::IisReport;

/// Input errors: rejected before any model is built.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error("Horizon is empty")]
    EmptyHorizon,

    #[error("Series '{series}' has {actual} intervals, expected {expected}")]
    LengthMismatch {
        series: String,
        expected: usize,
        actual: usize,
    },

    #[error("Timestamps of '{series}' are misaligned at interval {index}: expected {expected}, found {found}")]
    TimestampMismatch {
        series: String,
        index: usize,
        expected: String,
        found: String,
    },

    #[error("Time grid is not strictly increasing with a fixed step at interval {index}")]
    IrregularGrid { index: usize },

    #[error("Time grid step is {actual} minutes, expected {expected}")]
    UnsupportedStep { expected: i64, actual: i64 },

    #[error("Non-finite value in '{series}' at interval {index}")]
    NonFinite { series: String, index: usize },

    #[error("Negative value {value} in '{series}' at interval {index}")]
    Negative {
        series: String,
        index: usize,
        value: f64,
    },

    #[error("Presence of vehicle '{vehicle}' must be 0 or 1 at interval {index}, got {value}")]
    NonBinaryPresence {
        vehicle: String,
        index: usize,
        value: f64,
    },

    #[error("Vehicle '{vehicle}' records a {distance} km trip at interval {index} while present")]
    TripWhilePresent {
        vehicle: String,
        index: usize,
        distance: f64,
    },

    #[error("Duplicate vehicle id '{0}'")]
    DuplicateVehicle(String),

    #[error("Vehicle '{vehicle}' is missing from '{series}'")]
    MissingVehicle { vehicle: String, series: String },

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Failed to read '{source_name}': {reason}")]
    Read { source_name: String, reason: String },
}

impl InputError {
    pub(crate) fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        InputError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Solver adapter failures other than infeasibility.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("Solver backend failed: {0}")]
    Backend(String),

    #[error("Solver stopped at the time limit without a feasible incumbent")]
    NoIncumbent,

    #[error("Model is unbounded")]
    Unbounded,

    #[error("Failed to persist artifact '{}': {source}", path.display())]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvariantKind {
    GridUpper,
    GridLower,
    SocBounds,
    InitialSoc,
    SocContinuity,
    SocHeldWhileAway,
    DepartureSoc,
    ArrivalSoc,
    FinalSoc,
    ChargeWhileAbsent,
    ChargeAboveMax,
    AssignExactlyOne,
    ShiftBounds,
    ShiftConservation,
    DestinationOverload,
    FlagConsistency,
    OffsetConsistency,
    /// Binary or integer decision off its integer grid
    Integrality,
    /// Charging power or arc flow below zero
    NegativeFlow,
    ObjectiveMismatch,
}

/// One post-solve check that did not hold on the returned values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvariantViolation {
    pub kind: InvariantKind,
    pub interval: Option<usize>,
    pub vehicle: Option<String>,
    pub observed: f64,
    pub bound: f64,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(vehicle) = &self.vehicle {
            write!(f, " vehicle={}", vehicle)?;
        }
        if let Some(t) = self.interval {
            write!(f, " t={}", t)?;
        }
        write!(f, " observed={:.6} bound={:.6}", self.observed, self.bound)
    }
}

fn describe_violations(violations: &[InvariantViolation]) -> String {
    match violations.first() {
        Some(first) => format!("{} violation(s), first: {}", violations.len(), first),
        None => "no violations recorded".to_string(),
    }
}

/// Top-level error of one scheduling run.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Input rejected: {0}")]
    Input(#[from] InputError),

    #[error("Model infeasible: {0}")]
    Infeasible(IisReport),

    #[error(transparent)]
    Solver(#[from] SolverError),

    #[error("Post-solve invariant check failed: {}", describe_violations(.0))]
    InvariantViolations(Vec<InvariantViolation>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = SchedulerError> = std::result::Result<T, E>;
