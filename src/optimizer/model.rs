//! Solver-independent representation of the scheduling MILP.
//!
//! The model is plain data: variables with bounds and integrality, named
//! linear rows, and a linear objective. The solver adapter translates it into
//! a backend problem, the LP writer prints it, and the IIS search solves
//! subsets of its rows.

use serde::Serialize;
use std::fmt;

use super::shifting::ShiftArcs;
use super::Constraints;
use crate::domain::Horizon;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct VarId(pub(crate) usize);

impl VarId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VarKind {
    Continuous,
    Integer,
    Binary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VarSpec {
    pub name: String,
    pub kind: VarKind,
    pub lower: f64,
    pub upper: f64,
}

/// Sum of `coefficient * variable` terms plus a constant.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LinExpr {
    terms: Vec<(VarId, f64)>,
    constant: f64,
}

impl LinExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn constant(value: f64) -> Self {
        Self {
            terms: Vec::new(),
            constant: value,
        }
    }

    pub fn term(mut self, var: VarId, coefficient: f64) -> Self {
        self.add_term(var, coefficient);
        self
    }

    pub fn add_term(&mut self, var: VarId, coefficient: f64) {
        if coefficient != 0.0 {
            self.terms.push((var, coefficient));
        }
    }

    pub fn add_constant(&mut self, value: f64) {
        self.constant += value;
    }

    pub fn terms(&self) -> &[(VarId, f64)] {
        &self.terms
    }

    pub fn constant_value(&self) -> f64 {
        self.constant
    }

    pub fn eval(&self, values: &[f64]) -> f64 {
        self.constant
            + self
                .terms
                .iter()
                .map(|(var, coefficient)| coefficient * values[var.0])
                .sum::<f64>()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Sense {
    Le,
    Ge,
    Eq,
}

impl Sense {
    pub fn symbol(&self) -> &'static str {
        match self {
            Sense::Le => "<=",
            Sense::Ge => ">=",
            Sense::Eq => "=",
        }
    }
}

/// Constraint families; every row belongs to exactly one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, strum::Display, strum::EnumIter, strum::AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RowFamily {
    ChargeWindow,
    InitialNoCharge,
    InitialSoc,
    SocContinuity,
    SocHoldAbsent,
    DepartureSoc,
    ArrivalSoc,
    ArrivalMinSoc,
    FinalSoc,
    GridUpper,
    GridLower,
    ShiftCap,
    AssignOnce,
    ShiftConservation,
    RouteLink,
    DestinationOverload,
    FlagLink,
    FlagFloor,
    HoldBack,
    StayWhenIdle,
    OffsetDefinition,
}

/// `expr (sense) rhs`; constants are kept on the right-hand side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub name: String,
    pub family: RowFamily,
    pub vehicle: Option<usize>,
    pub interval: Option<usize>,
    pub expr: LinExpr,
    pub sense: Sense,
    pub rhs: f64,
}

impl Row {
    /// Amount by which `values` violate this row (0 when satisfied)
    pub fn violation(&self, values: &[f64]) -> f64 {
        let lhs = self.expr.eval(values);
        match self.sense {
            Sense::Le => (lhs - self.rhs).max(0.0),
            Sense::Ge => (self.rhs - lhs).max(0.0),
            Sense::Eq => (lhs - self.rhs).abs(),
        }
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Variable handles of the schedule, grouped by meaning.
#[derive(Debug, Clone, Default)]
pub struct ScheduleVariables {
    /// `[vehicle][t]`
    pub charge: Vec<Vec<VarId>>,
    /// `[vehicle][t]`
    pub soc: Vec<Vec<VarId>>,
    pub shift: Vec<VarId>,
    pub offset: Vec<VarId>,
    pub flag: Vec<VarId>,
    /// "stay" assignment (offset 0) per origin
    pub stay: Vec<VarId>,
    /// assignment binary per arc, indexed like [`ShiftArcs::arcs`]
    pub route: Vec<VarId>,
    /// shifted amount carried per arc, indexed like [`ShiftArcs::arcs`]
    pub flow: Vec<VarId>,
}

/// The owned model of one horizon, handed from builder to solver to extractor.
#[derive(Debug, Clone)]
pub struct ScheduleModel {
    pub(crate) horizon: Horizon,
    pub(crate) constraints: Constraints,
    pub(crate) arcs: ShiftArcs,
    pub(crate) vars: Vec<VarSpec>,
    pub(crate) rows: Vec<Row>,
    pub(crate) objective: LinExpr,
    pub(crate) index: ScheduleVariables,
    pub(crate) big_m: f64,
}

impl ScheduleModel {
    pub fn horizon(&self) -> &Horizon {
        &self.horizon
    }

    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    pub fn arcs(&self) -> &ShiftArcs {
        &self.arcs
    }

    pub fn variables(&self) -> &[VarSpec] {
        &self.vars
    }

    pub fn variable(&self, var: VarId) -> &VarSpec {
        &self.vars[var.0]
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> &Row {
        &self.rows[index]
    }

    pub fn objective(&self) -> &LinExpr {
        &self.objective
    }

    pub fn index(&self) -> &ScheduleVariables {
        &self.index
    }

    pub fn big_m(&self) -> f64 {
        self.big_m
    }

    pub fn binary_count(&self) -> usize {
        self.vars.iter().filter(|v| v.kind == VarKind::Binary).count()
    }

    pub fn rows_of(&self, family: RowFamily) -> impl Iterator<Item = (usize, &Row)> {
        self.rows
            .iter()
            .enumerate()
            .filter(move |(_, row)| row.family == family)
    }

    /// Largest row violation and largest bound violation of `values`
    pub fn max_violation(&self, values: &[f64]) -> f64 {
        let rows = self
            .rows
            .iter()
            .map(|row| row.violation(values))
            .fold(0.0, f64::max);
        let bounds = self
            .vars
            .iter()
            .zip(values)
            .map(|(spec, value)| (spec.lower - value).max(value - spec.upper).max(0.0))
            .fold(0.0, f64::max);
        rows.max(bounds)
    }

    /// Human-readable name of the vehicle a row refers to
    pub fn vehicle_id(&self, vehicle: usize) -> &str {
        &self.horizon.vehicles()[vehicle].id
    }
}
