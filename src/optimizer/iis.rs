//! Irreducible infeasible subset search.
//!
//! The search only needs feasibility answers for row subsets, so it works
//! with any [`MipBackend`]. It runs in two stages:
//!
//! 1. a deletion filter over row families drops every family that is not
//!    needed for the conflict, one feasibility solve per family;
//! 2. QuickXplain over the rows of the remaining families finds a minimal
//!    conflicting row set.
//!
//! Variable bounds always stay in the model. Every feasibility solve counts
//! against `iis_max_solves` and the whole search against `iis_time_limit`;
//! each solve only gets the time left. When either budget runs out the
//! smallest set known to be infeasible is reported with `irreducible = false`.
//!
//! A subset solve that stops at its limit without an answer is treated as
//! feasible: its rows stay in the result, which then may not be minimal.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::time::Instant;

use tracing::debug;

use super::model::{RowFamily, ScheduleModel};
use super::strategies::{BackendOutcome, MipBackend, SolveRequest, SolveSettings};
use crate::error::SolverError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IisRow {
    /// Row index in the model
    pub index: usize,
    pub name: String,
    pub family: RowFamily,
    pub vehicle: Option<String>,
    pub interval: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IisReport {
    pub rows: Vec<IisRow>,
    pub families: Vec<RowFamily>,
    /// False when a budget ran out or a solve was inconclusive
    pub irreducible: bool,
    pub solves: usize,
}

impl IisReport {
    fn from_rows(model: &ScheduleModel, rows: &[usize], irreducible: bool, solves: usize) -> Self {
        let rows: Vec<IisRow> = rows
            .iter()
            .map(|&index| {
                let row = model.row(index);
                IisRow {
                    index,
                    name: row.name.clone(),
                    family: row.family,
                    vehicle: row.vehicle.map(|c| model.vehicle_id(c).to_string()),
                    interval: row.interval,
                }
            })
            .collect();
        let families: BTreeSet<RowFamily> = rows.iter().map(|row| row.family).collect();
        Self {
            rows,
            families: families.into_iter().collect(),
            irreducible,
            solves,
        }
    }

    pub fn contains_family(&self, family: RowFamily) -> bool {
        self.families.contains(&family)
    }

    pub fn row_names(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|row| row.name.as_str())
    }
}

impl fmt::Display for IisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.rows.is_empty() {
            return write!(f, "variable bounds alone are inconsistent");
        }
        let families: Vec<&str> = self.families.iter().map(|family| family.as_ref()).collect();
        write!(
            f,
            "{} conflicting row(s) in [{}]",
            self.rows.len(),
            families.join(", ")
        )?;
        let shown: Vec<&str> = self.row_names().take(6).collect();
        write!(f, ": {}", shown.join(", "))?;
        if self.rows.len() > shown.len() {
            write!(f, ", ...")?;
        }
        if !self.irreducible {
            write!(f, " (not minimal: budget exhausted or a solve was inconclusive)")?;
        }
        Ok(())
    }
}

enum Stop {
    Budget,
    Solver(SolverError),
}

impl From<SolverError> for Stop {
    fn from(error: SolverError) -> Self {
        Stop::Solver(error)
    }
}

struct Oracle<'a> {
    backend: &'a dyn MipBackend,
    model: &'a ScheduleModel,
    settings: &'a SolveSettings,
    deadline: Option<Instant>,
    solves: usize,
    /// Cleared by the first inconclusive solve
    exact: bool,
}

impl Oracle<'_> {
    /// `false` only when the backend proved the rows infeasible.
    fn consistent(&mut self, rows: &[usize]) -> Result<bool, Stop> {
        if self.solves >= self.settings.iis_max_solves {
            return Err(Stop::Budget);
        }
        let mut settings = self.settings.clone();
        if let Some(deadline) = self.deadline {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(Stop::Budget);
            }
            settings.time_limit = Some(settings.time_limit.map_or(left, |limit| limit.min(left)));
        }

        self.solves += 1;
        let outcome = self
            .backend
            .optimize(self.model, &SolveRequest::feasibility(rows), &settings)?;
        match outcome {
            BackendOutcome::Infeasible => Ok(false),
            BackendOutcome::NoSolution => {
                debug!(rows = rows.len(), "inconclusive subset solve, keeping its rows");
                self.exact = false;
                Ok(true)
            }
            BackendOutcome::Solved { .. } | BackendOutcome::Unbounded => Ok(true),
        }
    }

    /// Minimal subset of `rows` that conflicts together with `background`.
    fn quickxplain(&mut self, background: &[usize], check: bool, rows: &[usize]) -> Result<Vec<usize>, Stop> {
        if check && !self.consistent(background)? {
            return Ok(Vec::new());
        }
        if rows.len() == 1 {
            return Ok(rows.to_vec());
        }
        let (left, right) = rows.split_at(rows.len() / 2);

        let with_left = concat(background, left);
        let right_part = self.quickxplain(&with_left, !left.is_empty(), right)?;

        let with_right = concat(background, &right_part);
        let left_part = self.quickxplain(&with_right, !right_part.is_empty(), left)?;

        Ok(concat(&left_part, &right_part))
    }
}

fn concat(a: &[usize], b: &[usize]) -> Vec<usize> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    out.extend_from_slice(a);
    out.extend_from_slice(b);
    out
}

fn rows_of_families(model: &ScheduleModel, families: &[RowFamily]) -> Vec<usize> {
    model
        .rows()
        .iter()
        .enumerate()
        .filter(|(_, row)| families.contains(&row.family))
        .map(|(index, _)| index)
        .collect()
}

/// Locate a conflicting row set of a model already known to be infeasible.
pub fn find_iis(
    backend: &dyn MipBackend,
    model: &ScheduleModel,
    settings: &SolveSettings,
) -> Result<IisReport, SolverError> {
    let mut oracle = Oracle {
        backend,
        model,
        settings,
        deadline: settings.iis_time_limit.map(|limit| Instant::now() + limit),
        solves: 0,
        exact: true,
    };

    let mut families: Vec<RowFamily> = Vec::new();
    for row in model.rows() {
        if !families.contains(&row.family) {
            families.push(row.family);
        }
    }

    // Stage 1: family deletion filter
    let mut position = 0;
    while position < families.len() {
        let mut without = families.clone();
        let removed = without.remove(position);
        match oracle.consistent(&rows_of_families(model, &without)) {
            Ok(false) => {
                debug!(family = %removed, "family not needed for the conflict");
                families = without;
            }
            Ok(true) => position += 1,
            Err(Stop::Budget) => {
                let rows = rows_of_families(model, &families);
                return Ok(IisReport::from_rows(model, &rows, false, oracle.solves));
            }
            Err(Stop::Solver(e)) => return Err(e),
        }
    }

    // Stage 2: QuickXplain over the surviving rows
    let candidate = rows_of_families(model, &families);
    debug!(families = ?families, rows = candidate.len(), "running quickxplain");
    if candidate.is_empty() {
        return Ok(IisReport::from_rows(model, &[], oracle.exact, oracle.solves));
    }
    match oracle.quickxplain(&[], false, &candidate) {
        Ok(mut rows) => {
            rows.sort_unstable();
            Ok(IisReport::from_rows(model, &rows, oracle.exact, oracle.solves))
        }
        Err(Stop::Budget) => Ok(IisReport::from_rows(model, &candidate, false, oracle.solves)),
        Err(Stop::Solver(e)) => Err(e),
    }
}
