//! Decision values → [`Schedule`], with post-solve invariant checks.
//!
//! Every check recomputes its quantity from the raw values and the horizon
//! instead of trusting the rows of the model, so a modelling bug and a
//! solver precision problem both surface as [`SchedulerError::InvariantViolations`].

use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use uuid::Uuid;

use super::model::ScheduleModel;
use super::strategies::SolverRun;
use super::transitions::{classify, final_target_applies, PresenceTransition};
use super::{DecisionValues, LimitBasis};
use crate::domain::{Schedule, ScheduleEntry, ScheduleSummary, ShiftBin, VehicleTrajectory};
use crate::error::{InvariantKind, InvariantViolation, SchedulerError};

pub const OPTIMIZER_VERSION: &str = concat!("milp-highs-", env!("CARGO_PKG_VERSION"));

const ABS_TOLERANCE: f64 = 1e-4;
const REL_TOLERANCE: f64 = 1e-6;

/// Largest distance of a binary or integer decision from its integer value
const INTEGRALITY_TOLERANCE: f64 = 1e-5;

/// Values this close to zero are reported as zero
const SNAP: f64 = 1e-9;

fn snap(value: f64) -> f64 {
    if value.abs() < SNAP {
        0.0
    } else {
        value
    }
}

fn tolerance(bound: f64) -> f64 {
    ABS_TOLERANCE + REL_TOLERANCE * bound.abs()
}

#[derive(Default)]
struct Checker {
    violations: Vec<InvariantViolation>,
}

impl Checker {
    fn record(&mut self, kind: InvariantKind, interval: Option<usize>, vehicle: Option<&str>, observed: f64, bound: f64) {
        self.violations.push(InvariantViolation {
            kind,
            interval,
            vehicle: vehicle.map(str::to_string),
            observed,
            bound,
        });
    }

    fn le(&mut self, kind: InvariantKind, t: Option<usize>, vehicle: Option<&str>, observed: f64, bound: f64) {
        if observed > bound + tolerance(bound) {
            self.record(kind, t, vehicle, observed, bound);
        }
    }

    fn ge(&mut self, kind: InvariantKind, t: Option<usize>, vehicle: Option<&str>, observed: f64, bound: f64) {
        if observed < bound - tolerance(bound) {
            self.record(kind, t, vehicle, observed, bound);
        }
    }

    fn eq(&mut self, kind: InvariantKind, t: Option<usize>, vehicle: Option<&str>, observed: f64, bound: f64) {
        if (observed - bound).abs() > tolerance(bound) {
            self.record(kind, t, vehicle, observed, bound);
        }
    }

    /// `observed` must be an integer within `lower..=upper`.
    fn integral(&mut self, t: Option<usize>, observed: f64, lower: f64, upper: f64) {
        let nearest = observed.round().clamp(lower, upper);
        if (observed - nearest).abs() > INTEGRALITY_TOLERANCE {
            self.record(InvariantKind::Integrality, t, None, observed, nearest);
        }
    }
}

/// Per-interval quantities derived from the decision values.
struct Flows {
    shift: Vec<f64>,
    received: Vec<f64>,
    fleet: Vec<f64>,
    composite: Vec<f64>,
    composite_no_pv: Vec<f64>,
}

fn flows(model: &ScheduleModel, values: &DecisionValues) -> Flows {
    let horizon = model.horizon();
    let energy = horizon.energy();
    let index = model.index();
    let arcs = model.arcs();
    let len = horizon.len();

    let shift: Vec<f64> = index.shift.iter().map(|var| values.value(*var)).collect();
    let received: Vec<f64> = (0..len)
        .map(|t| arcs.inbound(t).iter().map(|&i| values.value(index.flow[i])).sum())
        .collect();
    let fleet: Vec<f64> = (0..len)
        .map(|t| index.charge.iter().map(|charge| values.value(charge[t])).sum())
        .collect();
    let composite_no_pv: Vec<f64> = (0..len)
        .map(|t| energy.fixed_load_kw[t] + energy.flexible_load_kw[t] - shift[t] + received[t] + fleet[t])
        .collect();
    let composite: Vec<f64> = (0..len)
        .map(|t| composite_no_pv[t] - energy.pv_generation_kw[t])
        .collect();

    Flows {
        shift,
        received,
        fleet,
        composite,
        composite_no_pv,
    }
}

pub fn extract(model: &ScheduleModel, run: &SolverRun) -> Result<Schedule, SchedulerError> {
    let values = &run.values;
    let horizon = model.horizon();
    let energy = horizon.energy();
    let grid = horizon.grid();
    let index = model.index();
    let arcs = model.arcs();
    let flows = flows(model, values);

    let violations = check_invariants(model, values, &flows, run.objective);
    if !violations.is_empty() {
        for violation in &violations {
            warn!(%violation, "post-solve invariant violated");
        }
        return Err(SchedulerError::InvariantViolations(violations));
    }

    let mut histogram: BTreeMap<i64, f64> = BTreeMap::new();
    let mut entries = Vec::with_capacity(horizon.len());
    for t in 0..horizon.len() {
        let destination = arcs
            .outbound(t)
            .find(|&i| values.is_set(index.route[i]))
            .map(|i| arcs.arc(i).destination());
        let offset = values.value(index.offset[t]).round() as i64;
        let shift = snap(flows.shift[t]);
        if shift > 0.0 {
            *histogram.entry(offset).or_default() += shift;
        }

        entries.push(ScheduleEntry {
            index: t,
            time_start: grid.timestamp(t),
            fixed_kw: energy.fixed_load_kw[t],
            flexible_kw: energy.flexible_load_kw[t],
            pv_kw: energy.pv_generation_kw[t],
            price: energy.price_per_kwh[t],
            shift_kw: shift,
            shift_offset: offset,
            shift_destination: destination,
            received_kw: snap(flows.received[t]),
            flexible_post_shift_kw: snap(energy.flexible_load_kw[t] - flows.shift[t] + flows.received[t]),
            fleet_charging_kw: snap(flows.fleet[t]),
            composite_kw: snap(flows.composite[t]),
            composite_no_pv_kw: snap(flows.composite_no_pv[t]),
        });
    }

    let vehicles: Vec<VehicleTrajectory> = horizon
        .vehicles()
        .iter()
        .enumerate()
        .map(|(c, vehicle)| VehicleTrajectory {
            id: vehicle.id.clone(),
            soc_percent: index.soc[c].iter().map(|var| snap(values.value(*var))).collect(),
            charge_kw: index.charge[c].iter().map(|var| snap(values.value(*var))).collect(),
        })
        .collect();

    let cost = |load: &[f64]| -> f64 {
        load.iter()
            .zip(&energy.price_per_kwh)
            .map(|(kw, price)| kw * price)
            .sum()
    };
    let summary = ScheduleSummary {
        cost_with_pv: cost(&flows.composite),
        cost_without_pv: cost(&flows.composite_no_pv),
        total_shifted_kw: snap(flows.shift.iter().sum()),
        total_received_kw: snap(flows.received.iter().sum()),
        global_shift_cap_kw: horizon.global_shift_cap(),
        shifted_intervals: index.flag.iter().filter(|var| values.is_set(**var)).count(),
        peak_composite_kw: flows.composite.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        fleet_charging_kw: snap(flows.fleet.iter().sum()),
        shift_histogram: histogram
            .into_iter()
            .map(|(offset, shifted_kw)| ShiftBin {
                offset_hours: grid.offset_hours(offset),
                shifted_kw,
            })
            .collect(),
    };

    debug!(
        cost_with_pv = summary.cost_with_pv,
        cost_without_pv = summary.cost_without_pv,
        shifted_intervals = summary.shifted_intervals,
        "schedule extracted"
    );

    Ok(Schedule {
        id: Uuid::new_v4(),
        horizon: horizon.name().to_string(),
        created_at: Utc::now(),
        status: run.status,
        objective: run.objective,
        entries,
        vehicles,
        summary,
        optimizer_version: OPTIMIZER_VERSION.to_string(),
    })
}

fn check_invariants(model: &ScheduleModel, values: &DecisionValues, flows: &Flows, objective: f64) -> Vec<InvariantViolation> {
    use InvariantKind::*;

    let horizon = model.horizon();
    let energy = horizon.energy();
    let limits = horizon.limits();
    let constraints = model.constraints();
    let index = model.index();
    let arcs = model.arcs();
    let window = constraints.shift_window as f64;
    let mut check = Checker::default();

    for t in 0..horizon.len() {
        let at = Some(t);
        let bounded = match constraints.limit_basis {
            LimitBasis::Net => flows.composite[t],
            LimitBasis::Gross => flows.composite_no_pv[t],
        };
        check.le(GridUpper, at, None, bounded, limits.upper_limit_kw[t]);
        check.ge(GridLower, at, None, bounded, limits.lower_limit_kw[t]);

        let shift = flows.shift[t];
        check.ge(ShiftBounds, at, None, shift, 0.0);
        check.le(ShiftBounds, at, None, shift, arcs.origin_cap(t));

        let stay = values.value(index.stay[t]);
        let routes: Vec<usize> = arcs.outbound(t).collect();
        check.integral(at, stay, 0.0, 1.0);
        check.integral(at, values.value(index.flag[t]), 0.0, 1.0);
        check.integral(at, values.value(index.offset[t]), -window, window);
        for &i in &routes {
            check.integral(at, values.value(index.route[i]), 0.0, 1.0);
            check.ge(NegativeFlow, at, None, values.value(index.flow[i]), 0.0);
        }

        let assigned = stay + routes.iter().map(|&i| values.value(index.route[i])).sum::<f64>();
        check.eq(AssignExactlyOne, at, None, assigned, 1.0);

        let carried: f64 = routes.iter().map(|&i| values.value(index.flow[i])).sum();
        check.eq(ShiftConservation, at, None, shift, carried);
        for &i in &routes {
            if !values.is_set(index.route[i]) {
                check.le(ShiftConservation, at, None, values.value(index.flow[i]), 0.0);
            }
        }

        if !arcs.inbound(t).is_empty() {
            check.le(DestinationOverload, at, None, flows.received[t], arcs.headroom(t));
        }

        let flagged = values.is_set(index.flag[t]);
        if flagged {
            check.ge(FlagConsistency, at, None, shift, constraints.flag_epsilon_kw);
            check.le(FlagConsistency, at, None, stay, 0.0);
        } else {
            check.le(FlagConsistency, at, None, shift, 0.0);
            check.ge(FlagConsistency, at, None, stay, 1.0);
        }

        let implied: f64 = routes
            .iter()
            .map(|&i| arcs.arc(i).offset as f64 * values.value(index.route[i]))
            .sum();
        check.eq(OffsetConsistency, at, None, values.value(index.offset[t]), implied);
    }

    let total_shift: f64 = flows.shift.iter().sum();
    let total_received: f64 = flows.received.iter().sum();
    check.eq(ShiftConservation, None, None, total_received, total_shift);

    for (c, vehicle) in horizon.vehicles().iter().enumerate() {
        let id = Some(vehicle.id.as_str());
        let soc: Vec<f64> = index.soc[c].iter().map(|var| values.value(*var)).collect();
        let charge: Vec<f64> = index.charge[c].iter().map(|var| values.value(*var)).collect();
        let target = constraints.target_soc_percent;
        let gain = vehicle.spec.soc_gain_per_kw();

        check.eq(InitialSoc, Some(0), id, soc[0], target);
        for t in 0..soc.len() {
            let at = Some(t);
            check.ge(NegativeFlow, at, id, charge[t], 0.0);
            check.ge(SocBounds, at, id, soc[t], constraints.min_soc_percent);
            check.le(SocBounds, at, id, soc[t], constraints.max_soc_percent);
            if vehicle.is_present(t) {
                check.le(ChargeAboveMax, at, id, charge[t], vehicle.spec.max_charge_kw);
            } else {
                check.le(ChargeWhileAbsent, at, id, charge[t].abs(), 0.0);
            }
        }

        for (t, transition) in classify(&vehicle.present).into_iter().enumerate() {
            let at = Some(t);
            match transition {
                PresenceTransition::Initial => {}
                PresenceTransition::StayPresent => {
                    check.eq(SocContinuity, at, id, soc[t], soc[t - 1] + gain * charge[t]);
                }
                PresenceTransition::Depart => {
                    check.ge(DepartureSoc, Some(t - 1), id, soc[t - 1], target);
                    check.eq(SocHeldWhileAway, at, id, soc[t], soc[t - 1]);
                }
                PresenceTransition::StayAbsent => {
                    check.eq(SocHeldWhileAway, at, id, soc[t], soc[t - 1]);
                }
                PresenceTransition::Arrive => {
                    let used = vehicle.spec.soc_used_for_trip(vehicle.trip_distance_before(t));
                    check.eq(ArrivalSoc, at, id, soc[t], target - used);
                }
            }
        }

        let last = soc.len() - 1;
        if final_target_applies(&vehicle.present) {
            check.ge(FinalSoc, Some(last), id, soc[last], target);
        }
    }

    let recomputed: f64 = flows
        .composite
        .iter()
        .zip(&energy.price_per_kwh)
        .map(|(kw, price)| kw * price)
        .sum();
    check.eq(ObjectiveMismatch, None, None, objective, recomputed);

    check.violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EnergyProfile, Horizon, IntervalLimits, TimeGrid, VehicleProfile, VehicleSpec};
    use crate::optimizer::builder::ModelBuilder;
    use crate::optimizer::{Constraints, SolveStatus};
    use chrono::NaiveDate;
    use std::time::Duration;

    /// Four intervals, 10 kW flexible each, one vehicle away at t = 1.
    fn model() -> ScheduleModel {
        let start = NaiveDate::from_ymd_opt(2024, 7, 15)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let vehicle = VehicleProfile::new(
            "204E",
            VehicleSpec::default(),
            vec![true, false, true, true],
            vec![0.0, 10.0, 0.0, 0.0],
        );
        let horizon = Horizon::new(
            "extract",
            TimeGrid::new(start, 4),
            EnergyProfile::new(vec![20.0; 4], vec![10.0; 4], vec![5.0; 4], vec![1.0, 0.1, 0.1, 0.1]),
            vec![vehicle],
            IntervalLimits::constant(4, 0.5, 65.0, 0.0),
        )
        .unwrap();
        ModelBuilder::new(&Constraints::default()).build(horizon).unwrap()
    }

    /// Hand-made solution: 5 kW moved from t = 0 to t = 1, vehicle recharges at t = 3.
    fn solution(model: &ScheduleModel) -> Vec<f64> {
        let index = model.index();
        let arcs = model.arcs();
        let mut values = vec![0.0; model.variables().len()];

        let spec = VehicleSpec::default();
        let arrival = 100.0 - spec.soc_used_for_trip(10.0);
        let soc = &index.soc[0];
        values[soc[0].index()] = 100.0;
        values[soc[1].index()] = 100.0;
        values[soc[2].index()] = arrival;
        values[soc[3].index()] = 100.0;
        values[index.charge[0][3].index()] = (100.0 - arrival) / spec.soc_gain_per_kw();

        for t in 0..4 {
            values[index.stay[t].index()] = 1.0;
        }
        let arc = arcs
            .outbound(0)
            .find(|&i| arcs.arc(i).destination() == 1)
            .unwrap();
        values[index.stay[0].index()] = 0.0;
        values[index.route[arc].index()] = 1.0;
        values[index.flow[arc].index()] = 5.0;
        values[index.shift[0].index()] = 5.0;
        values[index.flag[0].index()] = 1.0;
        values[index.offset[0].index()] = 1.0;
        values
    }

    fn run(model: &ScheduleModel, values: Vec<f64>) -> SolverRun {
        let objective = model.objective().eval(&values);
        SolverRun {
            status: SolveStatus::Optimal,
            values: DecisionValues::new(values),
            objective,
            elapsed: Duration::from_millis(1),
            lp_path: None,
        }
    }

    #[test]
    fn test_extract_derived_series() {
        let model = model();
        let values = solution(&model);
        assert!(model.max_violation(&values) < 1e-9);

        let schedule = extract(&model, &run(&model, values)).unwrap();
        let first = &schedule.entries[0];
        assert_eq!(first.shift_kw, 5.0);
        assert_eq!(first.shift_offset, 1);
        assert_eq!(first.shift_destination, Some(1));
        assert_eq!(first.flexible_post_shift_kw, 5.0);
        assert_eq!(first.composite_kw, 20.0);
        assert_eq!(first.composite_no_pv_kw, 25.0);

        let second = &schedule.entries[1];
        assert_eq!(second.received_kw, 5.0);
        assert_eq!(second.flexible_post_shift_kw, 15.0);
        assert_eq!(second.shift_destination, None);

        assert_eq!(schedule.summary.total_shifted_kw, 5.0);
        assert_eq!(schedule.summary.total_received_kw, 5.0);
        assert_eq!(schedule.summary.global_shift_cap_kw, 20.0);
        assert_eq!(schedule.summary.shifted_intervals, 1);
        assert_eq!(schedule.summary.shift_histogram, vec![ShiftBin { offset_hours: 0.25, shifted_kw: 5.0 }]);
        assert!((schedule.summary.cost_without_pv - schedule.summary.cost_with_pv - 5.0 * 1.3).abs() < 1e-9);
        assert!((schedule.objective - schedule.summary.cost_with_pv).abs() < 1e-9);
    }

    #[test]
    fn test_charge_while_absent_is_reported() {
        let model = model();
        let mut values = solution(&model);
        values[model.index().charge[0][1].index()] = 3.0;

        let err = extract(&model, &run(&model, values)).unwrap_err();
        let SchedulerError::InvariantViolations(violations) = err else {
            panic!("expected invariant violations");
        };
        assert!(violations
            .iter()
            .any(|v| v.kind == InvariantKind::ChargeWhileAbsent && v.interval == Some(1)));
    }

    #[test]
    fn test_shift_above_cap_is_reported() {
        let model = model();
        let mut values = solution(&model);
        let index = model.index();
        let arc = model
            .arcs()
            .outbound(0)
            .find(|&i| model.arcs().arc(i).destination() == 1)
            .unwrap();
        values[index.shift[0].index()] = 6.0;
        values[index.flow[arc].index()] = 6.0;

        let err = extract(&model, &run(&model, values)).unwrap_err();
        let SchedulerError::InvariantViolations(violations) = err else {
            panic!("expected invariant violations");
        };
        assert!(violations
            .iter()
            .any(|v| v.kind == InvariantKind::ShiftBounds && v.observed == 6.0 && v.bound == 5.0));
    }

    #[test]
    fn test_objective_mismatch_is_reported() {
        let model = model();
        let values = solution(&model);
        let mut run = run(&model, values);
        run.objective += 1.0;

        let err = extract(&model, &run).unwrap_err();
        assert!(err.to_string().contains("objective_mismatch"));
    }

    #[test]
    fn test_tolerance_absorbs_solver_noise() {
        let model = model();
        let mut values = solution(&model);
        values[model.index().soc[0][1].index()] = 100.0 + 5e-7;
        values[model.index().stay[2].index()] = 0.999_999_9;
        assert!(extract(&model, &run(&model, values)).is_ok());
    }

    fn violations_of(model: &ScheduleModel, values: Vec<f64>) -> Vec<InvariantViolation> {
        match extract(model, &run(model, values)) {
            Err(SchedulerError::InvariantViolations(violations)) => violations,
            other => panic!("expected invariant violations, got {:?}", other.map(|s| s.objective)),
        }
    }

    fn arc_to(model: &ScheduleModel, origin: usize, destination: usize) -> usize {
        model
            .arcs()
            .outbound(origin)
            .find(|&i| model.arcs().arc(i).destination() == destination)
            .unwrap()
    }

    #[test]
    fn test_fractional_routing_is_reported() {
        let model = model();
        let mut values = solution(&model);
        let index = model.index();
        // 0.6 + 0.4 still sums to one and the offset matches the blend
        values[index.route[arc_to(&model, 0, 1)].index()] = 0.6;
        values[index.route[arc_to(&model, 0, 2)].index()] = 0.4;
        values[index.offset[0].index()] = 1.4;

        let violations = violations_of(&model, values);
        let fractional: Vec<f64> = violations
            .iter()
            .filter(|v| v.kind == InvariantKind::Integrality && v.interval == Some(0))
            .map(|v| v.observed)
            .collect();
        assert_eq!(fractional.len(), 3, "{:?}", violations);
        assert!(fractional.contains(&1.4));
        assert!(!violations.iter().any(|v| v.kind == InvariantKind::AssignExactlyOne));
    }

    #[test]
    fn test_fractional_flag_is_reported() {
        let model = model();
        let mut values = solution(&model);
        values[model.index().flag[2].index()] = 0.3;

        let violations = violations_of(&model, values);
        assert!(violations
            .iter()
            .any(|v| v.kind == InvariantKind::Integrality && v.interval == Some(2) && v.observed == 0.3));
    }

    #[test]
    fn test_negative_charge_is_reported() {
        let model = model();
        let mut values = solution(&model);
        values[model.index().charge[0][2].index()] = -1.0;

        let violations = violations_of(&model, values);
        assert!(violations.iter().any(|v| v.kind == InvariantKind::NegativeFlow
            && v.interval == Some(2)
            && v.vehicle.as_deref() == Some("204E")));
    }

    #[test]
    fn test_negative_flow_is_reported() {
        let model = model();
        let mut values = solution(&model);
        values[model.index().flow[arc_to(&model, 0, 2)].index()] = -0.5;

        let violations = violations_of(&model, values);
        assert!(violations
            .iter()
            .any(|v| v.kind == InvariantKind::NegativeFlow && v.interval == Some(0) && v.observed == -0.5));
    }
}
