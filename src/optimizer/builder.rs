//! Translate a horizon and static constraints into the schedule MILP.
//!
//! Shifting is linearised with one continuous flow per sparse arc: the flow
//! carries the shifted amount along the chosen arc and is bounded by the
//! origin's capacity times the arc's assignment binary. The received load at
//! an interval is the sum of its inbound flows.

use tracing::{debug, info, warn};

use super::model::{LinExpr, Row, RowFamily, ScheduleModel, ScheduleVariables, Sense, VarId, VarKind, VarSpec};
use super::shifting::ShiftArcs;
use super::transitions::{classify, final_target_applies, PresenceTransition};
use super::{Constraints, LimitBasis};
use crate::domain::{Horizon, VehicleProfile};
use crate::error::InputError;

/// Above this many binaries solve times grow quickly
const LARGE_MODEL_BINARIES: usize = 50_000;

/// Keeps `hold_back` well defined when the shift capacity is zero
const HOLD_BACK_EPSILON: f64 = 1e-6;

/// LP-safe identifier for a vehicle id
pub(crate) fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Name tag per vehicle. Ids that needed sanitising carry their vehicle
/// index so `a-b` and `a_b` never share a variable or row name.
fn vehicle_tags(vehicles: &[VehicleProfile]) -> Vec<String> {
    vehicles
        .iter()
        .enumerate()
        .map(|(c, vehicle)| {
            let clean = sanitize(&vehicle.id);
            if clean == vehicle.id {
                clean
            } else {
                format!("{}#{}", clean, c)
            }
        })
        .collect()
}

#[derive(Default)]
struct Draft {
    vars: Vec<VarSpec>,
    rows: Vec<Row>,
}

impl Draft {
    fn var(&mut self, name: String, kind: VarKind, lower: f64, upper: f64) -> VarId {
        let id = VarId(self.vars.len());
        self.vars.push(VarSpec {
            name,
            kind,
            lower,
            upper,
        });
        id
    }

    #[allow(clippy::too_many_arguments)]
    fn row(
        &mut self,
        family: RowFamily,
        args: String,
        vehicle: Option<usize>,
        interval: Option<usize>,
        expr: LinExpr,
        sense: Sense,
        rhs: f64,
    ) {
        self.rows.push(Row {
            name: format!("{}({})", family, args),
            family,
            vehicle,
            interval,
            expr,
            sense,
            rhs,
        });
    }
}

pub struct ModelBuilder<'a> {
    constraints: &'a Constraints,
}

impl<'a> ModelBuilder<'a> {
    pub fn new(constraints: &'a Constraints) -> Self {
        Self { constraints }
    }

    pub fn build(&self, horizon: Horizon) -> Result<ScheduleModel, InputError> {
        self.constraints.validate()?;

        let energy = horizon.energy();
        let limits = horizon.limits();
        let arcs = ShiftArcs::enumerate(
            &energy.flexible_load_kw,
            &limits.max_shift_fraction,
            self.constraints.shift_window,
            self.constraints.overload_factor,
        );
        let big_m = self.constraints.big_m_for(arcs.max_origin_cap())?;

        let mut draft = Draft::default();
        let mut index = ScheduleVariables::default();

        let tags = vehicle_tags(horizon.vehicles());
        for (c, (vehicle, tag)) in horizon.vehicles().iter().zip(&tags).enumerate() {
            let (charge, soc) = self.add_vehicle(&mut draft, c, tag, vehicle);
            index.charge.push(charge);
            index.soc.push(soc);
        }

        self.add_shifting(&mut draft, &mut index, &horizon, &arcs, big_m);
        self.add_grid_limits(&mut draft, &index, &horizon, &arcs);
        let objective = Self::objective(&index, &horizon, &arcs);

        let model = ScheduleModel {
            constraints: self.constraints.clone(),
            vars: draft.vars,
            rows: draft.rows,
            objective,
            index,
            big_m,
            arcs,
            horizon,
        };

        info!(
            horizon = model.horizon.name(),
            intervals = model.horizon.len(),
            vehicles = model.horizon.vehicles().len(),
            variables = model.vars.len(),
            rows = model.rows.len(),
            binaries = model.binary_count(),
            arcs = model.arcs.len(),
            big_m = model.big_m,
            "schedule model built"
        );
        if model.binary_count() > LARGE_MODEL_BINARIES {
            warn!(
                binaries = model.binary_count(),
                "large assignment matrix; consider a narrower shift window or a time limit"
            );
        }

        Ok(model)
    }

    /// Charging and SOC variables of one vehicle plus its presence-driven rows.
    fn add_vehicle(&self, draft: &mut Draft, c: usize, tag: &str, vehicle: &VehicleProfile) -> (Vec<VarId>, Vec<VarId>) {
        let k = &self.constraints;
        let len = vehicle.present.len();
        let target = k.target_soc_percent;

        let charge: Vec<VarId> = (0..len)
            .map(|t| draft.var(format!("charge({},{})", tag, t), VarKind::Continuous, 0.0, f64::INFINITY))
            .collect();
        let soc: Vec<VarId> = (0..len)
            .map(|t| {
                draft.var(
                    format!("soc({},{})", tag, t),
                    VarKind::Continuous,
                    k.min_soc_percent,
                    k.max_soc_percent,
                )
            })
            .collect();

        for t in 0..len {
            let expr = LinExpr::new().term(charge[t], 1.0);
            let args = format!("{},{}", tag, t);
            if vehicle.is_present(t) {
                draft.row(RowFamily::ChargeWindow, args, Some(c), Some(t), expr, Sense::Le, vehicle.spec.max_charge_kw);
            } else {
                draft.row(RowFamily::ChargeWindow, args, Some(c), Some(t), expr, Sense::Eq, 0.0);
            }
        }

        if k.starts_full() {
            draft.row(
                RowFamily::InitialNoCharge,
                tag.to_string(),
                Some(c),
                Some(0),
                LinExpr::new().term(charge[0], 1.0),
                Sense::Eq,
                0.0,
            );
        }
        draft.row(
            RowFamily::InitialSoc,
            tag.to_string(),
            Some(c),
            Some(0),
            LinExpr::new().term(soc[0], 1.0),
            Sense::Eq,
            target,
        );

        let gain = vehicle.spec.soc_gain_per_kw();
        for (t, transition) in classify(&vehicle.present).into_iter().enumerate() {
            let args = format!("{},{}", tag, t);
            let hold = || LinExpr::new().term(soc[t], 1.0).term(soc[t - 1], -1.0);
            match transition {
                PresenceTransition::Initial => {}
                PresenceTransition::StayPresent => {
                    let expr = LinExpr::new()
                        .term(soc[t], 1.0)
                        .term(soc[t - 1], -1.0)
                        .term(charge[t], -gain);
                    draft.row(RowFamily::SocContinuity, args, Some(c), Some(t), expr, Sense::Eq, 0.0);
                }
                PresenceTransition::Depart => {
                    draft.row(
                        RowFamily::DepartureSoc,
                        format!("{},{}", tag, t - 1),
                        Some(c),
                        Some(t - 1),
                        LinExpr::new().term(soc[t - 1], 1.0),
                        Sense::Ge,
                        target,
                    );
                    draft.row(RowFamily::SocHoldAbsent, args, Some(c), Some(t), hold(), Sense::Eq, 0.0);
                }
                PresenceTransition::StayAbsent => {
                    draft.row(RowFamily::SocHoldAbsent, args, Some(c), Some(t), hold(), Sense::Eq, 0.0);
                }
                PresenceTransition::Arrive => {
                    let distance = vehicle.trip_distance_before(t);
                    let arrival = target - vehicle.spec.soc_used_for_trip(distance);
                    debug!(vehicle = %vehicle.id, t, distance, arrival, "arrival soc");
                    draft.row(
                        RowFamily::ArrivalSoc,
                        args.clone(),
                        Some(c),
                        Some(t),
                        LinExpr::new().term(soc[t], 1.0),
                        Sense::Eq,
                        arrival,
                    );
                    draft.row(
                        RowFamily::ArrivalMinSoc,
                        args,
                        Some(c),
                        Some(t),
                        LinExpr::new().term(soc[t], 1.0),
                        Sense::Ge,
                        k.min_soc_percent,
                    );
                }
            }
        }

        let last = len - 1;
        if final_target_applies(&vehicle.present) {
            draft.row(
                RowFamily::FinalSoc,
                tag.to_string(),
                Some(c),
                Some(last),
                LinExpr::new().term(soc[last], 1.0),
                Sense::Ge,
                target,
            );
        }

        (charge, soc)
    }

    /// Shift amounts, flags, offsets and the sparse assignment matrix.
    fn add_shifting(
        &self,
        draft: &mut Draft,
        index: &mut ScheduleVariables,
        horizon: &Horizon,
        arcs: &ShiftArcs,
        big_m: f64,
    ) {
        let k = &self.constraints;
        let window = k.shift_window as f64;
        let len = horizon.len();

        for t in 0..len {
            let cap = arcs.origin_cap(t);
            index
                .shift
                .push(draft.var(format!("shift({})", t), VarKind::Continuous, 0.0, f64::INFINITY));
            let flag_upper = if cap >= k.flag_epsilon_kw { 1.0 } else { 0.0 };
            index
                .flag
                .push(draft.var(format!("flag({})", t), VarKind::Binary, 0.0, flag_upper));
            index
                .offset
                .push(draft.var(format!("offset({})", t), VarKind::Integer, -window, window));
            index
                .stay
                .push(draft.var(format!("stay({})", t), VarKind::Binary, 0.0, 1.0));
        }
        for (i, arc) in arcs.arcs().iter().enumerate() {
            let args = format!("{},{}", arc.origin, arc.destination());
            index
                .route
                .push(draft.var(format!("route({})", args), VarKind::Binary, 0.0, 1.0));
            index
                .flow
                .push(draft.var(format!("flow({})", args), VarKind::Continuous, 0.0, arcs.arc_cap(i)));
        }

        for t in 0..len {
            let cap = arcs.origin_cap(t);
            let shift = index.shift[t];
            let flag = index.flag[t];
            let stay = index.stay[t];
            let args = || t.to_string();

            draft.row(RowFamily::ShiftCap, args(), None, Some(t), LinExpr::new().term(shift, 1.0), Sense::Le, cap);

            let mut assign = LinExpr::new().term(stay, 1.0);
            let mut conservation = LinExpr::new().term(shift, 1.0);
            let mut offset = LinExpr::new().term(index.offset[t], 1.0);
            for i in arcs.outbound(t) {
                let arc = arcs.arc(i);
                assign.add_term(index.route[i], 1.0);
                conservation.add_term(index.flow[i], -1.0);
                offset.add_term(index.route[i], -(arc.offset as f64));
                draft.row(
                    RowFamily::RouteLink,
                    format!("{},{}", arc.origin, arc.destination()),
                    None,
                    Some(t),
                    LinExpr::new().term(index.flow[i], 1.0).term(index.route[i], -cap),
                    Sense::Le,
                    0.0,
                );
            }
            draft.row(RowFamily::AssignOnce, args(), None, Some(t), assign, Sense::Eq, 1.0);
            draft.row(RowFamily::ShiftConservation, args(), None, Some(t), conservation, Sense::Eq, 0.0);

            let inbound = arcs.inbound(t);
            if !inbound.is_empty() {
                let mut received = LinExpr::new();
                for &i in inbound {
                    received.add_term(index.flow[i], 1.0);
                }
                draft.row(
                    RowFamily::DestinationOverload,
                    args(),
                    None,
                    Some(t),
                    received,
                    Sense::Le,
                    arcs.headroom(t),
                );
            }

            draft.row(
                RowFamily::FlagLink,
                args(),
                None,
                Some(t),
                LinExpr::new().term(shift, 1.0).term(flag, -big_m),
                Sense::Le,
                0.0,
            );
            draft.row(
                RowFamily::FlagFloor,
                args(),
                None,
                Some(t),
                LinExpr::new().term(shift, 1.0).term(flag, -k.flag_epsilon_kw),
                Sense::Ge,
                0.0,
            );
            draft.row(
                RowFamily::HoldBack,
                args(),
                None,
                Some(t),
                LinExpr::new().term(stay, 1.0).term(shift, 1.0 / (cap + HOLD_BACK_EPSILON)),
                Sense::Le,
                1.0,
            );
            draft.row(
                RowFamily::StayWhenIdle,
                args(),
                None,
                Some(t),
                LinExpr::new().term(stay, 1.0).term(flag, 1.0),
                Sense::Ge,
                1.0,
            );
            draft.row(RowFamily::OffsetDefinition, args(), None, Some(t), offset, Sense::Eq, 0.0);
        }
    }

    /// Composite load within the connection limits at every interval.
    fn add_grid_limits(&self, draft: &mut Draft, index: &ScheduleVariables, horizon: &Horizon, arcs: &ShiftArcs) {
        let energy = horizon.energy();
        let limits = horizon.limits();

        for t in 0..horizon.len() {
            let mut base = energy.fixed_load_kw[t] + energy.flexible_load_kw[t];
            if self.constraints.limit_basis == LimitBasis::Net {
                base -= energy.pv_generation_kw[t];
            }
            let variable = composite_terms(index, arcs, t);

            draft.row(
                RowFamily::GridUpper,
                t.to_string(),
                None,
                Some(t),
                variable.clone(),
                Sense::Le,
                limits.upper_limit_kw[t] - base,
            );
            draft.row(
                RowFamily::GridLower,
                t.to_string(),
                None,
                Some(t),
                variable,
                Sense::Ge,
                limits.lower_limit_kw[t] - base,
            );
        }
    }

    /// Price-weighted composite load including the PV credit.
    fn objective(index: &ScheduleVariables, horizon: &Horizon, arcs: &ShiftArcs) -> LinExpr {
        let energy = horizon.energy();
        let mut objective = LinExpr::new();
        for t in 0..horizon.len() {
            let price = energy.price_per_kwh[t];
            objective.add_constant(
                price * (energy.fixed_load_kw[t] + energy.flexible_load_kw[t] - energy.pv_generation_kw[t]),
            );
            for (var, coefficient) in composite_terms(index, arcs, t).terms() {
                objective.add_term(*var, price * coefficient);
            }
        }
        objective
    }
}

/// Decision-dependent part of the composite load at `t`:
/// inbound shifted load + fleet charging - outbound shifted load.
fn composite_terms(index: &ScheduleVariables, arcs: &ShiftArcs, t: usize) -> LinExpr {
    let mut expr = LinExpr::new().term(index.shift[t], -1.0);
    for &i in arcs.inbound(t) {
        expr.add_term(index.flow[i], 1.0);
    }
    for charge in &index.charge {
        expr.add_term(charge[t], 1.0);
    }
    expr
}
