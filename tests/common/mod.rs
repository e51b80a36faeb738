#![allow(dead_code)]
//! Horizon and scenario builders shared by the integration tests.

use building_flex_scheduler::domain::{EnergyProfile, Horizon, IntervalLimits, TimeGrid, VehicleProfile, VehicleSpec};
use chrono::{NaiveDate, NaiveDateTime};
use std::fs;
use std::path::Path;

pub fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 15)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// Constant fixed load, no vehicles.
pub fn building_only(fixed: f64, flexible: Vec<f64>, pv: f64, prices: Vec<f64>, limits: IntervalLimits) -> Horizon {
    let len = flexible.len();
    let energy = EnergyProfile::new(vec![fixed; len], flexible, vec![pv; len], prices);
    Horizon::new("building", TimeGrid::new(start(), len), energy, Vec::new(), limits).unwrap()
}

/// Flat building load with vehicles, no PV, constant price and limits.
pub fn flat(fixed: f64, flexible: f64, max_shift_fraction: f64, upper_kw: f64, len: usize, vehicles: Vec<VehicleProfile>) -> Horizon {
    let energy = EnergyProfile::new(vec![fixed; len], vec![flexible; len], vec![0.0; len], vec![0.2; len]);
    Horizon::new(
        "flat",
        TimeGrid::new(start(), len),
        energy,
        vehicles,
        IntervalLimits::constant(len, max_shift_fraction, upper_kw, 0.0),
    )
    .unwrap()
}

/// Vehicle away over `away` (inclusive range) with `distance_km` stamped on its first interval.
pub fn vehicle(id: &str, len: usize, away: std::ops::RangeInclusive<usize>, distance_km: f64) -> VehicleProfile {
    let present: Vec<bool> = (0..len).map(|t| !away.contains(&t)).collect();
    let mut trips = vec![0.0; len];
    trips[*away.start()] = distance_km;
    VehicleProfile::new(id, VehicleSpec::default(), present, trips)
}

/// Day-shaped horizon: cheap nights, expensive evening peak, midday PV.
pub fn day(len: usize, vehicles: Vec<VehicleProfile>) -> Horizon {
    let fixed: Vec<f64> = (0..len).map(|t| 12.0 + 6.0 * ((t % 24) as f64 / 24.0)).collect();
    let flexible: Vec<f64> = (0..len).map(|t| 4.0 + (t % 5) as f64).collect();
    let pv: Vec<f64> = (0..len)
        .map(|t| if (16..32).contains(&t) { 3.0 } else { 0.0 })
        .collect();
    let price: Vec<f64> = (0..len)
        .map(|t| match t {
            t if t < 12 => 0.12,
            t if (34..42).contains(&t) => 0.45,
            _ => 0.25,
        })
        .collect();
    let energy = EnergyProfile::new(fixed, flexible, pv, price);
    Horizon::new(
        "day",
        TimeGrid::new(start(), len),
        energy,
        vehicles,
        IntervalLimits::constant(len, 0.5, 65.0, 0.0),
    )
    .unwrap()
}

/// Write `building.csv` (and optionally `trip_log.csv`) for a 15 minute grid.
pub fn write_scenario(dir: &Path, fixed: &[f64], flexible: &[f64], price: &[f64], trip_log: Option<&str>) {
    let mut building = String::from("timestamp,fixed_kw,flexible_kw,pv_kw,price\n");
    for t in 0..fixed.len() {
        let ts = start() + chrono::Duration::minutes(15 * t as i64);
        building.push_str(&format!(
            "{},{},{},0,{}\n",
            ts.format("%Y-%m-%d %H:%M:%S"),
            fixed[t],
            flexible[t],
            price[t]
        ));
    }
    fs::write(dir.join("building.csv"), building).unwrap();
    if let Some(log) = trip_log {
        fs::write(dir.join("trip_log.csv"), log).unwrap();
    }
}
