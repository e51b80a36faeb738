use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::TimeGrid;
use crate::error::InputError;

fn check_non_negative(series: &str, values: &[f64]) -> Result<(), InputError> {
    for (index, value) in values.iter().copied().enumerate() {
        if !value.is_finite() {
            return Err(InputError::NonFinite {
                series: series.to_string(),
                index,
            });
        }
        if value < 0.0 {
            return Err(InputError::Negative {
                series: series.to_string(),
                index,
                value,
            });
        }
    }
    Ok(())
}

fn check_finite(series: &str, values: &[f64]) -> Result<(), InputError> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(InputError::NonFinite {
            series: series.to_string(),
            index,
        }),
        None => Ok(()),
    }
}

/// Building-side series for one horizon (kW, currency/kWh).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyProfile {
    pub fixed_load_kw: Vec<f64>,
    pub flexible_load_kw: Vec<f64>,
    pub pv_generation_kw: Vec<f64>,
    pub price_per_kwh: Vec<f64>,
}

impl EnergyProfile {
    pub fn new(
        fixed_load_kw: Vec<f64>,
        flexible_load_kw: Vec<f64>,
        pv_generation_kw: Vec<f64>,
        price_per_kwh: Vec<f64>,
    ) -> Self {
        Self {
            fixed_load_kw,
            flexible_load_kw,
            pv_generation_kw,
            price_per_kwh,
        }
    }

    /// Validate alignment with the grid and the sign of every value
    pub fn validate(&self, grid: &TimeGrid) -> Result<(), InputError> {
        for (name, values) in [
            ("fixed_kw", &self.fixed_load_kw),
            ("flexible_kw", &self.flexible_load_kw),
            ("pv_kw", &self.pv_generation_kw),
            ("price", &self.price_per_kwh),
        ] {
            grid.ensure_len(name, values.len())?;
            check_non_negative(name, values)?;
        }
        Ok(())
    }
}

/// Static battery and drivetrain attributes of one vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleSpec {
    pub capacity_kwh: f64,
    pub max_charge_kw: f64,
    pub charge_efficiency: f64,
    pub mileage_km_per_kwh: f64,
}

impl Default for VehicleSpec {
    fn default() -> Self {
        Self {
            capacity_kwh: 84.0,
            max_charge_kw: 11.0,
            charge_efficiency: 0.95,
            mileage_km_per_kwh: 6.28,
        }
    }
}

impl VehicleSpec {
    pub fn validate(&self, vehicle: &str) -> Result<(), InputError> {
        let positive = [
            ("capacity_kwh", self.capacity_kwh),
            ("mileage_km_per_kwh", self.mileage_km_per_kwh),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(InputError::invalid(
                    format!("{}.{}", vehicle, name),
                    format!("must be positive, got {}", value),
                ));
            }
        }
        if !self.max_charge_kw.is_finite() || self.max_charge_kw < 0.0 {
            return Err(InputError::invalid(
                format!("{}.max_charge_kw", vehicle),
                format!("must be non-negative, got {}", self.max_charge_kw),
            ));
        }
        if !(self.charge_efficiency > 0.0 && self.charge_efficiency <= 1.0) {
            return Err(InputError::invalid(
                format!("{}.charge_efficiency", vehicle),
                format!("must be in (0, 1], got {}", self.charge_efficiency),
            ));
        }
        Ok(())
    }

    /// SOC gained per kW charged over one interval of the model (percent).
    ///
    /// The continuity equation applies power directly per interval, so the
    /// factor is `efficiency * 100 / capacity`.
    pub fn soc_gain_per_kw(&self) -> f64 {
        self.charge_efficiency * 100.0 / self.capacity_kwh
    }

    /// SOC consumed by driving `distance_km` (percent).
    pub fn soc_used_for_trip(&self, distance_km: f64) -> f64 {
        (distance_km / self.mileage_km_per_kwh) * (100.0 / self.capacity_kwh)
    }
}

/// Availability and trips of one shared vehicle over the horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleProfile {
    pub id: String,
    pub spec: VehicleSpec,
    pub present: Vec<bool>,
    pub trip_distance_km: Vec<f64>,
}

impl VehicleProfile {
    pub fn new(id: impl Into<String>, spec: VehicleSpec, present: Vec<bool>, trip_distance_km: Vec<f64>) -> Self {
        Self {
            id: id.into(),
            spec,
            present,
            trip_distance_km,
        }
    }

    /// Build from raw numeric series, rejecting presence values other than 0/1.
    pub fn from_series(
        id: impl Into<String>,
        spec: VehicleSpec,
        presence: &[f64],
        trip_distance_km: Vec<f64>,
    ) -> Result<Self, InputError> {
        let id = id.into();
        let mut present = Vec::with_capacity(presence.len());
        for (index, value) in presence.iter().copied().enumerate() {
            if value == 1.0 {
                present.push(true);
            } else if value == 0.0 {
                present.push(false);
            } else {
                return Err(InputError::NonBinaryPresence {
                    vehicle: id,
                    index,
                    value,
                });
            }
        }
        Ok(Self::new(id, spec, present, trip_distance_km))
    }

    pub fn validate(&self, grid: &TimeGrid) -> Result<(), InputError> {
        self.spec.validate(&self.id)?;
        grid.ensure_len(&format!("presence[{}]", self.id), self.present.len())?;
        let trips = format!("trips[{}]", self.id);
        grid.ensure_len(&trips, self.trip_distance_km.len())?;
        check_non_negative(&trips, &self.trip_distance_km)?;

        for (index, (&present, &distance)) in self.present.iter().zip(&self.trip_distance_km).enumerate() {
            if present && distance > 0.0 {
                return Err(InputError::TripWhilePresent {
                    vehicle: self.id.clone(),
                    index,
                    distance,
                });
            }
        }
        Ok(())
    }

    pub fn is_present(&self, t: usize) -> bool {
        self.present[t]
    }

    /// Distance of the trip that ends right before the vehicle arrives at `arrival`.
    ///
    /// Sums the recorded distances over the whole absent run preceding the
    /// arrival interval, so it does not matter whether the trip log stamped the
    /// distance at the start or at the end of the trip.
    pub fn trip_distance_before(&self, arrival: usize) -> f64 {
        self.present[..arrival]
            .iter()
            .zip(&self.trip_distance_km[..arrival])
            .rev()
            .take_while(|(present, _)| !**present)
            .map(|(_, distance)| *distance)
            .sum()
    }
}

/// Per-interval operating limits: shifting share and grid connection bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalLimits {
    pub max_shift_fraction: Vec<f64>,
    pub upper_limit_kw: Vec<f64>,
    pub lower_limit_kw: Vec<f64>,
}

impl IntervalLimits {
    /// Same limits for every interval
    pub fn constant(len: usize, max_shift_fraction: f64, upper_limit_kw: f64, lower_limit_kw: f64) -> Self {
        Self {
            max_shift_fraction: vec![max_shift_fraction; len],
            upper_limit_kw: vec![upper_limit_kw; len],
            lower_limit_kw: vec![lower_limit_kw; len],
        }
    }

    pub fn validate(&self, grid: &TimeGrid) -> Result<(), InputError> {
        grid.ensure_len("max_shift_fraction", self.max_shift_fraction.len())?;
        grid.ensure_len("upper_limit_kw", self.upper_limit_kw.len())?;
        grid.ensure_len("lower_limit_kw", self.lower_limit_kw.len())?;
        check_non_negative("max_shift_fraction", &self.max_shift_fraction)?;
        check_finite("upper_limit_kw", &self.upper_limit_kw)?;
        check_finite("lower_limit_kw", &self.lower_limit_kw)?;

        if let Some(index) = self.max_shift_fraction.iter().position(|f| *f > 1.0) {
            return Err(InputError::invalid(
                format!("max_shift_fraction[{}]", index),
                "must not exceed 1.0",
            ));
        }
        for (index, (lower, upper)) in self.lower_limit_kw.iter().zip(&self.upper_limit_kw).enumerate() {
            if lower > upper {
                return Err(InputError::invalid(
                    format!("grid_limits[{}]", index),
                    format!("lower limit {} exceeds upper limit {}", lower, upper),
                ));
            }
        }
        Ok(())
    }
}

/// One fully validated scheduling horizon: the immutable input of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Horizon {
    name: String,
    grid: TimeGrid,
    energy: EnergyProfile,
    vehicles: Vec<VehicleProfile>,
    limits: IntervalLimits,
}

impl Horizon {
    pub fn new(
        name: impl Into<String>,
        grid: TimeGrid,
        energy: EnergyProfile,
        vehicles: Vec<VehicleProfile>,
        limits: IntervalLimits,
    ) -> Result<Self, InputError> {
        if grid.is_empty() {
            return Err(InputError::EmptyHorizon);
        }
        energy.validate(&grid)?;
        limits.validate(&grid)?;

        let mut seen = HashSet::new();
        for vehicle in &vehicles {
            if !seen.insert(vehicle.id.as_str()) {
                return Err(InputError::DuplicateVehicle(vehicle.id.clone()));
            }
            vehicle.validate(&grid)?;
        }

        Ok(Self {
            name: name.into(),
            grid,
            energy,
            vehicles,
            limits,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn grid(&self) -> &TimeGrid {
        &self.grid
    }

    pub fn energy(&self) -> &EnergyProfile {
        &self.energy
    }

    pub fn vehicles(&self) -> &[VehicleProfile] {
        &self.vehicles
    }

    pub fn limits(&self) -> &IntervalLimits {
        &self.limits
    }

    pub fn len(&self) -> usize {
        self.grid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grid.is_empty()
    }

    /// Shiftable power available at `t` (kW)
    pub fn shift_capacity(&self, t: usize) -> f64 {
        self.energy.flexible_load_kw[t] * self.limits.max_shift_fraction[t]
    }

    /// Theoretical cap on shifted load over the horizon: sum of per-interval capacities
    pub fn global_shift_cap(&self) -> f64 {
        (0..self.len()).map(|t| self.shift_capacity(t)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn grid(len: usize) -> TimeGrid {
        let start = NaiveDate::from_ymd_opt(2024, 7, 15)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        TimeGrid::new(start, len)
    }

    fn energy(len: usize) -> EnergyProfile {
        EnergyProfile::new(vec![5.0; len], vec![2.0; len], vec![0.0; len], vec![0.3; len])
    }

    #[test]
    fn test_soc_used_for_fifty_km_trip() {
        let spec = VehicleSpec::default();
        let used = spec.soc_used_for_trip(50.0);
        assert!((100.0 - used - 90.522).abs() < 1e-3, "arrival soc {}", 100.0 - used);
    }

    #[test]
    fn test_trip_distance_sums_absent_run() {
        let vehicle = VehicleProfile::new(
            "204E",
            VehicleSpec::default(),
            vec![true, false, false, false, true, false, true],
            vec![0.0, 30.0, 0.0, 12.0, 0.0, 7.0, 0.0],
        );
        assert_eq!(vehicle.trip_distance_before(4), 42.0);
        assert_eq!(vehicle.trip_distance_before(6), 7.0);
    }

    #[test]
    fn test_presence_must_be_binary() {
        let err = VehicleProfile::from_series("213E", VehicleSpec::default(), &[1.0, 0.5], vec![0.0, 0.0])
            .unwrap_err();
        assert!(matches!(err, InputError::NonBinaryPresence { index: 1, .. }));
    }

    #[test]
    fn test_trip_while_present_rejected() {
        let vehicle = VehicleProfile::new("288E", VehicleSpec::default(), vec![true, true], vec![0.0, 10.0]);
        let err = vehicle.validate(&grid(2)).unwrap_err();
        assert!(matches!(err, InputError::TripWhilePresent { index: 1, .. }));
    }

    #[test]
    fn test_horizon_rejects_misaligned_series() {
        let mut profile = energy(4);
        profile.pv_generation_kw.pop();
        let err = Horizon::new("week", grid(4), profile, vec![], IntervalLimits::constant(4, 0.5, 65.0, 0.0))
            .unwrap_err();
        assert_eq!(
            err,
            InputError::LengthMismatch {
                series: "pv_kw".to_string(),
                expected: 4,
                actual: 3
            }
        );
    }

    #[test]
    fn test_horizon_rejects_duplicate_vehicle() {
        let vehicle = VehicleProfile::new("349E", VehicleSpec::default(), vec![true; 4], vec![0.0; 4]);
        let err = Horizon::new(
            "week",
            grid(4),
            energy(4),
            vec![vehicle.clone(), vehicle],
            IntervalLimits::constant(4, 0.5, 65.0, 0.0),
        )
        .unwrap_err();
        assert_eq!(err, InputError::DuplicateVehicle("349E".to_string()));
    }

    #[test]
    fn test_horizon_rejects_inverted_limits() {
        let err = Horizon::new("week", grid(4), energy(4), vec![], IntervalLimits::constant(4, 0.5, 10.0, 20.0))
            .unwrap_err();
        assert!(matches!(err, InputError::InvalidParameter { .. }));
    }

    #[test]
    fn test_global_shift_cap() {
        let horizon = Horizon::new("week", grid(4), energy(4), vec![], IntervalLimits::constant(4, 0.5, 65.0, 0.0))
            .unwrap();
        assert_eq!(horizon.shift_capacity(0), 1.0);
        assert_eq!(horizon.global_shift_cap(), 4.0);
    }
}
