use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::Validate;

use crate::domain::{IntervalLimits, VehicleSpec};
use crate::error::InputError;
use crate::optimizer::{BigM, Constraints, LimitBasis, SolveSettings};

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const ENV_PREFIX: &str = "BFS__";

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub solver: SolverConfig,
    #[validate(nested)]
    pub grid: GridConfig,
    #[validate(nested)]
    pub shifting: ShiftingConfig,
    #[validate(nested)]
    pub soc: SocConfig,
    #[validate(nested)]
    pub fleet: FleetConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SolverConfig {
    #[validate(range(min = 0.001))]
    pub time_limit_seconds: Option<f64>,
    #[validate(range(min = 0.0, max = 1.0))]
    pub mip_gap: Option<f64>,
    pub random_seed: Option<i32>,
    #[validate(range(min = 1))]
    pub threads: Option<u32>,
    pub verbose: bool,
    #[validate(range(min = 1))]
    pub iis_max_solves: usize,
    /// Wall clock budget of the whole infeasibility diagnosis
    #[validate(range(min = 0.001))]
    pub iis_time_limit_seconds: Option<f64>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            time_limit_seconds: None,
            mip_gap: None,
            random_seed: Some(42),
            threads: None,
            verbose: false,
            iis_max_solves: 400,
            iis_time_limit_seconds: Some(120.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GridConfig {
    pub upper_limit_kw: f64,
    pub lower_limit_kw: f64,
    pub limit_basis: LimitBasis,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            upper_limit_kw: 65.0,
            lower_limit_kw: 0.0,
            limit_basis: LimitBasis::Net,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ShiftingConfig {
    #[validate(range(min = 0.0, max = 1.0))]
    pub max_shift_fraction: f64,
    /// ±W intervals a load may move (72 = 18 h at 15 minutes)
    pub window_intervals: usize,
    #[validate(range(min = 1.0))]
    pub overload_factor: f64,
    #[validate(range(min = 1e-9))]
    pub flag_epsilon_kw: f64,
    /// Fixed big-M; unset derives it from the horizon
    #[validate(range(min = 0.0))]
    pub big_m: Option<f64>,
}

impl Default for ShiftingConfig {
    fn default() -> Self {
        Self {
            max_shift_fraction: 0.5,
            window_intervals: 72,
            overload_factor: 1.5,
            flag_epsilon_kw: 1e-3,
            big_m: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SocConfig {
    #[validate(range(min = 0.0, max = 100.0))]
    pub min_percent: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub max_percent: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub target_percent: f64,
}

impl Default for SocConfig {
    fn default() -> Self {
        Self {
            min_percent: 20.0,
            max_percent: 100.0,
            target_percent: 100.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct FleetConfig {
    #[validate(nested)]
    pub defaults: VehicleDefaults,
    /// Per-vehicle overrides keyed by vehicle id
    #[serde(default)]
    pub vehicles: BTreeMap<String, VehicleOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VehicleDefaults {
    #[validate(range(min = 0.1))]
    pub capacity_kwh: f64,
    #[validate(range(min = 0.0))]
    pub max_charge_kw: f64,
    #[validate(range(min = 0.01, max = 1.0))]
    pub efficiency: f64,
    #[validate(range(min = 0.01))]
    pub mileage_km_per_kwh: f64,
}

impl Default for VehicleDefaults {
    fn default() -> Self {
        let spec = VehicleSpec::default();
        Self {
            capacity_kwh: spec.capacity_kwh,
            max_charge_kw: spec.max_charge_kw,
            efficiency: spec.charge_efficiency,
            mileage_km_per_kwh: spec.mileage_km_per_kwh,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleOverride {
    pub capacity_kwh: Option<f64>,
    pub max_charge_kw: Option<f64>,
    pub efficiency: Option<f64>,
    pub mileage_km_per_kwh: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub write_lp: bool,
    pub write_csv: bool,
    pub write_json: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("results"),
            write_lp: true,
            write_csv: true,
            write_json: true,
        }
    }
}

impl Config {
    /// Built-in defaults, then the TOML file (if it exists), then `BFS__*` env vars.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        let config: Config = figment
            .extract()
            .with_context(|| format!("failed to load configuration from {}", path.display()))?;
        config.check()?;
        Ok(config)
    }

    /// Field ranges plus cross-field consistency.
    pub fn check(&self) -> Result<(), InputError> {
        self.validate()
            .map_err(|e| InputError::invalid("config", e.to_string().replace('\n', "; ")))?;

        if self.grid.lower_limit_kw > self.grid.upper_limit_kw {
            return Err(InputError::invalid(
                "grid",
                format!(
                    "lower_limit_kw {} exceeds upper_limit_kw {}",
                    self.grid.lower_limit_kw, self.grid.upper_limit_kw
                ),
            ));
        }
        for (id, vehicle) in &self.fleet.vehicles {
            self.vehicle_spec_from(vehicle).validate(id)?;
        }
        self.to_constraints().validate()
    }

    pub fn to_constraints(&self) -> Constraints {
        Constraints {
            min_soc_percent: self.soc.min_percent,
            max_soc_percent: self.soc.max_percent,
            target_soc_percent: self.soc.target_percent,
            shift_window: self.shifting.window_intervals,
            overload_factor: self.shifting.overload_factor,
            flag_epsilon_kw: self.shifting.flag_epsilon_kw,
            big_m: self.shifting.big_m.map_or(BigM::Derived, BigM::Fixed),
            limit_basis: self.grid.limit_basis,
        }
    }

    pub fn solve_settings(&self) -> SolveSettings {
        SolveSettings {
            time_limit: self.solver.time_limit_seconds.map(Duration::from_secs_f64),
            mip_gap: self.solver.mip_gap,
            random_seed: self.solver.random_seed,
            threads: self.solver.threads,
            verbose: self.solver.verbose,
            iis_max_solves: self.solver.iis_max_solves,
            iis_time_limit: self.solver.iis_time_limit_seconds.map(Duration::from_secs_f64),
        }
    }

    /// Constant limits; per-interval CSV columns replace them when present
    pub fn interval_limits(&self, len: usize) -> IntervalLimits {
        IntervalLimits::constant(
            len,
            self.shifting.max_shift_fraction,
            self.grid.upper_limit_kw,
            self.grid.lower_limit_kw,
        )
    }

    pub fn vehicle_spec(&self, id: &str) -> VehicleSpec {
        match self.fleet.vehicles.get(id) {
            Some(vehicle) => self.vehicle_spec_from(vehicle),
            None => self.vehicle_spec_from(&VehicleOverride::default()),
        }
    }

    fn vehicle_spec_from(&self, vehicle: &VehicleOverride) -> VehicleSpec {
        let defaults = &self.fleet.defaults;
        VehicleSpec {
            capacity_kwh: vehicle.capacity_kwh.unwrap_or(defaults.capacity_kwh),
            max_charge_kw: vehicle.max_charge_kw.unwrap_or(defaults.max_charge_kw),
            charge_efficiency: vehicle.efficiency.unwrap_or(defaults.efficiency),
            mileage_km_per_kwh: vehicle.mileage_km_per_kwh.unwrap_or(defaults.mileage_km_per_kwh),
        }
    }
}
