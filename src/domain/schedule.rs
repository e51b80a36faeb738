use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::optimizer::SolveStatus;

/// Solved schedule for one horizon, ready for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub horizon: String,
    pub created_at: DateTime<Utc>,
    pub status: SolveStatus,
    pub objective: f64,
    pub entries: Vec<ScheduleEntry>,
    pub vehicles: Vec<VehicleTrajectory>,
    pub summary: ScheduleSummary,
    pub optimizer_version: String,
}

/// Power flows of one interval (kW unless noted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub index: usize,
    pub time_start: NaiveDateTime,
    pub fixed_kw: f64,
    pub flexible_kw: f64,
    pub pv_kw: f64,
    pub price: f64,
    /// Flexible load moved away from this interval
    pub shift_kw: f64,
    /// Offset in intervals the moved load travels (0 when nothing moves)
    pub shift_offset: i64,
    pub shift_destination: Option<usize>,
    /// Flexible load moved into this interval from elsewhere
    pub received_kw: f64,
    pub flexible_post_shift_kw: f64,
    pub fleet_charging_kw: f64,
    pub composite_kw: f64,
    pub composite_no_pv_kw: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleTrajectory {
    pub id: String,
    pub soc_percent: Vec<f64>,
    pub charge_kw: Vec<f64>,
}

impl VehicleTrajectory {
    /// Energy delivered at the plug over the horizon, in kW·interval units
    pub fn total_charge(&self) -> f64 {
        self.charge_kw.iter().sum()
    }
}

/// Shifted load grouped by how far it travelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftBin {
    pub offset_hours: f64,
    pub shifted_kw: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSummary {
    pub cost_with_pv: f64,
    pub cost_without_pv: f64,
    pub total_shifted_kw: f64,
    pub total_received_kw: f64,
    pub global_shift_cap_kw: f64,
    pub shifted_intervals: usize,
    pub peak_composite_kw: f64,
    pub fleet_charging_kw: f64,
    pub shift_histogram: Vec<ShiftBin>,
}

impl Schedule {
    pub fn vehicle(&self, id: &str) -> Option<&VehicleTrajectory> {
        self.vehicles.iter().find(|v| v.id == id)
    }
}
