//! CSV loading of one scenario into a validated [`Horizon`].
//!
//! A scenario directory holds:
//! - `building.csv`: `timestamp,fixed_kw,flexible_kw,pv_kw,price` plus the
//!   optional per-interval columns `max_shift_fraction`, `upper_limit_kw`,
//!   `lower_limit_kw`
//! - either `presence.csv` and `trips.csv`, wide tables with a `timestamp`
//!   column and one column per vehicle (empty trip cells count as 0 km),
//! - or `trip_log.csv`: `vehicle,departure_time,arrival_time,distance_km`,
//!   turned into presence and distance series on the building grid.

use chrono::{Duration, NaiveDateTime, Timelike};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::Config;
use crate::domain::{EnergyProfile, Horizon, IntervalLimits, TimeGrid, VehicleProfile};
use crate::error::InputError;

const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
}

fn read_error(source_name: &str, reason: impl Into<String>) -> InputError {
    InputError::Read {
        source_name: source_name.to_string(),
        reason: reason.into(),
    }
}

fn timestamp_of(source_name: &str, row: usize, raw: &str) -> Result<NaiveDateTime, InputError> {
    parse_timestamp(raw).ok_or_else(|| read_error(source_name, format!("row {}: invalid timestamp '{}'", row + 1, raw)))
}

/// Building-side columns of a scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildingSeries {
    pub timestamps: Vec<NaiveDateTime>,
    pub energy: EnergyProfile,
    pub max_shift_fraction: Option<Vec<f64>>,
    pub upper_limit_kw: Option<Vec<f64>>,
    pub lower_limit_kw: Option<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
struct BuildingRecord {
    timestamp: String,
    fixed_kw: f64,
    flexible_kw: f64,
    pv_kw: f64,
    price: f64,
    #[serde(default)]
    max_shift_fraction: Option<f64>,
    #[serde(default)]
    upper_limit_kw: Option<f64>,
    #[serde(default)]
    lower_limit_kw: Option<f64>,
}

/// An optional column is used only when every row fills it.
fn optional_column(source_name: &str, column: &str, cells: Vec<Option<f64>>) -> Result<Option<Vec<f64>>, InputError> {
    let filled = cells.iter().filter(|cell| cell.is_some()).count();
    if filled == 0 {
        Ok(None)
    } else if filled == cells.len() {
        Ok(Some(cells.into_iter().flatten().collect()))
    } else {
        Err(read_error(
            source_name,
            format!("column '{}' is filled in {} of {} rows", column, filled, cells.len()),
        ))
    }
}

pub fn read_building<R: Read>(reader: R, source_name: &str) -> Result<BuildingSeries, InputError> {
    let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let mut timestamps = Vec::new();
    let (mut fixed, mut flexible, mut pv, mut price) = (Vec::new(), Vec::new(), Vec::new(), Vec::new());
    let (mut fraction, mut upper, mut lower) = (Vec::new(), Vec::new(), Vec::new());

    for (row, record) in csv.deserialize::<BuildingRecord>().enumerate() {
        let record = record.map_err(|e| read_error(source_name, e.to_string()))?;
        timestamps.push(timestamp_of(source_name, row, &record.timestamp)?);
        fixed.push(record.fixed_kw);
        flexible.push(record.flexible_kw);
        pv.push(record.pv_kw);
        price.push(record.price);
        fraction.push(record.max_shift_fraction);
        upper.push(record.upper_limit_kw);
        lower.push(record.lower_limit_kw);
    }

    Ok(BuildingSeries {
        timestamps,
        energy: EnergyProfile::new(fixed, flexible, pv, price),
        max_shift_fraction: optional_column(source_name, "max_shift_fraction", fraction)?,
        upper_limit_kw: optional_column(source_name, "upper_limit_kw", upper)?,
        lower_limit_kw: optional_column(source_name, "lower_limit_kw", lower)?,
    })
}

/// A `timestamp` column followed by one numeric column per vehicle.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleTable {
    pub timestamps: Vec<NaiveDateTime>,
    pub columns: BTreeMap<String, Vec<f64>>,
}

pub fn read_vehicle_table<R: Read>(reader: R, source_name: &str, empty_as_zero: bool) -> Result<VehicleTable, InputError> {
    let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = csv.headers().map_err(|e| read_error(source_name, e.to_string()))?.clone();

    let time_column = headers
        .iter()
        .position(|h| h == "timestamp" || h == "time")
        .ok_or_else(|| read_error(source_name, "missing 'timestamp' column"))?;
    let vehicles: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != time_column)
        .map(|(i, h)| (i, h.to_string()))
        .collect();

    let mut table = VehicleTable {
        timestamps: Vec::new(),
        columns: BTreeMap::new(),
    };
    for (_, id) in &vehicles {
        if table.columns.insert(id.clone(), Vec::new()).is_some() {
            return Err(InputError::DuplicateVehicle(id.clone()));
        }
    }

    for (row, record) in csv.records().enumerate() {
        let record = record.map_err(|e| read_error(source_name, e.to_string()))?;
        table
            .timestamps
            .push(timestamp_of(source_name, row, record.get(time_column).unwrap_or(""))?);
        for (column, id) in &vehicles {
            let cell = record.get(*column).unwrap_or("");
            let value = if cell.is_empty() && empty_as_zero {
                0.0
            } else {
                cell.parse::<f64>().map_err(|_| {
                    read_error(
                        source_name,
                        format!("row {}: vehicle '{}' has non-numeric value '{}'", row + 1, id, cell),
                    )
                })?
            };
            if let Some(series) = table.columns.get_mut(id) {
                series.push(value);
            }
        }
    }
    Ok(table)
}

/// One recorded trip of a vehicle.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TripRecord {
    pub vehicle: String,
    pub departure_time: String,
    pub arrival_time: String,
    pub distance_km: f64,
}

pub fn read_trip_log<R: Read>(reader: R, source_name: &str) -> Result<Vec<TripRecord>, InputError> {
    let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    csv.deserialize()
        .map(|record| record.map_err(|e: csv::Error| read_error(source_name, e.to_string())))
        .collect()
}

/// Round to the nearest grid step; exact halves round up.
pub fn round_to_step(ts: NaiveDateTime, step_minutes: i64) -> NaiveDateTime {
    let floor = ts.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(ts);
    let minute = i64::from(floor.minute());
    let below = minute % step_minutes;
    let base = floor - Duration::minutes(below);
    if below * 2 >= step_minutes {
        base + Duration::minutes(step_minutes)
    } else {
        base
    }
}

/// Presence (1 = home) and distance series of every vehicle in a trip log.
///
/// Trip endpoints are rounded to the grid; the vehicle is away from the
/// departure interval through the arrival interval inclusive and the trip
/// distance is stamped at the first away interval.
pub fn series_from_trip_log(
    grid: &TimeGrid,
    trips: &[TripRecord],
    source_name: &str,
) -> Result<BTreeMap<String, (Vec<f64>, Vec<f64>)>, InputError> {
    let mut out: BTreeMap<String, (Vec<f64>, Vec<f64>)> = BTreeMap::new();

    for (row, trip) in trips.iter().enumerate() {
        let departure = round_to_step(timestamp_of(source_name, row, &trip.departure_time)?, grid.step_minutes());
        let arrival = round_to_step(timestamp_of(source_name, row, &trip.arrival_time)?, grid.step_minutes());
        if arrival < departure {
            return Err(read_error(source_name, format!("row {}: arrival before departure", row + 1)));
        }

        let (presence, distance) = out
            .entry(trip.vehicle.clone())
            .or_insert_with(|| (vec![1.0; grid.len()], vec![0.0; grid.len()]));

        let mut first_away = None;
        for (t, ts) in grid.timestamps().enumerate() {
            if ts >= departure && ts <= arrival {
                presence[t] = 0.0;
                first_away.get_or_insert(t);
            }
        }
        match first_away {
            Some(t) => distance[t] += trip.distance_km,
            None => debug!(vehicle = %trip.vehicle, row, "trip outside the horizon ignored"),
        }
    }
    Ok(out)
}

/// File locations of one scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioFiles {
    pub name: String,
    pub building: PathBuf,
    pub presence: PathBuf,
    pub trips: PathBuf,
    pub trip_log: PathBuf,
}

impl ScenarioFiles {
    pub fn in_dir(dir: &Path) -> Self {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "scenario".to_string());
        Self {
            name,
            building: dir.join("building.csv"),
            presence: dir.join("presence.csv"),
            trips: dir.join("trips.csv"),
            trip_log: dir.join("trip_log.csv"),
        }
    }
}

fn open(path: &Path) -> Result<File, InputError> {
    File::open(path).map_err(|e| read_error(&path.display().to_string(), e.to_string()))
}

/// Load and validate a scenario; any misalignment is an [`InputError`].
pub fn load_horizon(files: &ScenarioFiles, config: &Config) -> Result<Horizon, InputError> {
    let building_name = files.building.display().to_string();
    let building = read_building(open(&files.building)?, &building_name)?;
    let grid = TimeGrid::from_timestamps(&building.timestamps)?;

    let vehicle_series: BTreeMap<String, (Vec<f64>, Vec<f64>)> = if files.presence.exists() {
        let presence_name = files.presence.display().to_string();
        let trips_name = files.trips.display().to_string();
        let presence = read_vehicle_table(open(&files.presence)?, &presence_name, false)?;
        let mut trips = read_vehicle_table(open(&files.trips)?, &trips_name, true)?;
        grid.ensure_aligned("presence", &presence.timestamps)?;
        grid.ensure_aligned("trips", &trips.timestamps)?;

        if let Some(extra) = trips.columns.keys().find(|id| !presence.columns.contains_key(*id)) {
            return Err(InputError::MissingVehicle {
                vehicle: extra.clone(),
                series: "presence".to_string(),
            });
        }
        let mut series = BTreeMap::new();
        for (id, present) in presence.columns {
            let distance = trips.columns.remove(&id).ok_or_else(|| InputError::MissingVehicle {
                vehicle: id.clone(),
                series: "trips".to_string(),
            })?;
            series.insert(id, (present, distance));
        }
        series
    } else if files.trip_log.exists() {
        let log_name = files.trip_log.display().to_string();
        let log = read_trip_log(open(&files.trip_log)?, &log_name)?;
        series_from_trip_log(&grid, &log, &log_name)?
    } else {
        return Err(read_error(
            &files.presence.display().to_string(),
            "neither presence.csv nor trip_log.csv found",
        ));
    };

    let mut vehicles = Vec::with_capacity(vehicle_series.len());
    for (id, (presence, distance)) in vehicle_series {
        let spec = config.vehicle_spec(&id);
        vehicles.push(VehicleProfile::from_series(id, spec, &presence, distance)?);
    }

    let mut limits: IntervalLimits = config.interval_limits(grid.len());
    if let Some(fraction) = building.max_shift_fraction {
        limits.max_shift_fraction = fraction;
    }
    if let Some(upper) = building.upper_limit_kw {
        limits.upper_limit_kw = upper;
    }
    if let Some(lower) = building.lower_limit_kw {
        limits.lower_limit_kw = lower;
    }

    let horizon = Horizon::new(files.name.clone(), grid, building.energy, vehicles, limits)?;
    info!(
        scenario = %files.name,
        intervals = horizon.len(),
        vehicles = horizon.vehicles().len(),
        start = %horizon.grid().start(),
        "scenario loaded"
    );
    Ok(horizon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;

    const BUILDING: &str = "\
timestamp,fixed_kw,flexible_kw,pv_kw,price
2024-01-15 00:00:00,20.0,4.0,0.0,0.31
2024-01-15 00:15:00,21.5,4.0,0.0,0.30
2024-01-15 00:30:00,19.0,3.5,0.0,0.29
2024-01-15 00:45:00,18.0,3.0,1.0,0.29
";

    #[rstest]
    #[case("2024-01-15 00:15:00")]
    #[case("2024-01-15T00:15:00")]
    #[case("2024-01-15 00:15")]
    fn test_parse_timestamp_formats(#[case] raw: &str) {
        let ts = parse_timestamp(raw).unwrap();
        assert_eq!(ts.minute(), 15);
    }

    #[rstest]
    #[case("2024-01-15 07:07:00", "2024-01-15 07:00:00")]
    #[case("2024-01-15 07:08:00", "2024-01-15 07:15:00")]
    #[case("2024-01-15 07:53:30", "2024-01-15 08:00:00")]
    fn test_round_to_step(#[case] raw: &str, #[case] expected: &str) {
        let rounded = round_to_step(parse_timestamp(raw).unwrap(), 15);
        assert_eq!(rounded, parse_timestamp(expected).unwrap());
    }

    #[test]
    fn test_read_building_without_optional_columns() {
        let series = read_building(BUILDING.as_bytes(), "building.csv").unwrap();
        assert_eq!(series.timestamps.len(), 4);
        assert_eq!(series.energy.fixed_load_kw[1], 21.5);
        assert_eq!(series.energy.pv_generation_kw[3], 1.0);
        assert!(series.max_shift_fraction.is_none());
        assert!(series.upper_limit_kw.is_none());
    }

    #[test]
    fn test_read_building_with_limit_columns() {
        let data = "\
timestamp,fixed_kw,flexible_kw,pv_kw,price,upper_limit_kw
2024-01-15 00:00:00,20.0,4.0,0.0,0.31,60
2024-01-15 00:15:00,21.5,4.0,0.0,0.30,55
";
        let series = read_building(data.as_bytes(), "building.csv").unwrap();
        assert_eq!(series.upper_limit_kw, Some(vec![60.0, 55.0]));
        assert!(series.lower_limit_kw.is_none());
    }

    #[test]
    fn test_partially_filled_optional_column_rejected() {
        let data = "\
timestamp,fixed_kw,flexible_kw,pv_kw,price,max_shift_fraction
2024-01-15 00:00:00,20.0,4.0,0.0,0.31,0.5
2024-01-15 00:15:00,21.5,4.0,0.0,0.30,
";
        let err = read_building(data.as_bytes(), "building.csv").unwrap_err();
        assert!(matches!(err, InputError::Read { .. }));
    }

    #[test]
    fn test_vehicle_table_empty_cells() {
        let data = "\
timestamp,204E,213E
2024-01-15 00:00:00,,12.5
2024-01-15 00:15:00,3,
";
        let table = read_vehicle_table(data.as_bytes(), "trips.csv", true).unwrap();
        assert_eq!(table.columns["204E"], vec![0.0, 3.0]);
        assert_eq!(table.columns["213E"], vec![12.5, 0.0]);

        let err = read_vehicle_table(data.as_bytes(), "presence.csv", false).unwrap_err();
        assert!(err.to_string().contains("non-numeric"));
    }

    #[test]
    fn test_trip_log_marks_absence() {
        let start = parse_timestamp("2024-01-15 00:00").unwrap();
        let grid = TimeGrid::new(start, 8);
        let trips = vec![TripRecord {
            vehicle: "ROW-E 397E".to_string(),
            departure_time: "2024-01-15 00:29:00".to_string(),
            arrival_time: "2024-01-15 01:04:00".to_string(),
            distance_km: 23.0,
        }];
        let series = series_from_trip_log(&grid, &trips, "trip_log.csv").unwrap();
        let (presence, distance) = &series["ROW-E 397E"];
        // departure rounds to 00:30, arrival to 01:00
        assert_eq!(presence, &vec![1.0, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        assert_eq!(distance, &vec![0.0, 0.0, 23.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    }

    fn write_scenario(dir: &Path, presence: &str, trips: &str) {
        fs::write(dir.join("building.csv"), BUILDING).unwrap();
        fs::write(dir.join("presence.csv"), presence).unwrap();
        fs::write(dir.join("trips.csv"), trips).unwrap();
    }

    #[test]
    fn test_load_horizon() {
        let dir = tempfile::tempdir().unwrap();
        write_scenario(
            dir.path(),
            "timestamp,204E\n2024-01-15 00:00:00,1\n2024-01-15 00:15:00,0\n2024-01-15 00:30:00,1\n2024-01-15 00:45:00,1\n",
            "timestamp,204E\n2024-01-15 00:00:00,\n2024-01-15 00:15:00,12\n2024-01-15 00:30:00,\n2024-01-15 00:45:00,\n",
        );
        let horizon = load_horizon(&ScenarioFiles::in_dir(dir.path()), &Config::default()).unwrap();
        assert_eq!(horizon.len(), 4);
        assert_eq!(horizon.vehicles()[0].present, vec![true, false, true, true]);
        assert_eq!(horizon.limits().upper_limit_kw, vec![65.0; 4]);
    }

    #[test]
    fn test_load_horizon_rejects_misaligned_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        write_scenario(
            dir.path(),
            "timestamp,204E\n2024-01-15 00:00:00,1\n2024-01-15 00:15:00,1\n2024-01-15 00:30:00,1\n2024-01-15 01:00:00,1\n",
            "timestamp,204E\n2024-01-15 00:00:00,\n2024-01-15 00:15:00,\n2024-01-15 00:30:00,\n2024-01-15 00:45:00,\n",
        );
        let err = load_horizon(&ScenarioFiles::in_dir(dir.path()), &Config::default()).unwrap_err();
        assert!(matches!(err, InputError::TimestampMismatch { index: 3, .. }));
    }

    #[test]
    fn test_load_horizon_rejects_unknown_trip_vehicle() {
        let dir = tempfile::tempdir().unwrap();
        write_scenario(
            dir.path(),
            "timestamp,204E\n2024-01-15 00:00:00,1\n2024-01-15 00:15:00,1\n2024-01-15 00:30:00,1\n2024-01-15 00:45:00,1\n",
            "timestamp,204E,999E\n2024-01-15 00:00:00,,\n2024-01-15 00:15:00,,\n2024-01-15 00:30:00,,\n2024-01-15 00:45:00,,\n",
        );
        let err = load_horizon(&ScenarioFiles::in_dir(dir.path()), &Config::default()).unwrap_err();
        assert_eq!(
            err,
            InputError::MissingVehicle {
                vehicle: "999E".to_string(),
                series: "presence".to_string()
            }
        );
    }

    #[test]
    fn test_load_horizon_rejects_hourly_series() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("building.csv"),
            "timestamp,fixed_kw,flexible_kw,pv_kw,price\n\
             2024-01-15 00:00:00,20.0,4.0,0.0,0.31\n\
             2024-01-15 01:00:00,21.5,4.0,0.0,0.30\n\
             2024-01-15 02:00:00,19.0,3.5,0.0,0.29\n",
        )
        .unwrap();
        let err = load_horizon(&ScenarioFiles::in_dir(dir.path()), &Config::default()).unwrap_err();
        assert_eq!(err, InputError::UnsupportedStep { expected: 15, actual: 60 });
    }
}
