//! CSV and JSON export of solved schedules.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::domain::Schedule;
use crate::optimizer::RunOutcome;

/// Column header of the per-interval schedule export.
const HEADER: &str = "interval,time_start,fixed_kw,flexible_kw,pv_kw,price,\
                      shift_kw,shift_offset,shift_destination,received_kw,\
                      flexible_post_shift_kw,fleet_charging_kw,composite_kw,composite_no_pv_kw";

/// Fresh `<base>/<scenario>_<UTC timestamp>_<suffix>` directory.
///
/// The random suffix keeps scenarios with the same name started in the same
/// second apart; the leaf is created with `create_dir` so a run never writes
/// into a directory it did not create.
pub fn run_dir(base: &Path, scenario: &str, now: DateTime<Utc>) -> io::Result<PathBuf> {
    fs::create_dir_all(base)?;
    let stamp = now.format("%Y%m%dT%H%M%SZ");
    loop {
        let suffix = Uuid::new_v4().simple().to_string();
        let dir = base.join(format!("{}_{}_{}", scenario, stamp, &suffix[..8]));
        match fs::create_dir(&dir) {
            Ok(()) => return Ok(dir),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
}

pub fn write_schedule_csv(schedule: &Schedule, writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(HEADER.split(',').map(str::trim))?;

    for e in &schedule.entries {
        wtr.write_record(&[
            e.index.to_string(),
            e.time_start.format("%Y-%m-%d %H:%M:%S").to_string(),
            format!("{:.4}", e.fixed_kw),
            format!("{:.4}", e.flexible_kw),
            format!("{:.4}", e.pv_kw),
            format!("{:.4}", e.price),
            format!("{:.4}", e.shift_kw),
            e.shift_offset.to_string(),
            e.shift_destination.map(|d| d.to_string()).unwrap_or_default(),
            format!("{:.4}", e.received_kw),
            format!("{:.4}", e.flexible_post_shift_kw),
            format!("{:.4}", e.fleet_charging_kw),
            format!("{:.4}", e.composite_kw),
            format!("{:.4}", e.composite_no_pv_kw),
        ])?;
    }
    wtr.flush()
}

/// One SOC and one charging column per vehicle.
pub fn write_vehicles_csv(schedule: &Schedule, writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    let mut header = vec!["interval".to_string(), "time_start".to_string()];
    for vehicle in &schedule.vehicles {
        header.push(format!("{}_soc_percent", vehicle.id));
        header.push(format!("{}_charge_kw", vehicle.id));
    }
    wtr.write_record(&header)?;

    for (t, entry) in schedule.entries.iter().enumerate() {
        let mut record = vec![t.to_string(), entry.time_start.format("%Y-%m-%d %H:%M:%S").to_string()];
        for vehicle in &schedule.vehicles {
            record.push(format!("{:.4}", vehicle.soc_percent[t]));
            record.push(format!("{:.4}", vehicle.charge_kw[t]));
        }
        wtr.write_record(&record)?;
    }
    wtr.flush()
}

#[derive(Debug, Serialize)]
struct SummaryDocument<'a> {
    id: String,
    horizon: &'a str,
    created_at: DateTime<Utc>,
    status: &'a crate::optimizer::SolveStatus,
    objective: f64,
    optimizer_version: &'a str,
    vehicles: Vec<VehicleSummary<'a>>,
    #[serde(flatten)]
    summary: &'a crate::domain::ScheduleSummary,
}

#[derive(Debug, Serialize)]
struct VehicleSummary<'a> {
    id: &'a str,
    total_charge_kw: f64,
    min_soc_percent: f64,
}

pub fn write_summary_json(schedule: &Schedule, writer: impl Write) -> io::Result<()> {
    let document = SummaryDocument {
        id: schedule.id.to_string(),
        horizon: &schedule.horizon,
        created_at: schedule.created_at,
        status: &schedule.status,
        objective: schedule.objective,
        optimizer_version: &schedule.optimizer_version,
        vehicles: schedule
            .vehicles
            .iter()
            .map(|v| VehicleSummary {
                id: &v.id,
                total_charge_kw: v.total_charge(),
                min_soc_percent: v.soc_percent.iter().copied().fold(f64::INFINITY, f64::min),
            })
            .collect(),
        summary: &schedule.summary,
    };
    serde_json::to_writer_pretty(writer, &document)?;
    Ok(())
}

/// How a scenario run ended; written for every scenario, successful or not.
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeRecord {
    pub scenario: String,
    pub outcome: RunOutcome,
    pub message: Option<String>,
    pub finished_at: DateTime<Utc>,
}

pub fn write_outcome_json(record: &OutcomeRecord, path: &Path) -> io::Result<()> {
    let mut file = io::BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut file, record)?;
    writeln!(file)?;
    file.flush()
}

/// Schedule CSV, vehicle CSV and summary JSON under `dir`.
pub fn export_schedule(schedule: &Schedule, dir: &Path, csv: bool, json: bool) -> io::Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    if csv {
        let path = dir.join("schedule.csv");
        write_schedule_csv(schedule, io::BufWriter::new(File::create(&path)?))?;
        written.push(path);

        let path = dir.join("vehicles.csv");
        write_vehicles_csv(schedule, io::BufWriter::new(File::create(&path)?))?;
        written.push(path);
    }
    if json {
        let path = dir.join("summary.json");
        let mut file = io::BufWriter::new(File::create(&path)?);
        write_summary_json(schedule, &mut file)?;
        file.flush()?;
        written.push(path);
    }
    Ok(written)
}
