pub mod export;
pub mod series;

pub use export::{export_schedule, run_dir, write_outcome_json, OutcomeRecord};
pub use series::{load_horizon, ScenarioFiles};
