//! Cost-optimal scheduling of flexible building load and shared EV charging.
//!
//! A scenario (building series plus fleet presence and trips) is turned into
//! a mixed-integer program, solved with HiGHS, checked against the physical
//! invariants and exported as CSV/JSON.

pub mod config;
pub mod domain;
pub mod error;
pub mod io;
pub mod optimizer;
pub mod runner;
pub mod telemetry;

pub use config::Config;
pub use error::{Result, SchedulerError};
