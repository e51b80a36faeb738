//! Solver strategies
//!
//! - MILP: exact mixed-integer solve of the schedule model through a
//!   pluggable [`MipBackend`] (HiGHS by default)

pub mod milp;

pub use milp::*;
