pub mod builder;
pub mod constraints;
pub mod extract;
pub mod iis;
pub mod lp_format;
pub mod model;
pub mod shifting;
pub mod strategies;
pub mod transitions;
pub mod types;

pub use builder::ModelBuilder;
pub use constraints::*;
pub use extract::extract;
pub use iis::{IisReport, IisRow};
pub use model::{RowFamily, ScheduleModel};
pub use strategies::*;
pub use types::*;
