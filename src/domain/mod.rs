pub mod profile;
pub mod schedule;
pub mod types;

pub use profile::*;
pub use schedule::*;
pub use types::*;
