pub mod household;
pub mod report;
pub mod runner;

pub use household::Household;
pub use report::RunReport;
pub use runner::{Simulation, StepRecord};
