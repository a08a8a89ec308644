pub mod power;
pub mod state;

pub use power::{PowerTracker, SampleOutcome, TrackerSettings};
pub use state::{HourlyAverage, PowerTrackerState};
