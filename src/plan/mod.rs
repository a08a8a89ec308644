pub mod planner;
pub mod state;
pub mod swap;
pub mod types;

pub use planner::{PlanInput, PlannerSettings, RestorePlanner};
pub use state::PlanEngineState;
pub use swap::SwapState;
pub use types::{DevicePlanEntry, PlanMeta, PlanSnapshot, PlannedState};
