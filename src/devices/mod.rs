//! Device snapshot types and household load models.

/// Uncontrollable household base-load generator.
pub mod baseload;
pub mod types;

pub use baseload::BaseLoad;
pub use types::{DeviceSnapshot, DeviceSource, DeviceState, RawDevice, ShedBehavior};
