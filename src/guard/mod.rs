//! Capacity guard: allocation ledger and shed/shortfall hysteresis.

pub mod capacity;
/// Typed guard events consumed by the dispatcher.
pub mod events;
pub mod ledger;

pub use capacity::{CapacityGuard, GuardSettings, SoftLimitProvider};
pub use events::GuardEvent;
pub use ledger::{ControllableLoad, Desired};
