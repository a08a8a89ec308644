//! Household power-capacity controller: load shedding, swap-aware restore
//! planning and energy tracking.

pub mod clock;
pub mod config;
pub mod control;
pub mod devices;
pub mod error;
pub mod guard;
pub mod io;
pub mod order;
pub mod plan;
/// Simulated household, step runner and run report.
pub mod sim;
pub mod store;
pub mod tracker;

pub use error::{Error, Result};
