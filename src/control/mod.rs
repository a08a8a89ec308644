//! Async control loop and its side-effect seams.

pub mod controller;
pub mod dispatch;

pub use controller::{Controller, ControllerSettings, ControllerStatus, CycleReport};
pub use dispatch::{Action, Actuator, BoxFuture, Dispatcher, EventSink};
