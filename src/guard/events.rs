//! Typed events emitted by the capacity guard.

use std::fmt;

use serde::Serialize;

/// A state change or side effect requested by one guard tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GuardEvent {
    /// Measured power went above the soft limit.
    SheddingStarted { headroom_kw: f64 },
    /// Headroom recovered past the restore margin.
    SheddingEnded { headroom_kw: f64 },
    /// A load was picked to shed.
    DeviceShed {
        id: String,
        name: String,
        expected_power_kw: f64,
    },
    /// Every candidate is shed and power is still over the soft limit.
    ShortfallDetected { deficit_kw: f64 },
    /// Headroom stayed above the restore margin for the sustain window.
    ShortfallCleared,
}

impl fmt::Display for GuardEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardEvent::SheddingStarted { headroom_kw } => {
                write!(f, "shedding started (headroom {headroom_kw:.2} kW)")
            }
            GuardEvent::SheddingEnded { headroom_kw } => {
                write!(f, "shedding ended (headroom {headroom_kw:.2} kW)")
            }
            GuardEvent::DeviceShed {
                name,
                expected_power_kw,
                ..
            } => write!(f, "shed {name} ({expected_power_kw:.2} kW)"),
            GuardEvent::ShortfallDetected { deficit_kw } => {
                write!(f, "shortfall: {deficit_kw:.2} kW over the soft limit")
            }
            GuardEvent::ShortfallCleared => write!(f, "shortfall cleared"),
        }
    }
}
