//! Plan output shapes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::devices::DeviceState;
use crate::order::Priority;

/// What the plan wants a device to do this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlannedState {
    Keep,
    Shed,
}

/// Per-device plan line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevicePlanEntry {
    pub id: String,
    pub name: String,
    pub current_state: DeviceState,
    pub planned_state: PlannedState,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measured_power_kw: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_power_kw: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DevicePlanEntry {
    /// A running device the plan wants off.
    pub fn needs_shed(&self) -> bool {
        self.current_state == DeviceState::On && self.planned_state == PlannedState::Shed
    }

    /// A stopped device the plan wants back on.
    pub fn needs_restore(&self) -> bool {
        self.current_state == DeviceState::Off && self.planned_state == PlannedState::Keep
    }
}

impl fmt::Display for DevicePlanEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.current_state {
            DeviceState::On => "on",
            DeviceState::Off => "off",
        };
        let plan = match self.planned_state {
            PlannedState::Keep => "keep",
            PlannedState::Shed => "shed",
        };
        write!(f, "{} [p{}] {state} -> {plan}", self.name, self.priority)?;
        if let Some(reason) = &self.reason {
            write!(f, " ({reason})")?;
        }
        Ok(())
    }
}

/// Cycle-level facts about one plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanMeta {
    /// Headroom left once the restores kept by this plan are paid for,
    /// `None` if power is unknown.
    pub remaining_headroom_kw: Option<f64>,
    /// Whether a restore was approved at this cycle's timestamp.
    pub restored_this_cycle: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restored_device: Option<String>,
    /// Running victims of a swap approved at this cycle's timestamp.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub swapped_out: Vec<String>,
    /// Restore cooldown left after this cycle's decisions.
    pub restore_cooldown_remaining_s: u64,
    pub shed_cooldown_remaining_s: u64,
    pub shedding_active: bool,
    pub in_shortfall: bool,
}

/// A complete plan: one entry per device plus cycle metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanSnapshot {
    pub devices: Vec<DevicePlanEntry>,
    pub meta: PlanMeta,
}

impl PlanSnapshot {
    pub fn entry(&self, id: &str) -> Option<&DevicePlanEntry> {
        self.devices.iter().find(|e| e.id == id)
    }

    pub fn planned_state(&self, id: &str) -> Option<PlannedState> {
        self.entry(id).map(|e| e.planned_state)
    }
}
