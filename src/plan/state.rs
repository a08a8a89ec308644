//! Planner state carried across cycles.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::swap::SwapState;

/// Cooldown timestamps, shed history and swap bookkeeping.
///
/// Serialized as-is into the host store between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanEngineState {
    /// Last cycle in which the guard shed a running device.
    pub last_shedding_ms: Option<i64>,
    /// Last cycle that saw negative headroom.
    pub last_overshoot_ms: Option<i64>,
    /// Last approved restore, direct or by swap.
    pub last_restore_ms: Option<i64>,
    /// When each device last went from running to shed.
    pub last_device_shed_ms: BTreeMap<String, i64>,
    /// Running devices planned shed in the previous cycle.
    pub planned_shed: BTreeSet<String>,
    /// Direct restores awaiting telemetry, keyed by device.
    pub pending_restores: BTreeMap<String, i64>,
    pub swap: SwapState,
}

impl PlanEngineState {
    /// Milliseconds since `id` was last shed, if known.
    pub fn since_device_shed_ms(&self, id: &str, now_ms: i64) -> Option<i64> {
        self.last_device_shed_ms.get(id).map(|ts| now_ms - ts)
    }

    /// Latest of the shed and overshoot stamps.
    pub fn last_shed_or_overshoot_ms(&self) -> Option<i64> {
        match (self.last_shedding_ms, self.last_overshoot_ms) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}
