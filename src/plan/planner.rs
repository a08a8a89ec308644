//! Swap-aware restore planner.
//!
//! Each cycle rebuilds the full keep/shed plan from the device snapshot, the
//! guard's headroom and the planner's own cooldown state. Restores are
//! throttled to one per cycle and held back by cooldowns. A device that
//! cannot be restored directly may pre-empt less important running devices
//! (a swap).
//!
//! A device the guard shed that keeps running (a temperature setback, or a
//! resident switching it back on) is held shed while the guard is busy and
//! competes for a restore like a stopped device once the guard is calm.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::devices::DeviceSnapshot;
use crate::order::{Priority, sort_restore_order, sort_shed_order};

use super::state::PlanEngineState;
use super::types::{DevicePlanEntry, PlanMeta, PlanSnapshot, PlannedState};

const REASON_CAPACITY: &str = "shed due to capacity";
const REASON_NO_MEASUREMENT: &str = "waiting for power measurement";
const REASON_RESTORE: &str = "restore approved";
const REASON_SWAP_RESTORE: &str = "swap restore approved";
const REASON_THROTTLED: &str = "restore throttled (one restore per cycle)";

/// Planner timing and hysteresis constants.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerSettings {
    /// No restores this long after a shed or an overshoot.
    pub shed_cooldown_ms: i64,
    /// Minimum spacing between two restores.
    pub restore_cooldown_ms: i64,
    /// Age at which an unconfirmed swap is dropped.
    pub swap_timeout_ms: i64,
    /// Window after a device's shed during which its restore bar is raised.
    pub recent_shed_backoff_ms: i64,
    /// Floor of the restore hysteresis (kW).
    pub min_restore_hysteresis_kw: f64,
    /// Multiplier on the need of a recently shed device.
    pub recent_shed_factor: f64,
    /// Minimum extra need of a recently shed device (kW).
    pub recent_shed_extra_kw: f64,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            shed_cooldown_ms: 60_000,
            restore_cooldown_ms: 30_000,
            swap_timeout_ms: 60_000,
            recent_shed_backoff_ms: 180_000,
            min_restore_hysteresis_kw: 0.2,
            recent_shed_factor: 1.07,
            recent_shed_extra_kw: 0.08,
        }
    }
}

/// Everything one planning cycle looks at besides the planner's own state.
#[derive(Debug, Clone, Copy)]
pub struct PlanInput<'a> {
    pub devices: &'a [DeviceSnapshot],
    /// Guard headroom after this tick's sheds; `None` until power is known.
    pub headroom_kw: Option<f64>,
    pub restore_margin_kw: f64,
    pub shedding_active: bool,
    pub in_shortfall: bool,
    /// Ids the guard currently holds shed.
    pub guard_shed: &'a [String],
    /// Timestamp of the latest power measurement.
    pub measurement_ts: Option<i64>,
    pub now_ms: i64,
}

/// Stateful planner; see the module docs.
#[derive(Debug, Clone, Default)]
pub struct RestorePlanner {
    settings: PlannerSettings,
    state: PlanEngineState,
}

impl RestorePlanner {
    pub fn new(settings: PlannerSettings) -> Self {
        Self {
            settings,
            state: PlanEngineState::default(),
        }
    }

    /// Creates a planner resuming from persisted state.
    pub fn with_state(settings: PlannerSettings, mut state: PlanEngineState) -> Self {
        state.swap.repair();
        Self { settings, state }
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    pub fn state(&self) -> &PlanEngineState {
        &self.state
    }

    /// Power that must be free before `device` may restart (kW).
    pub fn restore_need_kw(&self, device: &DeviceSnapshot, restore_margin_kw: f64, now_ms: i64) -> f64 {
        let hysteresis = self
            .settings
            .min_restore_hysteresis_kw
            .max(2.0 * restore_margin_kw);
        let need = device.estimated_power_kw() + hysteresis;
        let recently_shed = self
            .state
            .since_device_shed_ms(&device.id, now_ms)
            .is_some_and(|elapsed| elapsed < self.settings.recent_shed_backoff_ms);
        if recently_shed {
            (need * self.settings.recent_shed_factor).max(need + self.settings.recent_shed_extra_kw)
        } else {
            need
        }
    }

    /// Computes the plan for one cycle and advances the planner state.
    ///
    /// Calling again with identical input, `now_ms` included, yields the same
    /// snapshot: a restore approved at this instant is reported again as in
    /// flight, and the candidates behind it stay throttled.
    pub fn plan_cycle(&mut self, input: &PlanInput<'_>) -> PlanSnapshot {
        let now = input.now_ms;
        let devices = input.devices;

        self.settle_pending(devices, now);

        let mut entries: Vec<DevicePlanEntry> = devices.iter().map(initial_entry).collect();
        let mut meta = PlanMeta {
            remaining_headroom_kw: input.headroom_kw,
            shedding_active: input.shedding_active,
            in_shortfall: input.in_shortfall,
            ..PlanMeta::default()
        };

        let held = self.shed_pass(input, &mut entries);

        if input.headroom_kw.is_some_and(|h| h < 0.0) {
            self.state.last_overshoot_ms = Some(now);
        }
        meta.shed_cooldown_remaining_s = remaining_s(
            self.state.last_shed_or_overshoot_ms(),
            self.settings.shed_cooldown_ms,
            now,
        );
        meta.restore_cooldown_remaining_s = remaining_s(
            self.state.last_restore_ms,
            self.settings.restore_cooldown_ms,
            now,
        );

        match self.gate_reason(input, &meta) {
            Some(reason) => self.hold_off_devices(input, &mut entries, &mut meta, &reason, &held),
            None => self.restore_pass(input, &mut entries, &mut meta, &held),
        }
        meta.restore_cooldown_remaining_s = remaining_s(
            self.state.last_restore_ms,
            self.settings.restore_cooldown_ms,
            now,
        );

        self.state.planned_shed = entries
            .iter()
            .filter(|e| e.needs_shed())
            .map(|e| e.id.clone())
            .collect();
        let backoff = self.settings.recent_shed_backoff_ms;
        self.state
            .last_device_shed_ms
            .retain(|_, ts| now - *ts < backoff);

        PlanSnapshot {
            devices: entries,
            meta,
        }
    }

    /// Confirms restores that telemetry now reports, drops stale ones.
    fn settle_pending(&mut self, devices: &[DeviceSnapshot], now: i64) {
        for device in devices.iter().filter(|d| d.is_on()) {
            let released = self.state.swap.confirm_complete(&device.id);
            if !released.is_empty() {
                info!(device = %device.id, released = ?released, "swap confirmed");
            }
            self.state.pending_restores.remove(&device.id);
        }

        for target in self
            .state
            .swap
            .expire_stale(now, self.settings.swap_timeout_ms)
        {
            info!(device = %target, "swap expired without confirmation");
        }
        let window = self.settings.restore_cooldown_ms;
        self.state
            .pending_restores
            .retain(|_, ts| now - *ts < window);
    }

    /// Sheds running devices held by the guard or pre-empted by a swap.
    ///
    /// Returns the running devices the guard still holds shed from an earlier
    /// cycle while it is calm; the caller decides whether they stay shed.
    fn shed_pass(&mut self, input: &PlanInput<'_>, entries: &mut [DevicePlanEntry]) -> HashSet<String> {
        let guard_shed: HashSet<&str> = input.guard_shed.iter().map(String::as_str).collect();
        let calm = !input.shedding_active && input.headroom_kw.is_some_and(|h| h >= 0.0);
        let now = input.now_ms;
        let mut held = HashSet::new();

        for entry in entries.iter_mut().filter(|e| e.current_state.is_on()) {
            let mut capacity = false;
            let reason = if let Some(beneficiary) = self.state.swap.beneficiary_of(&entry.id) {
                swapped_out_reason(input.devices, beneficiary)
            } else if guard_shed.contains(entry.id.as_str()) {
                if calm && self.state.planned_shed.contains(&entry.id) {
                    held.insert(entry.id.clone());
                    continue;
                }
                capacity = true;
                REASON_CAPACITY.to_string()
            } else {
                continue;
            };
            entry.planned_state = PlannedState::Shed;
            entry.reason = Some(reason);

            if !self.state.planned_shed.contains(&entry.id) {
                self.state.last_device_shed_ms.insert(entry.id.clone(), now);
                if capacity {
                    self.state.last_shedding_ms = Some(now);
                }
                debug!(device = %entry.id, reason = ?entry.reason, "planned shed");
            }
        }
        held
    }

    /// Returns why restores are blocked this cycle, if they are.
    fn gate_reason(&self, input: &PlanInput<'_>, meta: &PlanMeta) -> Option<String> {
        let Some(headroom) = input.headroom_kw else {
            return Some(REASON_NO_MEASUREMENT.to_string());
        };
        if input.shedding_active || headroom < 0.0 {
            return Some(REASON_CAPACITY.to_string());
        }
        if meta.shed_cooldown_remaining_s > 0 {
            return Some(format!(
                "cooldown after shedding ({}s remaining)",
                meta.shed_cooldown_remaining_s
            ));
        }
        if self.state.last_restore_ms == Some(input.now_ms) {
            return Some(REASON_THROTTLED.to_string());
        }
        if meta.restore_cooldown_remaining_s > 0 {
            return Some(format!(
                "restore cooldown ({}s remaining)",
                meta.restore_cooldown_remaining_s
            ));
        }
        None
    }

    /// Keeps every stopped or held device off, except restores still
    /// awaiting telemetry while there is room for them.
    ///
    /// Kept restores reserve their need in `meta.remaining_headroom_kw`; a
    /// kept swap target is credited its victims that are still running.
    fn hold_off_devices(
        &mut self,
        input: &PlanInput<'_>,
        entries: &mut [DevicePlanEntry],
        meta: &mut PlanMeta,
        reason: &str,
        held: &HashSet<String>,
    ) {
        let now = input.now_ms;
        let room = input.headroom_kw.is_some_and(|h| h >= 0.0) && !input.shedding_active;
        let restored_now = self.state.last_restore_ms == Some(now);
        let mut reserved_kw = 0.0;
        let mut freed_kw = 0.0;

        for entry in entries.iter_mut() {
            if held.contains(&entry.id) {
                entry.planned_state = PlannedState::Shed;
                entry.reason = Some(REASON_CAPACITY.to_string());
                continue;
            }
            if entry.current_state.is_on() {
                continue;
            }
            if let Some(beneficiary) = self.state.swap.beneficiary_of(&entry.id) {
                entry.reason = Some(swapped_out_reason(input.devices, beneficiary));
                continue;
            }
            if room && self.state.swap.is_pending_target(&entry.id) {
                entry.planned_state = PlannedState::Keep;
                entry.reason = Some(REASON_SWAP_RESTORE.to_string());
                reserved_kw += self.need_of(input, &entry.id);
                let running_victims: Vec<&DeviceSnapshot> = input
                    .devices
                    .iter()
                    .filter(|d| d.is_on())
                    .filter(|d| self.state.swap.beneficiary_of(&d.id) == Some(entry.id.as_str()))
                    .collect();
                for victim in &running_victims {
                    freed_kw += victim.estimated_power_kw();
                }
                if restored_now {
                    meta.restored_device = Some(entry.id.clone());
                    meta.swapped_out = running_victims.iter().map(|d| d.id.clone()).collect();
                }
                continue;
            }
            if self.state.pending_restores.contains_key(&entry.id) {
                if room {
                    entry.planned_state = PlannedState::Keep;
                    entry.reason = Some(REASON_RESTORE.to_string());
                    reserved_kw += self.need_of(input, &entry.id);
                    if restored_now {
                        meta.restored_device = Some(entry.id.clone());
                    }
                    continue;
                }
                self.state.pending_restores.remove(&entry.id);
            }
            entry.reason = Some(reason.to_string());
        }

        meta.restored_this_cycle = meta.restored_device.is_some();
        meta.remaining_headroom_kw = input.headroom_kw.map(|h| h + freed_kw - reserved_kw);
    }

    fn need_of(&self, input: &PlanInput<'_>, id: &str) -> f64 {
        input
            .devices
            .iter()
            .find(|d| d.id == id)
            .map_or(0.0, |d| self.restore_need_kw(d, input.restore_margin_kw, input.now_ms))
    }

    /// Attempts at most one restore, directly or by swap.
    ///
    /// A held device is credited its own measured draw, which the headroom
    /// already pays for. It never triggers a swap.
    fn restore_pass(
        &mut self,
        input: &PlanInput<'_>,
        entries: &mut [DevicePlanEntry],
        meta: &mut PlanMeta,
        held: &HashSet<String>,
    ) {
        let now = input.now_ms;
        let mut available = input.headroom_kw.unwrap_or(0.0);

        // swap targets still waiting for telemetry hold on to their room
        for device in input.devices.iter().filter(|d| !d.is_on()) {
            if self.state.swap.is_pending_target(&device.id) {
                available -= self.restore_need_kw(device, input.restore_margin_kw, now);
                set_entry(entries, &device.id, PlannedState::Keep, REASON_SWAP_RESTORE.to_string());
            }
        }

        let mut candidates: Vec<&DeviceSnapshot> = input
            .devices
            .iter()
            .filter(|d| !d.is_on() || held.contains(&d.id))
            .filter(|d| !self.state.swap.is_pending_target(&d.id))
            .collect();
        sort_restore_order(&mut candidates, |d| d.priority);

        let mut restored: Option<String> = None;
        let mut swapped_now: HashSet<String> = HashSet::new();

        for candidate in candidates {
            if restored.is_some() {
                set_entry(entries, &candidate.id, PlannedState::Shed, REASON_THROTTLED.to_string());
                continue;
            }
            if let Some(beneficiary) = self.state.swap.beneficiary_of(&candidate.id) {
                let name = device_name(input.devices, beneficiary);
                set_entry(
                    entries,
                    &candidate.id,
                    PlannedState::Shed,
                    format!("swap pending (waiting for {name})"),
                );
                continue;
            }
            if let Some(blocker) = self.blocking_swap_target(input.devices, candidate.priority, &candidate.id) {
                set_entry(
                    entries,
                    &candidate.id,
                    PlannedState::Shed,
                    format!("waiting for {blocker} to restore first"),
                );
                continue;
            }

            let need = self.restore_need_kw(candidate, input.restore_margin_kw, now);
            let is_held = held.contains(&candidate.id);
            let credit = if is_held {
                candidate.measured_power_kw.unwrap_or(0.0).max(0.0)
            } else {
                0.0
            };
            if available + credit >= need {
                available -= need - credit;
                info!(
                    device = %candidate.id,
                    need_kw = need,
                    remaining_kw = available,
                    "restore approved"
                );
                set_entry(entries, &candidate.id, PlannedState::Keep, REASON_RESTORE.to_string());
                self.state.pending_restores.insert(candidate.id.clone(), now);
                self.state.last_restore_ms = Some(now);
                restored = Some(candidate.id.clone());
                continue;
            }

            let insufficient = format!(
                "insufficient headroom (need {need:.2} kW, available {:.2} kW)",
                available.max(0.0)
            );
            let measurement_ts = input.measurement_ts.unwrap_or(i64::MIN);
            if is_held || self.state.swap.swap_attempted(&candidate.id, measurement_ts) {
                set_entry(entries, &candidate.id, PlannedState::Shed, insufficient);
                continue;
            }
            self.state
                .swap
                .record_swap_attempt(&candidate.id, measurement_ts);

            match self.find_swap_victims(input, entries, candidate, need, available, &swapped_now) {
                Some((victims, freed_kw)) => {
                    for victim in &victims {
                        set_entry(
                            entries,
                            victim,
                            PlannedState::Shed,
                            format!("swapped out for {}", candidate.name),
                        );
                        self.state.last_device_shed_ms.insert(victim.clone(), now);
                        swapped_now.insert(victim.clone());
                    }
                    self.state.swap.approve_swap(&candidate.id, &victims, now);
                    available = available + freed_kw - need;
                    info!(
                        device = %candidate.id,
                        victims = ?victims,
                        need_kw = need,
                        "swap approved"
                    );
                    set_entry(entries, &candidate.id, PlannedState::Keep, REASON_SWAP_RESTORE.to_string());
                    self.state.last_restore_ms = Some(now);
                    meta.swapped_out = victims;
                    restored = Some(candidate.id.clone());
                }
                None => {
                    debug!(device = %candidate.id, need_kw = need, available_kw = available, "restore denied");
                    set_entry(entries, &candidate.id, PlannedState::Shed, insufficient);
                }
            }
        }

        meta.remaining_headroom_kw = Some(available);
        meta.restored_this_cycle = restored.is_some();
        meta.restored_device = restored;
    }

    /// A pending swap target, still off, at least as important as `priority`.
    fn blocking_swap_target<'d>(
        &self,
        devices: &'d [DeviceSnapshot],
        priority: Priority,
        candidate_id: &str,
    ) -> Option<&'d str> {
        devices
            .iter()
            .filter(|d| d.id != candidate_id && !d.is_on())
            .filter(|d| self.state.swap.is_pending_target(&d.id))
            .find(|d| d.priority <= priority)
            .map(|d| d.name.as_str())
    }

    /// Picks running, less important, fully-sheddable devices until their
    /// draw plus `available` covers `need`.
    fn find_swap_victims(
        &self,
        input: &PlanInput<'_>,
        entries: &[DevicePlanEntry],
        candidate: &DeviceSnapshot,
        need: f64,
        available: f64,
        swapped_now: &HashSet<String>,
    ) -> Option<(Vec<String>, f64)> {
        let mut donors: Vec<&DeviceSnapshot> = input
            .devices
            .iter()
            .filter(|d| d.is_on())
            .filter(|d| d.priority.is_less_important_than(candidate.priority))
            .filter(|d| d.shed_behavior.frees_full_power())
            .filter(|d| !swapped_now.contains(&d.id))
            .filter(|d| !self.state.swap.is_pending_target(&d.id))
            .filter(|d| {
                entries
                    .iter()
                    .any(|e| e.id == d.id && e.planned_state == PlannedState::Keep)
            })
            .collect();
        sort_shed_order(&mut donors, |d| d.priority);

        let mut potential = available;
        let mut victims = Vec::new();
        let mut freed_kw = 0.0;
        for donor in donors {
            if potential >= need {
                break;
            }
            let kw = donor.estimated_power_kw();
            potential += kw;
            freed_kw += kw;
            victims.push(donor.id.clone());
        }

        (potential >= need && !victims.is_empty()).then_some((victims, freed_kw))
    }
}

fn initial_entry(device: &DeviceSnapshot) -> DevicePlanEntry {
    DevicePlanEntry {
        id: device.id.clone(),
        name: device.name.clone(),
        current_state: device.state,
        planned_state: if device.is_on() {
            PlannedState::Keep
        } else {
            PlannedState::Shed
        },
        priority: device.priority,
        measured_power_kw: device.measured_power_kw,
        expected_power_kw: device.expected_power_kw,
        reason: None,
    }
}

fn set_entry(entries: &mut [DevicePlanEntry], id: &str, state: PlannedState, reason: String) {
    if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
        entry.planned_state = state;
        entry.reason = Some(reason);
    }
}

fn device_name<'d>(devices: &'d [DeviceSnapshot], id: &'d str) -> &'d str {
    devices
        .iter()
        .find(|d| d.id == id)
        .map_or(id, |d| d.name.as_str())
}

fn swapped_out_reason(devices: &[DeviceSnapshot], beneficiary: &str) -> String {
    format!("swapped out for {}", device_name(devices, beneficiary))
}

/// Whole seconds left of a cooldown that started at `since`.
fn remaining_s(since: Option<i64>, cooldown_ms: i64, now: i64) -> u64 {
    let Some(since) = since else {
        return 0;
    };
    let left_ms = cooldown_ms - (now - since);
    if left_ms <= 0 {
        0
    } else {
        (left_ms as u64).div_ceil(1000)
    }
}
