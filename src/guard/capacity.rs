//! Capacity guard: admission control and the shed/shortfall state machine.

use tracing::{debug, info, warn};

use crate::devices::DeviceSnapshot;
use crate::order::{Priority, sort_shed_order};

use super::events::GuardEvent;
use super::ledger::{ControllableLoad, Desired, Ledger};

/// Returns a dynamic soft limit in kW. Negative or non-finite values are
/// ignored and the static `limit - margin` applies.
pub type SoftLimitProvider = Box<dyn Fn() -> f64 + Send + Sync>;

/// Tuning knobs of the guard.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardSettings {
    /// Hard capacity limit (kW).
    pub limit_kw: f64,
    /// Safety margin below the hard limit (kW).
    pub soft_margin_kw: f64,
    /// Headroom required before shedding ends or a shortfall may clear (kW).
    pub restore_margin_kw: f64,
    /// Slack kept free when admitting loads (kW).
    pub plan_reserve_kw: f64,
    /// How long headroom must stay above the restore margin to clear a shortfall.
    pub shortfall_sustain_ms: i64,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            limit_kw: 10.0,
            soft_margin_kw: 0.2,
            restore_margin_kw: 0.2,
            plan_reserve_kw: 0.0,
            shortfall_sustain_ms: 60_000,
        }
    }
}

/// Stateful admission controller over a ledger of controllable loads.
///
/// The guard compares the latest whole-home power against the soft limit.
/// [`CapacityGuard::tick`] sheds ledger loads least-important first and
/// reports what it did as [`GuardEvent`]s; it never performs side effects.
///
/// # Examples
///
/// ```
/// use capacity_planner::guard::{CapacityGuard, GuardSettings};
///
/// let mut guard = CapacityGuard::new(GuardSettings {
///     limit_kw: 5.0,
///     soft_margin_kw: 0.2,
///     ..GuardSettings::default()
/// });
/// assert!((guard.soft_limit() - 4.8).abs() < 1e-9);
/// assert_eq!(guard.headroom(), None);
///
/// guard.report_total_power(3.0);
/// assert!((guard.headroom().unwrap() - 1.8).abs() < 1e-9);
/// ```
pub struct CapacityGuard {
    settings: GuardSettings,
    soft_limit_provider: Option<SoftLimitProvider>,
    ledger: Ledger,
    last_total_kw: Option<f64>,
    /// Measured power minus the loads shed since that reading.
    projected_kw: Option<f64>,
    shedding: bool,
    shortfall_kw: Option<f64>,
    /// Start of the current run of ticks with headroom above the restore margin.
    recovered_since_ms: Option<i64>,
}

impl CapacityGuard {
    pub fn new(settings: GuardSettings) -> Self {
        let mut guard = Self {
            settings: GuardSettings {
                limit_kw: 0.0,
                soft_margin_kw: 0.0,
                ..settings.clone()
            },
            soft_limit_provider: None,
            ledger: Ledger::default(),
            last_total_kw: None,
            projected_kw: None,
            shedding: false,
            shortfall_kw: None,
            recovered_since_ms: None,
        };
        guard.set_limit(settings.limit_kw);
        guard.set_soft_margin(settings.soft_margin_kw);
        guard
    }

    pub fn settings(&self) -> &GuardSettings {
        &self.settings
    }

    /// Sets the hard limit, clamped to zero. Non-finite values are ignored.
    pub fn set_limit(&mut self, kw: f64) {
        if !kw.is_finite() {
            warn!(limit_kw = kw, "ignoring non-finite capacity limit");
            return;
        }
        self.settings.limit_kw = kw.max(0.0);
    }

    /// Sets the soft margin, clamped to zero. Non-finite values are ignored.
    pub fn set_soft_margin(&mut self, kw: f64) {
        if !kw.is_finite() {
            warn!(margin_kw = kw, "ignoring non-finite soft margin");
            return;
        }
        self.settings.soft_margin_kw = kw.max(0.0);
    }

    pub fn set_restore_margin(&mut self, kw: f64) {
        if kw.is_finite() {
            self.settings.restore_margin_kw = kw.max(0.0);
        }
    }

    pub fn set_soft_limit_provider(&mut self, provider: SoftLimitProvider) {
        self.soft_limit_provider = Some(provider);
    }

    pub fn clear_soft_limit_provider(&mut self) {
        self.soft_limit_provider = None;
    }

    /// The threshold actually enforced (kW).
    pub fn soft_limit(&self) -> f64 {
        if let Some(provider) = &self.soft_limit_provider {
            let kw = provider();
            if kw.is_finite() && kw >= 0.0 {
                return kw;
            }
        }
        (self.settings.limit_kw - self.settings.soft_margin_kw).max(0.0)
    }

    /// Upper bound on total allocated power for admission (kW).
    pub fn plan_max_kw(&self) -> f64 {
        (self.soft_limit() - self.settings.plan_reserve_kw).max(0.0)
    }

    pub fn restore_margin_kw(&self) -> f64 {
        self.settings.restore_margin_kw
    }

    /// Records the latest whole-home power. Non-finite or negative readings
    /// are dropped and the previous value kept.
    pub fn report_total_power(&mut self, kw: f64) {
        if !kw.is_finite() || kw < 0.0 {
            warn!(power_kw = kw, "ignoring invalid total power reading");
            return;
        }
        self.last_total_kw = Some(kw);
        self.projected_kw = None;
    }

    /// Latest measured whole-home power (kW).
    pub fn last_total_power_kw(&self) -> Option<f64> {
        self.last_total_kw
    }

    /// Soft limit minus the projected power, `None` before the first reading.
    ///
    /// Projected power is the last reading less the expected draw of every
    /// load shed by [`CapacityGuard::tick`] since that reading.
    pub fn headroom(&self) -> Option<f64> {
        self.projected_kw
            .or(self.last_total_kw)
            .map(|kw| self.soft_limit() - kw)
    }

    /// Soft limit minus the last reading, `None` before the first reading.
    pub fn measured_headroom(&self) -> Option<f64> {
        self.last_total_kw.map(|kw| self.soft_limit() - kw)
    }

    pub fn is_shedding(&self) -> bool {
        self.shedding
    }

    pub fn is_in_shortfall(&self) -> bool {
        self.shortfall_kw.is_some()
    }

    pub fn shortfall_deficit_kw(&self) -> Option<f64> {
        self.shortfall_kw
    }

    pub fn allocated_kw(&self) -> f64 {
        self.ledger.allocated_kw()
    }

    pub fn loads(&self) -> &[ControllableLoad] {
        self.ledger.loads()
    }

    /// Pure admission check.
    pub fn has_capacity(&self, kw: f64) -> bool {
        kw.is_finite() && self.ledger.allocated_kw() + kw <= self.plan_max_kw()
    }

    /// Asks to turn a load on.
    ///
    /// Returns `false` without touching the ledger when the load would push
    /// the allocation past [`CapacityGuard::plan_max_kw`].
    pub fn request_on(&mut self, id: &str, name: &str, kw: f64, priority: Priority) -> bool {
        if !kw.is_finite() || kw < 0.0 {
            warn!(device = %id, power_kw = kw, "rejecting request with invalid power");
            return false;
        }
        let allocated = self.ledger.allocated_kw_excluding(id);
        let plan_max = self.plan_max_kw();
        if allocated + kw > plan_max {
            debug!(
                device = %id,
                requested_kw = kw,
                allocated_kw = allocated,
                plan_max_kw = plan_max,
                "admission denied"
            );
            return false;
        }
        self.ledger.upsert(ControllableLoad {
            id: id.to_string(),
            name: name.to_string(),
            expected_power_kw: kw,
            priority,
            desired: Desired::On,
        });
        true
    }

    /// Marks a load Off. Returns `false` for unknown ids.
    pub fn force_off(&mut self, id: &str) -> bool {
        self.ledger.set_desired(id, Desired::Off)
    }

    /// Marks a load Shed on behalf of the planner (swap victims). Returns
    /// `false` for unknown ids.
    pub fn mark_shed(&mut self, id: &str) -> bool {
        self.ledger.set_desired(id, Desired::Shed)
    }

    /// Replaces the ledger with the devices of a snapshot.
    pub fn sync_loads(&mut self, devices: &[DeviceSnapshot]) {
        self.ledger.sync(devices);
    }

    /// Runs one step of the shed/shortfall state machine.
    ///
    /// Shedding subtracts each shed load's expected draw from the projected
    /// power, so a repeated tick without a new reading does not shed again.
    /// Shedding ends and a shortfall clears only on measured headroom.
    pub fn tick(&mut self, now_ms: i64) -> Vec<GuardEvent> {
        let mut events = Vec::new();
        let Some(measured_kw) = self.last_total_kw else {
            return events;
        };
        let mut power_kw = self.projected_kw.unwrap_or(measured_kw);
        let soft_limit = self.soft_limit();
        let mut headroom = soft_limit - power_kw;

        if headroom < 0.0 {
            self.recovered_since_ms = None;
            if !self.shedding {
                self.shedding = true;
                info!(headroom_kw = headroom, soft_limit_kw = soft_limit, "shedding started");
                events.push(GuardEvent::SheddingStarted {
                    headroom_kw: headroom,
                });
            }

            let mut candidates: Vec<ControllableLoad> = self
                .ledger
                .loads()
                .iter()
                .filter(|l| l.desired == Desired::On)
                .cloned()
                .collect();
            sort_shed_order(&mut candidates, |l| l.priority);

            for load in candidates {
                if headroom >= 0.0 {
                    break;
                }
                self.ledger.set_desired(&load.id, Desired::Shed);
                power_kw = (power_kw - load.expected_power_kw).max(0.0);
                headroom = soft_limit - power_kw;
                info!(
                    device = %load.id,
                    priority = %load.priority,
                    freed_kw = load.expected_power_kw,
                    headroom_kw = headroom,
                    "shedding device"
                );
                events.push(GuardEvent::DeviceShed {
                    id: load.id,
                    name: load.name,
                    expected_power_kw: load.expected_power_kw,
                });
            }
            self.projected_kw = Some(power_kw);

            if headroom < 0.0 {
                let deficit_kw = -headroom;
                if self.shortfall_kw.is_none() {
                    warn!(deficit_kw, "capacity shortfall: nothing left to shed");
                    events.push(GuardEvent::ShortfallDetected { deficit_kw });
                }
                self.shortfall_kw = Some(deficit_kw);
            }
            return events;
        }

        let headroom = soft_limit - measured_kw;
        if headroom >= self.settings.restore_margin_kw {
            if self.shortfall_kw.is_some() {
                let since = *self.recovered_since_ms.get_or_insert(now_ms);
                if now_ms - since >= self.settings.shortfall_sustain_ms {
                    info!(headroom_kw = headroom, "shortfall cleared");
                    self.shortfall_kw = None;
                    self.recovered_since_ms = None;
                    events.push(GuardEvent::ShortfallCleared);
                }
            }
            if self.shedding && self.shortfall_kw.is_none() {
                self.shedding = false;
                info!(headroom_kw = headroom, "shedding ended");
                events.push(GuardEvent::SheddingEnded {
                    headroom_kw: headroom,
                });
            }
        } else {
            self.recovered_since_ms = None;
        }

        events
    }
}
