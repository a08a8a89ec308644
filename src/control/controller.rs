//! The control loop: sample in, plan out, actuators driven.
//!
//! A [`Controller`] owns the guard, planner and tracker behind one async
//! mutex. Triggers that find the mutex held are dropped, never queued, so
//! at most one cycle runs at a time.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::devices::{DeviceSnapshot, DeviceSource};
use crate::error::Result;
use crate::guard::{CapacityGuard, Desired, GuardEvent, GuardSettings, SoftLimitProvider};
use crate::plan::{PlanEngineState, PlanInput, PlanSnapshot, PlannedState, PlannerSettings, RestorePlanner};
use crate::store::{PLAN_STATE_KEY, StateStore, TRACKER_STATE_KEY};
use crate::tracker::{PowerTracker, PowerTrackerState, SampleOutcome, TrackerSettings};

use super::dispatch::{Action, Dispatcher, EventSink};

/// Everything the controller needs to build its engines.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    pub guard: GuardSettings,
    pub planner: PlannerSettings,
    pub tracker: TrackerSettings,
    /// Period of the timer trigger in [`Controller::run`].
    pub tick_interval: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            guard: GuardSettings::default(),
            planner: PlannerSettings::default(),
            tracker: TrackerSettings::default(),
            tick_interval: Duration::from_secs(3),
        }
    }
}

/// What one completed cycle decided and did.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub at_ms: i64,
    pub plan: PlanSnapshot,
    pub events: Vec<GuardEvent>,
    /// Devices the actuator was asked to shed.
    pub shed: Vec<String>,
    /// Devices the actuator was asked to restore.
    pub restored: Vec<String>,
    /// Planned restores the guard refused to admit.
    pub denied: Vec<String>,
    /// Devices rejected at the snapshot boundary.
    pub rejected: Vec<String>,
}

/// Point-in-time view of the guard.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ControllerStatus {
    pub soft_limit_kw: f64,
    pub last_total_power_kw: Option<f64>,
    pub headroom_kw: Option<f64>,
    pub allocated_kw: f64,
    pub shedding: bool,
    pub in_shortfall: bool,
}

struct Engines {
    guard: CapacityGuard,
    planner: RestorePlanner,
    tracker: PowerTracker,
    last_plan: Option<PlanSnapshot>,
}

pub struct Controller {
    engines: Mutex<Engines>,
    source: Arc<dyn DeviceSource>,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn StateStore>>,
    stopped: AtomicBool,
    settings: ControllerSettings,
}

impl Controller {
    pub fn new(
        settings: ControllerSettings,
        source: Arc<dyn DeviceSource>,
        dispatcher: Dispatcher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let engines = Engines {
            guard: CapacityGuard::new(settings.guard.clone()),
            planner: RestorePlanner::new(settings.planner.clone()),
            tracker: PowerTracker::new(settings.tracker.clone()),
            last_plan: None,
        };
        Self {
            engines: Mutex::new(engines),
            source,
            dispatcher,
            clock,
            store: None,
            stopped: AtomicBool::new(false),
            settings,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.dispatcher = self.dispatcher.with_sink(sink);
        self
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Loads persisted planner and tracker state.
    ///
    /// Missing keys leave the fresh state in place.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` or `Error::Json` when the store cannot be read or
    /// holds a value of the wrong shape.
    pub async fn restore_state(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let mut engines = self.engines.lock().await;
        if let Some(value) = store.load(PLAN_STATE_KEY)? {
            let state: PlanEngineState = serde_json::from_value(value)?;
            engines.planner = RestorePlanner::with_state(self.settings.planner.clone(), state);
            info!("restored planner state");
        }
        if let Some(value) = store.load(TRACKER_STATE_KEY)? {
            let state: PowerTrackerState = serde_json::from_value(value)?;
            engines.tracker = PowerTracker::with_state(self.settings.tracker.clone(), state);
            info!("restored power tracker state");
        }
        Ok(())
    }

    pub async fn set_soft_limit_provider(&self, provider: SoftLimitProvider) {
        self.engines.lock().await.guard.set_soft_limit_provider(provider);
    }

    pub async fn set_limit(&self, kw: f64) {
        self.engines.lock().await.guard.set_limit(kw);
    }

    /// Prevents new cycles. A cycle already running completes.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            info!("controller stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Feeds a whole-home power reading and runs a cycle.
    ///
    /// Returns `Ok(None)` when the controller is stopped or a cycle is
    /// already running; the sample is dropped in that case.
    ///
    /// # Arguments
    ///
    /// * `power_w` - Whole-home power in watts
    pub async fn on_sample(&self, power_w: f64) -> Result<Option<CycleReport>> {
        if self.is_stopped() {
            return Ok(None);
        }
        let Ok(mut engines) = self.engines.try_lock() else {
            debug!(power_w, "cycle in progress, dropping sample");
            return Ok(None);
        };
        let now = self.clock.now_ms();
        let outcome = engines.tracker.record_sample(power_w, now);
        if outcome != SampleOutcome::Ignored {
            engines.guard.report_total_power(power_w / 1000.0);
        }
        self.run_cycle(&mut engines, now).await.map(Some)
    }

    /// Runs a cycle on the latest known power.
    pub async fn on_timer(&self) -> Result<Option<CycleReport>> {
        if self.is_stopped() {
            return Ok(None);
        }
        let Ok(mut engines) = self.engines.try_lock() else {
            debug!("cycle in progress, skipping timer tick");
            return Ok(None);
        };
        let now = self.clock.now_ms();
        self.run_cycle(&mut engines, now).await.map(Some)
    }

    /// Ticks [`Controller::on_timer`] every `tick_interval` until `shutdown`
    /// changes. Cycle errors are logged and the loop carries on.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.settings.tick_interval;
        info!(interval_ms = interval.as_millis() as u64, "controller loop started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.on_timer().await {
                        error!(error = %e, "control cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("controller loop shutting down");
                    break;
                }
            }
        }
        self.stop();
    }

    async fn run_cycle(&self, engines: &mut Engines, now: i64) -> Result<CycleReport> {
        let (devices, rejected) = self.snapshot_devices();

        engines.guard.sync_loads(&devices);
        let events = engines.guard.tick(now);

        let guard_shed: Vec<String> = engines
            .guard
            .loads()
            .iter()
            .filter(|l| l.desired == Desired::Shed)
            .map(|l| l.id.clone())
            .collect();
        let input = PlanInput {
            devices: &devices,
            headroom_kw: engines.guard.headroom(),
            restore_margin_kw: engines.guard.restore_margin_kw(),
            shedding_active: engines.guard.is_shedding(),
            in_shortfall: engines.guard.is_in_shortfall(),
            guard_shed: &guard_shed,
            measurement_ts: engines.tracker.last_timestamp(),
            now_ms: now,
        };
        let plan = engines.planner.plan_cycle(&input);

        let shed_this_tick: HashSet<&str> = events
            .iter()
            .filter_map(|e| match e {
                GuardEvent::DeviceShed { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect();

        // sheds first, so swap victims free their allocation before admission
        let mut actions = Vec::new();
        for entry in plan.devices.iter().filter(|e| e.needs_shed()) {
            let Some(device) = devices.iter().find(|d| d.id == entry.id) else {
                continue;
            };
            engines.guard.mark_shed(&entry.id);
            let already_shed = guard_shed.contains(&entry.id) && !shed_this_tick.contains(entry.id.as_str());
            if already_shed && !device.shed_behavior.frees_full_power() {
                // setback already applied; the device keeps running
                continue;
            }
            actions.push(Action::Shed {
                id: entry.id.clone(),
                name: entry.name.clone(),
                behavior: device.shed_behavior,
            });
        }

        // a running device released from a guard shed still needs its restore
        let mut denied = Vec::new();
        for entry in &plan.devices {
            let releasing = entry.planned_state == PlannedState::Keep && guard_shed.contains(&entry.id);
            if !(entry.needs_restore() || releasing) {
                continue;
            }
            let Some(device) = devices.iter().find(|d| d.id == entry.id) else {
                continue;
            };
            let admitted = engines.guard.request_on(
                &device.id,
                &device.name,
                device.estimated_power_kw(),
                device.priority,
            );
            if admitted {
                actions.push(Action::Restore {
                    id: entry.id.clone(),
                    name: entry.name.clone(),
                });
            } else {
                info!(device = %entry.id, "planned restore not admitted by guard");
                denied.push(entry.id.clone());
            }
        }

        debug!(
            at_ms = now,
            headroom_kw = ?plan.meta.remaining_headroom_kw,
            actions = actions.len(),
            events = events.len(),
            "cycle planned"
        );

        engines.last_plan = Some(plan.clone());
        self.persist(engines);

        self.dispatcher.publish(&events).await?;
        self.dispatcher.execute(&actions).await?;

        let (mut shed, mut restored) = (Vec::new(), Vec::new());
        for action in actions {
            match action {
                Action::Shed { id, .. } => shed.push(id),
                Action::Restore { id, .. } => restored.push(id),
            }
        }
        Ok(CycleReport {
            at_ms: now,
            plan,
            events,
            shed,
            restored,
            denied,
            rejected,
        })
    }

    /// Validates the raw snapshot, dropping bad records.
    fn snapshot_devices(&self) -> (Vec<DeviceSnapshot>, Vec<String>) {
        let mut devices = Vec::new();
        let mut rejected = Vec::new();
        for raw in self.source.snapshot() {
            let id = raw.id.clone();
            match DeviceSnapshot::try_from(raw) {
                Ok(device) => devices.push(device),
                Err(e) => {
                    warn!(device = %id, error = %e, "skipping invalid device");
                    rejected.push(id);
                }
            }
        }
        (devices, rejected)
    }

    fn persist(&self, engines: &Engines) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = save_state(store.as_ref(), engines) {
            warn!(error = %e, "failed to persist state, continuing in memory");
        }
    }

    pub async fn last_plan(&self) -> Option<PlanSnapshot> {
        self.engines.lock().await.last_plan.clone()
    }

    pub async fn status(&self) -> ControllerStatus {
        let engines = self.engines.lock().await;
        let guard = &engines.guard;
        ControllerStatus {
            soft_limit_kw: guard.soft_limit(),
            last_total_power_kw: guard.last_total_power_kw(),
            headroom_kw: guard.headroom(),
            allocated_kw: guard.allocated_kw(),
            shedding: guard.is_shedding(),
            in_shortfall: guard.is_in_shortfall(),
        }
    }

    /// Energy recorded in the hour containing `at_ms` (kWh).
    pub async fn hour_kwh(&self, at_ms: i64) -> f64 {
        self.engines.lock().await.tracker.hour_kwh(at_ms)
    }

    pub async fn total_kwh(&self) -> f64 {
        self.engines.lock().await.tracker.total_kwh()
    }
}

fn save_state(store: &dyn StateStore, engines: &Engines) -> Result<()> {
    store.save(PLAN_STATE_KEY, &serde_json::to_value(engines.planner.state())?)?;
    store.save(TRACKER_STATE_KEY, &serde_json::to_value(engines.tracker.state())?)
}
