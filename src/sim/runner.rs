//! Step-by-step simulation driving a [`Controller`] with a manual clock.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::clock::{Clock, ManualClock};
use crate::config::ControllerConfig;
use crate::control::{Controller, CycleReport, Dispatcher};
use crate::devices::BaseLoad;
use crate::error::Result;
use crate::store::StateStore;

use super::household::Household;
use super::report::RunReport;

/// Observable state after one simulation step.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: usize,
    pub at_ms: i64,
    /// Measured whole-home power fed to the controller (kW).
    pub total_kw: f64,
    pub soft_limit_kw: f64,
    /// Headroom the guard reported after the cycle (kW).
    pub headroom_kw: Option<f64>,
    pub shedding: bool,
    pub in_shortfall: bool,
    /// Controllable devices running after actuation.
    pub devices_on: usize,
    pub shed: Vec<String>,
    pub restored: Vec<String>,
    pub swapped_out: Vec<String>,
    pub denied: Vec<String>,
    /// The cycle failed or was skipped.
    pub cycle_error: bool,
}

impl fmt::Display for StepRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headroom = self
            .headroom_kw
            .map_or_else(|| "n/a".to_string(), |h| format!("{h:+.2}"));
        write!(
            f,
            "t={:>4} total={:>6.2}kW soft={:.2}kW headroom={:>6} on={}",
            self.step, self.total_kw, self.soft_limit_kw, headroom, self.devices_on
        )?;
        if self.shedding {
            write!(f, " SHEDDING")?;
        }
        if self.in_shortfall {
            write!(f, " SHORTFALL")?;
        }
        if !self.shed.is_empty() {
            write!(f, " shed=[{}]", self.shed.join(","))?;
        }
        if !self.restored.is_empty() {
            write!(f, " restored=[{}]", self.restored.join(","))?;
        }
        if !self.swapped_out.is_empty() {
            write!(f, " swapped_out=[{}]", self.swapped_out.join(","))?;
        }
        if self.cycle_error {
            write!(f, " ERROR")?;
        }
        Ok(())
    }
}

/// A simulated household wired to a controller.
pub struct Simulation {
    controller: Controller,
    household: Arc<Household>,
    clock: ManualClock,
    steps: usize,
    step_ms: i64,
    limit_kw: f64,
}

impl Simulation {
    /// Builds the household, clock and controller described by `cfg`.
    pub fn from_config(cfg: &ControllerConfig) -> Self {
        let s = &cfg.simulation;
        let base = BaseLoad::new(
            s.base_load_kw,
            s.base_amp_kw,
            s.base_phase_rad,
            s.noise_std_kw,
            s.seed,
        );
        let household = Arc::new(Household::new(&cfg.devices, base));
        let clock = ManualClock::new(s.start_ms);
        let controller = Controller::new(
            cfg.controller_settings(),
            household.clone(),
            Dispatcher::new(household.clone()),
            Arc::new(clock.clone()),
        );
        Self {
            controller,
            household,
            clock,
            steps: s.steps,
            step_ms: i64::try_from(s.step_seconds.saturating_mul(1000)).unwrap_or(i64::MAX),
            limit_kw: cfg.guard.limit_kw,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.controller = self.controller.with_store(store);
        self
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn household(&self) -> &Household {
        &self.household
    }

    /// Runs every step and summarizes the run.
    ///
    /// Persisted state is loaded first; a failed load is logged and the run
    /// starts fresh.
    pub async fn run(&self) -> Result<(Vec<StepRecord>, RunReport)> {
        if let Err(e) = self.controller.restore_state().await {
            warn!(error = %e, "could not restore persisted state, starting fresh");
        }

        let mut records = Vec::with_capacity(self.steps);
        for step in 0..self.steps {
            records.push(self.step(step).await);
        }

        let step_hours = self.step_ms as f64 / 3_600_000.0;
        let report = RunReport::from_records(&records, step_hours, self.limit_kw);
        info!(
            steps = records.len(),
            peak_kw = report.peak_kw,
            overshoot_steps = report.overshoot_steps,
            "simulation finished"
        );
        Ok((records, report))
    }

    /// Samples the household, runs one cycle and advances the clock.
    pub async fn step(&self, step: usize) -> StepRecord {
        let now = self.clock.now_ms();
        let total_kw = self.household.total_power_kw(now);

        let outcome = self.controller.on_sample(total_kw * 1000.0).await;
        let cycle: Option<CycleReport> = match outcome {
            Ok(report) => report,
            Err(e) => {
                warn!(step, error = %e, "cycle failed");
                None
            }
        };
        let status = self.controller.status().await;
        self.clock.advance_ms(self.step_ms);

        let (shed, restored, swapped_out, denied) = match &cycle {
            Some(c) => (
                c.shed.clone(),
                c.restored.clone(),
                c.plan.meta.swapped_out.clone(),
                c.denied.clone(),
            ),
            None => Default::default(),
        };
        StepRecord {
            step,
            at_ms: now,
            total_kw,
            soft_limit_kw: status.soft_limit_kw,
            headroom_kw: status.headroom_kw,
            shedding: status.shedding,
            in_shortfall: status.in_shortfall,
            devices_on: self.household.running_count(),
            shed,
            restored,
            swapped_out,
            denied,
            cycle_error: cycle.is_none(),
        }
    }
}
