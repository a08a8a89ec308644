//! Post-hoc summary of a simulation run.

use std::fmt;

use serde::Serialize;

use super::runner::StepRecord;

/// Aggregate figures derived from a complete run.
///
/// Computed from the step records so the report and the per-step output
/// always agree.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub steps: usize,
    /// Highest measured whole-home power (kW).
    pub peak_kw: f64,
    /// Mean measured whole-home power (kW).
    pub mean_kw: f64,
    /// Steps whose measured power exceeded the hard limit.
    pub overshoot_steps: usize,
    /// Steps with the guard in shortfall.
    pub shortfall_steps: usize,
    pub shed_actions: usize,
    pub restore_actions: usize,
    /// Devices shed by approved swaps.
    pub swap_victims: usize,
    /// Planned restores the guard refused.
    pub denied_restores: usize,
    pub failed_cycles: usize,
    /// Imported energy over the run (kWh).
    pub energy_kwh: f64,
}

impl RunReport {
    /// Summarizes the records of one run.
    ///
    /// # Arguments
    ///
    /// * `records` - Complete step records
    /// * `step_hours` - Step duration in hours
    /// * `limit_kw` - Hard capacity limit for overshoot counting
    pub fn from_records(records: &[StepRecord], step_hours: f64, limit_kw: f64) -> Self {
        if records.is_empty() {
            return Self::default();
        }

        let mut report = Self {
            steps: records.len(),
            ..Self::default()
        };
        let mut sum_kw = 0.0;
        for r in records {
            sum_kw += r.total_kw;
            report.peak_kw = report.peak_kw.max(r.total_kw);
            if r.total_kw > limit_kw {
                report.overshoot_steps += 1;
            }
            if r.in_shortfall {
                report.shortfall_steps += 1;
            }
            if r.cycle_error {
                report.failed_cycles += 1;
            }
            report.shed_actions += r.shed.len();
            report.restore_actions += r.restored.len();
            report.swap_victims += r.swapped_out.len();
            report.denied_restores += r.denied.len();
        }
        report.mean_kw = sum_kw / records.len() as f64;
        report.energy_kwh = sum_kw * step_hours;
        report
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Run Report ---")?;
        writeln!(f, "Steps:                 {}", self.steps)?;
        writeln!(f, "Peak power:            {:.2} kW", self.peak_kw)?;
        writeln!(f, "Mean power:            {:.2} kW", self.mean_kw)?;
        writeln!(f, "Energy:                {:.2} kWh", self.energy_kwh)?;
        writeln!(f, "Steps over limit:      {}", self.overshoot_steps)?;
        writeln!(f, "Steps in shortfall:    {}", self.shortfall_steps)?;
        writeln!(
            f,
            "Sheds / restores:      {} / {}",
            self.shed_actions, self.restore_actions
        )?;
        writeln!(f, "Swap victims:          {}", self.swap_victims)?;
        writeln!(f, "Denied restores:       {}", self.denied_restores)?;
        write!(f, "Failed cycles:         {}", self.failed_cycles)
    }
}
