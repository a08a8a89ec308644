//! Step integration of whole-home power samples into hourly energy.

use chrono::{DateTime, Duration, NaiveDate, Utc, Weekday};
use tracing::{debug, warn};

use super::state::{
    HourlyAverage, MS_PER_DAY, MS_PER_HOUR, PowerTrackerState, date_key, hour_key, hour_start_ms,
    parse_hour_key, weekday_hour_key,
};

/// Prior timestamps below this are taken to be in seconds, not milliseconds.
const SECONDS_TIMESTAMP_CEILING: i64 = 100_000_000_000;

/// Retention windows of the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSettings {
    /// Hourly buckets older than this roll up into daily totals.
    pub retention_days: i64,
    /// Daily totals older than this are dropped.
    pub daily_retention_days: i64,
    /// Gaps longer than this restart integration instead of back-filling.
    pub max_gap_ms: i64,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            retention_days: 30,
            daily_retention_days: 365,
            max_gap_ms: 48 * MS_PER_HOUR,
        }
    }
}

/// Result of feeding one sample to the tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleOutcome {
    /// Rejected input; state unchanged.
    Ignored,
    /// New baseline without back-fill.
    Reset,
    /// Energy added since the previous sample.
    Accumulated { kwh: f64 },
}

#[derive(Debug, Clone, Default)]
pub struct PowerTracker {
    settings: TrackerSettings,
    state: PowerTrackerState,
}

impl PowerTracker {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            settings,
            state: PowerTrackerState::default(),
        }
    }

    pub fn with_state(settings: TrackerSettings, state: PowerTrackerState) -> Self {
        Self { settings, state }
    }

    pub fn state(&self) -> &PowerTrackerState {
        &self.state
    }

    /// Records an instantaneous power reading.
    ///
    /// The interval since the previous sample is charged at the previous
    /// power, split at hour boundaries.
    ///
    /// # Arguments
    ///
    /// * `power_w` - Whole-home power in watts
    /// * `at_ms` - Sample time in Unix milliseconds
    pub fn record_sample(&mut self, power_w: f64, at_ms: i64) -> SampleOutcome {
        if !power_w.is_finite() || power_w < 0.0 {
            warn!(power_w, "ignoring invalid power sample");
            return SampleOutcome::Ignored;
        }
        if DateTime::<Utc>::from_timestamp_millis(at_ms).is_none() {
            warn!(at_ms, "ignoring sample with unrepresentable timestamp");
            return SampleOutcome::Ignored;
        }

        let previous = match (self.state.last_timestamp, self.state.last_power_w) {
            (Some(ts), Some(w)) => Some((ts, w)),
            _ => None,
        };
        let outcome = match previous {
            Some((prev_ts, prev_w)) if self.can_integrate(prev_ts, at_ms) => {
                SampleOutcome::Accumulated {
                    kwh: self.accumulate(prev_ts, at_ms, prev_w / 1000.0),
                }
            }
            Some((prev_ts, _)) => {
                debug!(prev_ts, at_ms, "power tracker baseline reset");
                SampleOutcome::Reset
            }
            None => SampleOutcome::Reset,
        };

        self.state.last_power_w = Some(power_w);
        self.state.last_timestamp = Some(at_ms);
        self.prune(at_ms);
        outcome
    }

    fn can_integrate(&self, prev_ts: i64, at_ms: i64) -> bool {
        let gap = at_ms - prev_ts;
        prev_ts >= SECONDS_TIMESTAMP_CEILING && gap >= 0 && gap <= self.settings.max_gap_ms
    }

    fn accumulate(&mut self, from_ms: i64, to_ms: i64, kw: f64) -> f64 {
        let mut total = 0.0;
        let mut cursor = from_ms;
        while cursor < to_ms {
            let segment_end = (hour_start_ms(cursor) + MS_PER_HOUR).min(to_ms);
            let kwh = (segment_end - cursor) as f64 * kw / MS_PER_HOUR as f64;
            if let Some(key) = hour_key(cursor) {
                *self.state.buckets.entry(key).or_insert(0.0) += kwh;
                total += kwh;
            }
            cursor = segment_end;
        }
        total
    }

    /// Rolls hourly buckets past retention into daily totals and weekday/hour
    /// averages, then drops daily totals past their own retention.
    pub fn prune(&mut self, now_ms: i64) {
        let bucket_cutoff = now_ms - self.settings.retention_days * MS_PER_DAY;
        let expired: Vec<String> = self
            .state
            .buckets
            .keys()
            .filter(|key| parse_hour_key(key).is_none_or(|t| t.timestamp_millis() < bucket_cutoff))
            .cloned()
            .collect();

        for key in expired {
            let Some(kwh) = self.state.buckets.remove(&key) else {
                continue;
            };
            let Some(at) = parse_hour_key(&key) else {
                warn!(bucket = %key, "dropping bucket with malformed key");
                continue;
            };
            *self
                .state
                .daily_totals
                .entry(date_key(at.date_naive()))
                .or_insert(0.0) += kwh;
            let slot = self
                .state
                .hourly_averages
                .entry(weekday_hour_key(&at))
                .or_default();
            slot.sum += kwh;
            slot.count += 1;
        }

        let Some(now) = DateTime::<Utc>::from_timestamp_millis(now_ms) else {
            return;
        };
        let day_cutoff = now.date_naive() - Duration::days(self.settings.daily_retention_days);
        self.state.daily_totals.retain(|date, _| {
            NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok_and(|d| d >= day_cutoff)
        });
    }

    /// Latest valid reading in kW.
    pub fn last_power_kw(&self) -> Option<f64> {
        self.state.last_power_w.map(|w| w / 1000.0)
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.state.last_timestamp
    }

    /// Energy in the hour containing `at_ms`.
    pub fn hour_kwh(&self, at_ms: i64) -> f64 {
        hour_key(at_ms)
            .and_then(|key| self.state.buckets.get(&key).copied())
            .unwrap_or(0.0)
    }

    /// Energy on a UTC date, from rolled-up totals and live buckets.
    pub fn day_kwh(&self, date: NaiveDate) -> f64 {
        let key = date_key(date);
        let rolled = self.state.daily_totals.get(&key).copied().unwrap_or(0.0);
        let live: f64 = self
            .state
            .buckets
            .iter()
            .filter(|(k, _)| k.starts_with(&key))
            .map(|(_, kwh)| kwh)
            .sum();
        rolled + live
    }

    /// All energy still held, rolled-up and live.
    pub fn total_kwh(&self) -> f64 {
        self.state.buckets.values().sum::<f64>() + self.state.daily_totals.values().sum::<f64>()
    }

    /// Mean hourly energy of rolled-up buckets for a weekday and UTC hour.
    pub fn hourly_average_kwh(&self, weekday: Weekday, hour: u32) -> Option<f64> {
        let key = format!("{}_{hour}", weekday.num_days_from_sunday());
        self.state.hourly_averages.get(&key).and_then(HourlyAverage::average)
    }
}
