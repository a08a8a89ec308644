//! Persisted energy buckets and their time keys.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

pub const MS_PER_HOUR: i64 = 3_600_000;
pub const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// Running sum and sample count for one weekday/hour slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HourlyAverage {
    pub sum: f64,
    pub count: u32,
}

impl HourlyAverage {
    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / f64::from(self.count))
    }
}

/// Tracker state as stored between runs.
///
/// `buckets` holds recent kWh per hour keyed by the hour's UTC start;
/// older hours live on only as `daily_totals` and `hourly_averages`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerTrackerState {
    pub last_power_w: Option<f64>,
    pub last_timestamp: Option<i64>,
    pub buckets: BTreeMap<String, f64>,
    pub daily_totals: BTreeMap<String, f64>,
    pub hourly_averages: BTreeMap<String, HourlyAverage>,
}

/// Start of the UTC hour containing `at_ms`, in milliseconds.
pub fn hour_start_ms(at_ms: i64) -> i64 {
    at_ms - at_ms.rem_euclid(MS_PER_HOUR)
}

/// ISO-8601 key of the UTC hour containing `at_ms`, e.g. `2024-03-01T13:00:00.000Z`.
pub fn hour_key(at_ms: i64) -> Option<String> {
    let start = DateTime::<Utc>::from_timestamp_millis(hour_start_ms(at_ms))?;
    Some(start.format("%Y-%m-%dT%H:00:00.000Z").to_string())
}

pub fn parse_hour_key(key: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(key)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// `"<weekday>_<hour>"` with Sunday as weekday 0.
pub fn weekday_hour_key(at: &DateTime<Utc>) -> String {
    format!("{}_{}", at.weekday().num_days_from_sunday(), at.hour())
}
