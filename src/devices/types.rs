//! Device snapshot types shared by the guard and the planner.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::order::Priority;

/// Power assumed for a load when nothing better is known (kW).
pub const DEFAULT_POWER_KW: f64 = 1.0;

/// Reported on/off state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    On,
    Off,
}

impl DeviceState {
    pub fn is_on(self) -> bool {
        self == DeviceState::On
    }
}

/// How a device is shed.
///
/// A temperature setback keeps the device running at a lower setpoint, so it
/// frees an unknown share of its draw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ShedBehavior {
    #[default]
    TurnOff,
    SetTemperature { temperature: f64 },
}

impl ShedBehavior {
    /// `true` when shedding frees the device's whole draw.
    pub fn frees_full_power(&self) -> bool {
        matches!(self, ShedBehavior::TurnOff)
    }
}

/// A device record as handed over by the host, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawDevice {
    pub id: String,
    pub name: Option<String>,
    pub on: bool,
    pub priority: Option<i64>,
    pub expected_power_kw: Option<f64>,
    pub measured_power_kw: Option<f64>,
    pub power_kw: Option<f64>,
    pub shed_behavior: Option<ShedBehavior>,
}

/// A validated device record for one planning cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    pub id: String,
    pub name: String,
    pub state: DeviceState,
    pub priority: Priority,
    pub expected_power_kw: Option<f64>,
    pub measured_power_kw: Option<f64>,
    /// Static nameplate power, if the host knows it.
    pub power_kw: Option<f64>,
    pub shed_behavior: ShedBehavior,
}

impl DeviceSnapshot {
    /// Best available power estimate in kW.
    ///
    /// Prefers the expected draw, then a positive measurement, then the
    /// static power, then [`DEFAULT_POWER_KW`].
    pub fn estimated_power_kw(&self) -> f64 {
        if let Some(kw) = self.expected_power_kw {
            return kw;
        }
        if let Some(kw) = self.measured_power_kw.filter(|kw| *kw > 0.0) {
            return kw;
        }
        self.power_kw.unwrap_or(DEFAULT_POWER_KW)
    }

    pub fn is_on(&self) -> bool {
        self.state.is_on()
    }
}

fn check_power(id: &str, field: &str, value: Option<f64>) -> Result<Option<f64>> {
    match value {
        Some(kw) if !kw.is_finite() || kw < 0.0 => Err(Error::InvalidDevice {
            id: id.to_string(),
            reason: format!("{field} must be a finite, non-negative number, got {kw}"),
        }),
        other => Ok(other),
    }
}

impl TryFrom<RawDevice> for DeviceSnapshot {
    type Error = Error;

    fn try_from(raw: RawDevice) -> Result<Self> {
        let id = raw.id.trim().to_string();
        if id.is_empty() {
            return Err(Error::InvalidDevice {
                id: raw.id,
                reason: "id must not be empty".to_string(),
            });
        }
        let priority = Priority::parse(raw.priority).ok_or_else(|| Error::InvalidDevice {
            id: id.clone(),
            reason: format!("priority must be >= 1, got {:?}", raw.priority),
        })?;
        let expected_power_kw = check_power(&id, "expected_power_kw", raw.expected_power_kw)?;
        let measured_power_kw = check_power(&id, "measured_power_kw", raw.measured_power_kw)?;
        let power_kw = check_power(&id, "power_kw", raw.power_kw)?;
        if let Some(ShedBehavior::SetTemperature { temperature }) = raw.shed_behavior
            && !temperature.is_finite()
        {
            return Err(Error::InvalidDevice {
                id,
                reason: "setback temperature must be finite".to_string(),
            });
        }

        Ok(Self {
            name: raw.name.unwrap_or_else(|| id.clone()),
            id,
            state: if raw.on { DeviceState::On } else { DeviceState::Off },
            priority,
            expected_power_kw,
            measured_power_kw,
            power_kw,
            shed_behavior: raw.shed_behavior.unwrap_or_default(),
        })
    }
}

/// Source of per-cycle device snapshots.
pub trait DeviceSource: Send + Sync {
    /// Returns the current device records.
    fn snapshot(&self) -> Vec<RawDevice>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: &str) -> RawDevice {
        RawDevice {
            id: id.to_string(),
            ..RawDevice::default()
        }
    }

    #[test]
    fn estimate_prefers_expected_then_measured_then_static() {
        let mut d = DeviceSnapshot::try_from(raw("heater")).unwrap();
        assert_eq!(d.estimated_power_kw(), DEFAULT_POWER_KW);

        d.power_kw = Some(1.5);
        assert_eq!(d.estimated_power_kw(), 1.5);

        d.measured_power_kw = Some(0.0);
        assert_eq!(d.estimated_power_kw(), 1.5);

        d.measured_power_kw = Some(2.2);
        assert_eq!(d.estimated_power_kw(), 2.2);

        d.expected_power_kw = Some(3.0);
        assert_eq!(d.estimated_power_kw(), 3.0);
    }

    #[test]
    fn missing_fields_get_defaults() {
        let d = DeviceSnapshot::try_from(raw("pump")).unwrap();
        assert_eq!(d.name, "pump");
        assert_eq!(d.state, DeviceState::Off);
        assert_eq!(d.priority, Priority::UNRANKED);
        assert_eq!(d.shed_behavior, ShedBehavior::TurnOff);
    }

    #[test]
    fn rejects_empty_id_and_bad_power() {
        assert!(DeviceSnapshot::try_from(raw("  ")).is_err());

        let mut r = raw("heater");
        r.expected_power_kw = Some(f64::NAN);
        assert!(DeviceSnapshot::try_from(r).is_err());

        let mut r = raw("heater");
        r.priority = Some(0);
        assert!(DeviceSnapshot::try_from(r).is_err());
    }

    #[test]
    fn shed_behavior_parses_from_json() {
        let json = r#"{"id":"tank","on":true,"priority":4,
            "shed_behavior":{"action":"set_temperature","temperature":45.0}}"#;
        let r: RawDevice = serde_json::from_str(json).unwrap();
        let d = DeviceSnapshot::try_from(r).unwrap();
        assert!(d.is_on());
        assert!(!d.shed_behavior.frees_full_power());
    }
}
