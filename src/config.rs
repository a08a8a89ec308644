//! TOML-based controller configuration and preset definitions.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::control::ControllerSettings;
use crate::devices::{RawDevice, ShedBehavior};
use crate::error::Error;
use crate::guard::GuardSettings;
use crate::plan::PlannerSettings;
use crate::tracker::TrackerSettings;

/// Top-level configuration parsed from TOML.
///
/// All sections have defaults matching the baseline preset. Load from
/// TOML with [`ControllerConfig::from_toml_file`] or use
/// [`ControllerConfig::baseline`] for the built-in default.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerConfig {
    /// Capacity limit and hysteresis margins.
    #[serde(default)]
    pub guard: GuardConfig,
    /// Restore cooldowns and swap timing.
    #[serde(default)]
    pub planner: PlannerConfig,
    /// Energy bucket retention.
    #[serde(default)]
    pub tracker: TrackerConfig,
    /// Control loop timing.
    #[serde(default)]
    pub controller: LoopConfig,
    /// Simulated household driving the controller.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Controllable devices of the simulated household.
    #[serde(default = "default_devices")]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GuardConfig {
    /// Hard capacity limit (kW).
    pub limit_kw: f64,
    /// Safety margin below the limit (kW).
    pub soft_margin_kw: f64,
    /// Headroom needed before shedding ends (kW).
    pub restore_margin_kw: f64,
    /// Slack kept free when admitting loads (kW).
    pub plan_reserve_kw: f64,
    /// Seconds of recovered headroom before a shortfall clears.
    pub shortfall_sustain_s: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            limit_kw: 10.0,
            soft_margin_kw: 0.2,
            restore_margin_kw: 0.2,
            plan_reserve_kw: 0.0,
            shortfall_sustain_s: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlannerConfig {
    pub shed_cooldown_s: u64,
    pub restore_cooldown_s: u64,
    pub swap_timeout_s: u64,
    pub recent_shed_backoff_s: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            shed_cooldown_s: 60,
            restore_cooldown_s: 30,
            swap_timeout_s: 60,
            recent_shed_backoff_s: 180,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerConfig {
    /// Days of hourly buckets kept before roll-up.
    pub retention_days: u32,
    /// Days of daily totals kept.
    pub daily_retention_days: u32,
    /// Longest sample gap still integrated (hours).
    pub max_gap_hours: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            daily_retention_days: 365,
            max_gap_hours: 48,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoopConfig {
    /// Period of the timer-driven cycle (seconds).
    pub tick_interval_s: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self { tick_interval_s: 3 }
    }
}

/// Simulation timing and base-load parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Number of steps to run (must be > 0).
    pub steps: usize,
    /// Simulated seconds per step (must be > 0).
    pub step_seconds: u64,
    /// Master random seed.
    pub seed: u64,
    /// Start time in Unix milliseconds.
    pub start_ms: i64,
    /// Uncontrolled household consumption (kW).
    pub base_load_kw: f64,
    /// Daily sinusoidal amplitude of the base load (kW).
    pub base_amp_kw: f64,
    /// Phase offset of the base load (radians).
    pub base_phase_rad: f64,
    /// Gaussian noise standard deviation (kW).
    pub noise_std_kw: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            steps: 240,
            step_seconds: 15,
            seed: 42,
            // 2024-01-15T17:00:00Z, evening peak
            start_ms: 1_705_338_000_000,
            base_load_kw: 1.5,
            base_amp_kw: 0.8,
            base_phase_rad: 1.2,
            noise_std_kw: 0.1,
        }
    }
}

/// One controllable device of the simulated household.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// 1 is most important; omitted means unranked.
    #[serde(default)]
    pub priority: Option<i64>,
    /// Draw while running (kW).
    pub power_kw: f64,
    #[serde(default = "default_on")]
    pub on: bool,
    #[serde(default)]
    pub shed_behavior: ShedBehavior,
}

fn default_on() -> bool {
    true
}

impl DeviceConfig {
    fn new(id: &str, name: &str, priority: i64, power_kw: f64) -> Self {
        Self {
            id: id.to_string(),
            name: Some(name.to_string()),
            priority: Some(priority),
            power_kw,
            on: true,
            shed_behavior: ShedBehavior::TurnOff,
        }
    }

    /// The record a device source would report for this device.
    pub fn to_raw(&self, on: bool, measured_kw: Option<f64>) -> RawDevice {
        RawDevice {
            id: self.id.clone(),
            name: self.name.clone(),
            on,
            priority: self.priority,
            expected_power_kw: None,
            measured_power_kw: measured_kw,
            power_kw: Some(self.power_kw),
            shed_behavior: Some(self.shed_behavior),
        }
    }
}

fn default_devices() -> Vec<DeviceConfig> {
    vec![
        DeviceConfig::new("heat_pump", "Heat pump", 1, 2.5),
        DeviceConfig {
            shed_behavior: ShedBehavior::SetTemperature { temperature: 45.0 },
            ..DeviceConfig::new("water_heater", "Water heater", 3, 3.0)
        },
        DeviceConfig::new("ev_charger", "EV charger", 5, 7.0),
        DeviceConfig::new("dryer", "Tumble dryer", 8, 2.0),
        DeviceConfig {
            priority: None,
            ..DeviceConfig::new("floor_heat", "Bathroom floor heat", 0, 1.2)
        },
    ]
}

/// Configuration error with field path and constraint description.
#[derive(Debug)]
pub struct ConfigError {
    /// Dotted field path (e.g., `"guard.limit_kw"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}: {}", self.field, self.message)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

impl ControllerConfig {
    /// Returns the baseline preset: a 10 kW main fuse and five devices.
    pub fn baseline() -> Self {
        Self {
            guard: GuardConfig::default(),
            planner: PlannerConfig::default(),
            tracker: TrackerConfig::default(),
            controller: LoopConfig::default(),
            simulation: SimulationConfig::default(),
            devices: default_devices(),
        }
    }

    /// Returns the tight-limit preset: a 6 kW limit with a heavier base
    /// load, so shortfalls and swaps are frequent.
    pub fn tight_limit() -> Self {
        Self {
            guard: GuardConfig {
                limit_kw: 6.0,
                soft_margin_kw: 0.3,
                plan_reserve_kw: 0.2,
                ..GuardConfig::default()
            },
            simulation: SimulationConfig {
                base_load_kw: 2.0,
                noise_std_kw: 0.2,
                ..SimulationConfig::default()
            },
            ..Self::baseline()
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["baseline", "tight_limit"];

    /// Loads a configuration from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "baseline" => Ok(Self::baseline()),
            "tight_limit" => Ok(Self::tight_limit()),
            _ => Err(ConfigError {
                field: "preset".to_string(),
                message: format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            }),
        }
    }

    /// Parses a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            field: "config".to_string(),
            message: format!("cannot read \"{}\": {e}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError {
            field: "toml".to_string(),
            message: e.to_string(),
        })
    }

    /// Engine settings with seconds converted to milliseconds.
    pub fn controller_settings(&self) -> ControllerSettings {
        let g = &self.guard;
        let p = &self.planner;
        let t = &self.tracker;
        ControllerSettings {
            guard: GuardSettings {
                limit_kw: g.limit_kw,
                soft_margin_kw: g.soft_margin_kw,
                restore_margin_kw: g.restore_margin_kw,
                plan_reserve_kw: g.plan_reserve_kw,
                shortfall_sustain_ms: secs_to_ms(g.shortfall_sustain_s),
            },
            planner: PlannerSettings {
                shed_cooldown_ms: secs_to_ms(p.shed_cooldown_s),
                restore_cooldown_ms: secs_to_ms(p.restore_cooldown_s),
                swap_timeout_ms: secs_to_ms(p.swap_timeout_s),
                recent_shed_backoff_ms: secs_to_ms(p.recent_shed_backoff_s),
                ..PlannerSettings::default()
            },
            tracker: TrackerSettings {
                retention_days: i64::from(t.retention_days),
                daily_retention_days: i64::from(t.daily_retention_days),
                max_gap_ms: i64::from(t.max_gap_hours) * 3_600_000,
            },
            tick_interval: Duration::from_secs(self.controller.tick_interval_s),
        }
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut check = |ok: bool, field: &str, message: &str| {
            if !ok {
                errors.push(ConfigError {
                    field: field.to_string(),
                    message: message.to_string(),
                });
            }
        };

        let g = &self.guard;
        check(non_negative(g.limit_kw), "guard.limit_kw", "must be finite and >= 0");
        check(
            non_negative(g.soft_margin_kw),
            "guard.soft_margin_kw",
            "must be finite and >= 0",
        );
        check(
            non_negative(g.restore_margin_kw),
            "guard.restore_margin_kw",
            "must be finite and >= 0",
        );
        check(
            non_negative(g.plan_reserve_kw),
            "guard.plan_reserve_kw",
            "must be finite and >= 0",
        );
        check(
            g.soft_margin_kw + g.plan_reserve_kw < g.limit_kw,
            "guard.soft_margin_kw",
            "soft margin plus plan reserve must leave room under guard.limit_kw",
        );
        check(
            self.controller.tick_interval_s > 0,
            "controller.tick_interval_s",
            "must be > 0",
        );
        check(
            self.tracker.retention_days > 0,
            "tracker.retention_days",
            "must be > 0",
        );
        check(
            self.tracker.daily_retention_days >= self.tracker.retention_days,
            "tracker.daily_retention_days",
            "must be >= tracker.retention_days",
        );

        let s = &self.simulation;
        check(s.steps > 0, "simulation.steps", "must be > 0");
        check(s.step_seconds > 0, "simulation.step_seconds", "must be > 0");
        check(
            non_negative(s.base_load_kw),
            "simulation.base_load_kw",
            "must be finite and >= 0",
        );
        check(
            non_negative(s.noise_std_kw),
            "simulation.noise_std_kw",
            "must be finite and >= 0",
        );
        check(
            s.base_amp_kw.is_finite() && s.base_phase_rad.is_finite(),
            "simulation.base_amp_kw",
            "amplitude and phase must be finite",
        );

        let mut seen = HashSet::new();
        for (i, d) in self.devices.iter().enumerate() {
            check(!d.id.trim().is_empty(), &format!("devices[{i}].id"), "must not be empty");
            check(
                seen.insert(d.id.as_str()),
                &format!("devices[{i}].id"),
                &format!("duplicate id \"{}\"", d.id),
            );
            check(
                d.priority.is_none_or(|p| p >= 1),
                &format!("devices[{i}].priority"),
                "must be >= 1",
            );
            check(
                non_negative(d.power_kw),
                &format!("devices[{i}].power_kw"),
                "must be finite and >= 0",
            );
            if let ShedBehavior::SetTemperature { temperature } = d.shed_behavior {
                check(
                    temperature.is_finite(),
                    &format!("devices[{i}].shed_behavior.temperature"),
                    "must be finite",
                );
            }
        }

        errors
    }
}

fn non_negative(v: f64) -> bool {
    v.is_finite() && v >= 0.0
}

fn secs_to_ms(s: u64) -> i64 {
    i64::try_from(s.saturating_mul(1000)).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_preset_valid() {
        let cfg = ControllerConfig::baseline();
        let errors = cfg.validate();
        assert!(errors.is_empty(), "baseline should be valid: {errors:?}");
    }

    #[test]
    fn from_preset_unknown() {
        let err = ControllerConfig::from_preset("nonexistent");
        assert!(err.is_err());
        let e = err.unwrap_err();
        assert!(e.message.contains("unknown preset"));
    }

    #[test]
    fn valid_toml_parses() {
        let toml = r#"
[guard]
limit_kw = 8.0
soft_margin_kw = 0.5
shortfall_sustain_s = 120

[planner]
restore_cooldown_s = 45

[controller]
tick_interval_s = 5

[simulation]
steps = 100
seed = 7

[[devices]]
id = "boiler"
priority = 2
power_kw = 3.0
shed_behavior = { action = "set_temperature", temperature = 40.0 }

[[devices]]
id = "sauna"
power_kw = 6.0
on = false
"#;
        let cfg = ControllerConfig::from_toml_str(toml);
        assert!(cfg.is_ok(), "valid TOML should parse: {:?}", cfg.err());
        let cfg = cfg.unwrap();
        assert_eq!(cfg.devices.len(), 2);
        assert_eq!(
            cfg.devices[0].shed_behavior,
            ShedBehavior::SetTemperature { temperature: 40.0 }
        );
        assert_eq!(cfg.devices[1].priority, None);
        assert!(!cfg.devices[1].on);

        let settings = cfg.controller_settings();
        assert_eq!(settings.guard.shortfall_sustain_ms, 120_000);
        assert_eq!(settings.planner.restore_cooldown_ms, 45_000);
        assert_eq!(settings.planner.shed_cooldown_ms, 60_000);
        assert_eq!(settings.tick_interval, Duration::from_secs(5));
    }

    #[test]
    fn invalid_toml_unknown_field() {
        let toml = r#"
[guard]
limit_kw = 8.0
bogus_field = true
"#;
        assert!(ControllerConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn validation_catches_negative_limit() {
        let mut cfg = ControllerConfig::baseline();
        cfg.guard.limit_kw = -1.0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "guard.limit_kw"));
    }

    #[test]
    fn validation_catches_duplicate_and_bad_devices() {
        let mut cfg = ControllerConfig::baseline();
        cfg.devices.push(DeviceConfig::new("dryer", "Second dryer", 0, f64::NAN));
        let errors = cfg.validate();
        let idx = cfg.devices.len() - 1;
        assert!(errors.iter().any(|e| e.field == format!("devices[{idx}].id")));
        assert!(errors.iter().any(|e| e.field == format!("devices[{idx}].priority")));
        assert!(errors.iter().any(|e| e.field == format!("devices[{idx}].power_kw")));
    }

    #[test]
    fn all_presets_are_valid() {
        for name in ControllerConfig::PRESETS {
            let cfg = ControllerConfig::from_preset(name);
            assert!(cfg.is_ok(), "preset \"{name}\" should load");
            let errors = cfg.as_ref().map(|c| c.validate()).unwrap_or_default();
            assert!(
                errors.is_empty(),
                "preset \"{name}\" should be valid: {errors:?}"
            );
        }
    }

    #[test]
    fn tight_limit_is_tighter() {
        let base = ControllerConfig::baseline();
        let tight = ControllerConfig::tight_limit();
        assert!(tight.guard.limit_kw < base.guard.limit_kw);
        assert_eq!(tight.devices.len(), base.devices.len());
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let toml = r#"
[simulation]
seed = 99
"#;
        let cfg = ControllerConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.simulation.seed, 99);
        assert_eq!(cfg.simulation.steps, 240);
        assert_eq!(cfg.guard.limit_kw, 10.0);
        assert_eq!(cfg.devices.len(), 5);
    }
}
