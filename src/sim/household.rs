//! Simulated household: base load plus devices that obey the actuator.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::DeviceConfig;
use crate::control::{Actuator, BoxFuture};
use crate::devices::{BaseLoad, DeviceSource, RawDevice, ShedBehavior};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct SimDevice {
    config: DeviceConfig,
    on: bool,
}

/// A household whose controllable devices switch when actuated and whose
/// whole-home power is the base load plus every running device.
///
/// A device set back to a lower temperature is treated as idle: it reports
/// off and draws nothing until restored.
#[derive(Debug)]
pub struct Household {
    devices: Mutex<Vec<SimDevice>>,
    base: Mutex<BaseLoad>,
}

impl Household {
    pub fn new(devices: &[DeviceConfig], base: BaseLoad) -> Self {
        let devices = devices
            .iter()
            .map(|config| SimDevice {
                config: config.clone(),
                on: config.on,
            })
            .collect();
        Self {
            devices: Mutex::new(devices),
            base: Mutex::new(base),
        }
    }

    fn devices(&self) -> MutexGuard<'_, Vec<SimDevice>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whole-home draw at `at_ms` (kW). Samples fresh base-load noise.
    pub fn total_power_kw(&self, at_ms: i64) -> f64 {
        let base = self
            .base
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .demand_kw(at_ms);
        base + self.controllable_power_kw()
    }

    /// Draw of the running controllable devices (kW).
    pub fn controllable_power_kw(&self) -> f64 {
        self.devices()
            .iter()
            .filter(|d| d.on)
            .map(|d| d.config.power_kw)
            .sum()
    }

    pub fn is_on(&self, id: &str) -> Option<bool> {
        self.devices().iter().find(|d| d.config.id == id).map(|d| d.on)
    }

    pub fn running_count(&self) -> usize {
        self.devices().iter().filter(|d| d.on).count()
    }

    /// Switches a device behind the controller's back, as a resident would.
    pub fn set_on(&self, id: &str, on: bool) -> Result<()> {
        let mut devices = self.devices();
        let device = devices
            .iter_mut()
            .find(|d| d.config.id == id)
            .ok_or_else(|| Error::Actuation {
                id: id.to_string(),
                message: "no such device".to_string(),
            })?;
        device.on = on;
        Ok(())
    }
}

impl DeviceSource for Household {
    fn snapshot(&self) -> Vec<RawDevice> {
        self.devices()
            .iter()
            .map(|d| {
                let measured = if d.on { d.config.power_kw } else { 0.0 };
                d.config.to_raw(d.on, Some(measured))
            })
            .collect()
    }
}

impl Actuator for Household {
    fn shed<'a>(&'a self, id: &'a str, _name: &'a str, _behavior: &'a ShedBehavior) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.set_on(id, false) })
    }

    fn restore<'a>(&'a self, id: &'a str, _name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.set_on(id, true) })
    }
}
