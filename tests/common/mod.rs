//! Shared test fixtures for integration tests.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use capacity_planner::clock::ManualClock;
use capacity_planner::control::{
    Actuator, BoxFuture, Controller, ControllerSettings, Dispatcher, EventSink,
};
use capacity_planner::devices::{
    DeviceSnapshot, DeviceSource, DeviceState, RawDevice, ShedBehavior,
};
use capacity_planner::error::{Error, Result};
use capacity_planner::guard::{GuardEvent, GuardSettings};
use capacity_planner::order::Priority;

/// 2023-11-14T22:13:20Z
pub const T0: i64 = 1_700_000_000_000;

/// A validated snapshot with an expected draw.
pub fn snapshot(id: &str, on: bool, priority: u32, kw: f64) -> DeviceSnapshot {
    DeviceSnapshot {
        id: id.to_string(),
        name: id.to_string(),
        state: if on { DeviceState::On } else { DeviceState::Off },
        priority: Priority::new(priority),
        expected_power_kw: Some(kw),
        measured_power_kw: None,
        power_kw: None,
        shed_behavior: ShedBehavior::TurnOff,
    }
}

/// A raw host record with a static nameplate power.
pub fn raw(id: &str, on: bool, priority: i64, kw: f64) -> RawDevice {
    RawDevice {
        id: id.to_string(),
        name: Some(id.to_string()),
        on,
        priority: Some(priority),
        power_kw: Some(kw),
        ..RawDevice::default()
    }
}

/// Guard settings with a 6 kW limit and 0.2 kW margins (soft limit 5.8 kW).
pub fn guard_settings() -> GuardSettings {
    GuardSettings {
        limit_kw: 6.0,
        soft_margin_kw: 0.2,
        restore_margin_kw: 0.2,
        ..GuardSettings::default()
    }
}

pub fn controller_settings() -> ControllerSettings {
    ControllerSettings {
        guard: guard_settings(),
        ..ControllerSettings::default()
    }
}

/// In-memory home: reports device records and switches them on command.
///
/// A temperature setback leaves the device reporting on.
#[derive(Default)]
pub struct FakeHome {
    devices: Mutex<Vec<RawDevice>>,
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeHome {
    pub fn new(devices: Vec<RawDevice>) -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(devices),
            ..Self::default()
        })
    }

    /// Actuator calls so far, as `"shed:<id>"` / `"restore:<id>"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn is_on(&self, id: &str) -> bool {
        self.devices
            .lock()
            .unwrap()
            .iter()
            .any(|d| d.id == id && d.on)
    }

    /// Switches a device the way a resident would, without an actuator call.
    pub fn set_on(&self, id: &str, on: bool) {
        for d in self.devices.lock().unwrap().iter_mut() {
            if d.id == id {
                d.on = on;
            }
        }
    }

    pub fn set_failing(&self, id: &str, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(id.to_string());
        } else {
            set.remove(id);
        }
    }

    fn switch(&self, id: &str, on: bool, verb: &str) -> Result<()> {
        if self.failing.lock().unwrap().contains(id) {
            return Err(Error::Actuation {
                id: id.to_string(),
                message: "device unreachable".to_string(),
            });
        }
        self.set_on(id, on);
        self.calls.lock().unwrap().push(format!("{verb}:{id}"));
        Ok(())
    }
}

impl DeviceSource for FakeHome {
    fn snapshot(&self) -> Vec<RawDevice> {
        self.devices.lock().unwrap().clone()
    }
}

impl Actuator for FakeHome {
    fn shed<'a>(&'a self, id: &'a str, _name: &'a str, behavior: &'a ShedBehavior) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let on = !behavior.frees_full_power() && self.is_on(id);
            self.switch(id, on, "shed")
        })
    }

    fn restore<'a>(&'a self, id: &'a str, _name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.switch(id, true, "restore") })
    }
}

/// Collects every guard event it receives.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<GuardEvent>>,
}

impl EventSink for RecordingSink {
    fn handle<'a>(&'a self, event: &'a GuardEvent) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        })
    }
}

/// A heater (priority 10, 3 kW) and a fridge (priority 1, 2 kW), both on.
pub fn two_device_home() -> Arc<FakeHome> {
    FakeHome::new(vec![raw("heater", true, 10, 3.0), raw("fridge", true, 1, 2.0)])
}

/// Controller over `home` with a manual clock starting at [`T0`].
pub fn controller(home: &Arc<FakeHome>) -> (Controller, ManualClock) {
    controller_with(home, controller_settings())
}

pub fn controller_with(home: &Arc<FakeHome>, settings: ControllerSettings) -> (Controller, ManualClock) {
    let clock = ManualClock::new(T0);
    let controller = Controller::new(
        settings,
        home.clone(),
        Dispatcher::new(home.clone()),
        Arc::new(clock.clone()),
    );
    (controller, clock)
}
