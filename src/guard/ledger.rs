//! Allocation ledger of controllable loads.

use serde::Serialize;

use crate::devices::DeviceSnapshot;
use crate::order::Priority;

/// What the guard wants a load to be doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Desired {
    On,
    Off,
    Shed,
}

/// One entry of the guard's ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllableLoad {
    pub id: String,
    pub name: String,
    pub expected_power_kw: f64,
    pub priority: Priority,
    pub desired: Desired,
}

/// Loads in registration order plus the cached allocation total.
///
/// Registration order is the tie-breaker for equal priorities.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    loads: Vec<ControllableLoad>,
    allocated_kw: f64,
}

impl Ledger {
    /// Sum of expected power over loads desired On.
    pub fn allocated_kw(&self) -> f64 {
        self.allocated_kw
    }

    /// Allocation with `id` left out, used when re-admitting a known load.
    pub fn allocated_kw_excluding(&self, id: &str) -> f64 {
        self.loads
            .iter()
            .filter(|l| l.desired == Desired::On && l.id != id)
            .map(|l| l.expected_power_kw)
            .sum()
    }

    pub fn get(&self, id: &str) -> Option<&ControllableLoad> {
        self.loads.iter().find(|l| l.id == id)
    }

    pub fn loads(&self) -> &[ControllableLoad] {
        &self.loads
    }

    /// Inserts or replaces the entry for `load.id`, keeping its position.
    pub fn upsert(&mut self, load: ControllableLoad) {
        match self.loads.iter_mut().find(|l| l.id == load.id) {
            Some(existing) => *existing = load,
            None => self.loads.push(load),
        }
        self.recompute();
    }

    /// Sets the desired state of `id`. Returns `false` if the id is unknown.
    pub fn set_desired(&mut self, id: &str, desired: Desired) -> bool {
        let Some(load) = self.loads.iter_mut().find(|l| l.id == id) else {
            return false;
        };
        load.desired = desired;
        self.recompute();
        true
    }

    /// Replaces the ledger with a device snapshot.
    ///
    /// Loads this ledger has shed stay Shed whatever the device reports, so a
    /// failed shed is retried until the load is admitted again. Other devices
    /// follow their reported state.
    pub fn sync(&mut self, devices: &[DeviceSnapshot]) {
        let loads = devices
            .iter()
            .map(|d| {
                let was_shed = self.get(&d.id).is_some_and(|l| l.desired == Desired::Shed);
                let desired = match (was_shed, d.is_on()) {
                    (true, _) => Desired::Shed,
                    (false, true) => Desired::On,
                    (false, false) => Desired::Off,
                };
                ControllableLoad {
                    id: d.id.clone(),
                    name: d.name.clone(),
                    expected_power_kw: d.estimated_power_kw(),
                    priority: d.priority,
                    desired,
                }
            })
            .collect();
        self.loads = loads;
        self.recompute();
    }

    fn recompute(&mut self) {
        self.allocated_kw = self
            .loads
            .iter()
            .filter(|l| l.desired == Desired::On)
            .map(|l| l.expected_power_kw)
            .sum();
    }
}
