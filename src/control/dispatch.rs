//! Side effects of a cycle: actuator calls and event delivery.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::devices::ShedBehavior;
use crate::error::Result;
use crate::guard::GuardEvent;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Switches physical devices. Implemented by the host.
pub trait Actuator: Send + Sync {
    /// Turns a device off or sets it back, per `behavior`.
    fn shed<'a>(&'a self, id: &'a str, name: &'a str, behavior: &'a ShedBehavior) -> BoxFuture<'a, Result<()>>;

    /// Turns a device back on.
    fn restore<'a>(&'a self, id: &'a str, name: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Receives guard events, e.g. for notifications.
pub trait EventSink: Send + Sync {
    fn handle<'a>(&'a self, event: &'a GuardEvent) -> BoxFuture<'a, Result<()>>;
}

/// One actuator call decided by a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Shed {
        id: String,
        name: String,
        behavior: ShedBehavior,
    },
    Restore {
        id: String,
        name: String,
    },
}

impl Action {
    pub fn device_id(&self) -> &str {
        match self {
            Action::Shed { id, .. } | Action::Restore { id, .. } => id,
        }
    }
}

/// Runs actions and events strictly in order, one await at a time.
#[derive(Clone)]
pub struct Dispatcher {
    actuator: Arc<dyn Actuator>,
    sink: Option<Arc<dyn EventSink>>,
}

impl Dispatcher {
    pub fn new(actuator: Arc<dyn Actuator>) -> Self {
        Self {
            actuator,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Delivers events to the sink, if one is set. Stops at the first failure.
    pub async fn publish(&self, events: &[GuardEvent]) -> Result<()> {
        let Some(sink) = &self.sink else {
            return Ok(());
        };
        for event in events {
            sink.handle(event).await?;
        }
        Ok(())
    }

    /// Executes actions in order. Stops at the first failure.
    ///
    /// Returns the number of actions that completed.
    pub async fn execute(&self, actions: &[Action]) -> Result<usize> {
        for (done, action) in actions.iter().enumerate() {
            let outcome = match action {
                Action::Shed { id, name, behavior } => self.actuator.shed(id, name, behavior).await,
                Action::Restore { id, name } => self.actuator.restore(id, name).await,
            };
            if let Err(e) = outcome {
                warn!(
                    device = %action.device_id(),
                    completed = done,
                    error = %e,
                    "actuation failed"
                );
                return Err(e);
            }
            debug!(device = %action.device_id(), ?action, "actuated");
        }
        Ok(actions.len())
    }
}
