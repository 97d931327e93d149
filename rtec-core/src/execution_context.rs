//!
//! An execution context handles the scheduling and execution of components.
//!
//! In all likelihood most users should use one of the execution contexts
//! provided in rtec-executors.  This trait does, however, create a common
//! interface for administering any execution context and is the surface a
//! remote-invocation layer is expected to expose over the wire.
//!

use std::{collections::BTreeMap, fmt, str::FromStr, time::Duration};

use crate::{ComponentId, LifecycleState, ReturnCode};

/// The property bag of an execution context
pub type Properties = BTreeMap<String, String>;

/// The timing model of an execution context
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExecutionKind {
    /// Ticks happen at a fixed rate
    Periodic,
    /// Ticks are triggered by an external event
    EventDriven,
    /// Any other timing model
    Other,
}

impl ExecutionKind {
    /// The canonical upper-case name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionKind::Periodic => "PERIODIC",
            ExecutionKind::EventDriven => "EVENT_DRIVEN",
            ExecutionKind::Other => "OTHER",
        }
    }
}

impl fmt::Display for ExecutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionKind {
    type Err = ReturnCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PERIODIC" => Ok(ExecutionKind::Periodic),
            "EVENT_DRIVEN" => Ok(ExecutionKind::EventDriven),
            "OTHER" => Ok(ExecutionKind::Other),
            _ => Err(ReturnCode::BadParameter),
        }
    }
}

impl TryFrom<i32> for ExecutionKind {
    type Error = ReturnCode;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ExecutionKind::Periodic),
            1 => Ok(ExecutionKind::EventDriven),
            2 => Ok(ExecutionKind::Other),
            _ => Err(ReturnCode::BadParameter),
        }
    }
}

/// The current state the worker of an execution context is in.
///
/// This should be taken into account whenever the start or stop methods
/// are called on an execution context so that the worker is only ever
/// opened or joined once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerRunState {
    /// There is no worker.
    Stopped,
    /// The worker exists but is blocked until a participant needs it.
    Parked,
    /// The worker is cycling through ticks.
    Ticking,
}

/// A deep copy of the administrative state of an execution context.
///
/// Snapshots never refer back into the execution context so callers may
/// keep them for as long as they like.
#[derive(Clone, Debug, PartialEq)]
pub struct ProfileSnapshot {
    /// The timing model
    pub kind: ExecutionKind,
    /// The configured rate (in Hz)
    pub rate: f64,
    /// The component owning the execution context, if any
    pub owner: Option<ComponentId>,
    /// The participants in insertion order
    pub participants: Vec<ComponentId>,
    /// The property bag
    pub properties: Properties,
}

impl ProfileSnapshot {
    /// The configured period (the inverse of the rate)
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate)
    }
}

/// The administrative operation surface of an execution context.
///
/// Every operation may be invoked concurrently from any number of
/// administrative callers and none of them wait for the worker to complete
/// a tick.  Failures are reported through the returned [`ReturnCode`] and
/// never by panicking.
pub trait ExecutionContextService: Send + Sync {
    /// Open the worker (if it is not already open) and let it tick whenever
    /// a participant needs it.
    ///
    /// Starting an already running execution context succeeds without
    /// doing anything.
    fn start(&self) -> ReturnCode;

    /// Ask the worker to exit and wait for it.
    ///
    /// Stopping does not deactivate participants.
    fn stop(&self) -> ReturnCode;

    /// Whether the execution context has been started and not stopped
    fn is_running(&self) -> bool;

    /// The configured rate (in Hz)
    fn get_rate(&self) -> f64;

    /// The configured period
    fn get_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.get_rate())
    }

    /// Change the rate (in Hz).  Non-positive rates are rejected with
    /// [`ReturnCode::BadParameter`].
    fn set_rate(&self, rate: f64) -> ReturnCode;

    /// Attach a component to this execution context
    fn add_component(&self, component: ComponentId) -> ReturnCode;

    /// Detach a component from this execution context
    fn remove_component(&self, component: ComponentId) -> ReturnCode;

    /// Request that an INACTIVE participant becomes ACTIVE
    fn activate_component(&self, component: ComponentId) -> ReturnCode;

    /// Request that an ACTIVE participant becomes INACTIVE
    fn deactivate_component(&self, component: ComponentId) -> ReturnCode;

    /// Request that a participant in ERROR becomes INACTIVE
    fn reset_component(&self, component: ComponentId) -> ReturnCode;

    /// The current state of a participant or [`LifecycleState::Unknown`]
    /// for components that are not participants
    fn get_component_state(&self, component: ComponentId) -> LifecycleState;

    /// The timing model of this execution context
    fn get_kind(&self) -> ExecutionKind;

    /// A deep copy of the administrative state of this execution context
    fn get_profile(&self) -> ProfileSnapshot;
}
