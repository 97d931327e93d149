//!
//! Rtec-Executors provides execution contexts: worker threads that drive
//! the lifecycle of a set of components and tick the active ones.
//!
//! Every execution context runs the same worker loop.  What makes them
//! differ is the [`WaitStrategy`] the worker blocks on between two ticks:
//!
//! * [`PeriodicStrategy`] sleeps cooperatively for whatever is left of the
//!   period.
//! * `RtPreemptStrategy` (Linux only) registers the worker as a real-time
//!   periodic task and sleeps until absolute release times.
//! * [`ExtTriggerStrategy`] waits for something outside the context to call
//!   [`ExecutionContext::tick`].
//!
//! Execution contexts are usually created from an [`EcConfig`] by a
//! [`Manager`], which also owns the components they tick.
//!

#![deny(missing_docs)]

pub mod error;
pub use error::{EcError, Result};

pub mod config;
pub use config::{EcConfig, SchedPolicy};

pub mod arena;
pub use arena::ComponentArena;

mod gate;

pub mod state_machine;
pub use state_machine::{LifecycleStateMachine, States, Transition};

pub mod profile;
pub use profile::{Profile, ProfileView};

pub mod stats;
pub use stats::ExecutionStats;

pub mod strategy;
pub use strategy::{Cycle, Deadline, ExtTriggerStrategy, PeriodicStrategy, WaitStrategy};
#[cfg(target_os = "linux")]
pub use strategy::RtPreemptStrategy;

pub mod execution_context;
pub use execution_context::ExecutionContext;

pub mod factory;
pub use factory::{EcFactoryRegistry, StrategyFactory};

pub mod manager;
pub use manager::Manager;

#[cfg(test)]
mod test_utils;
