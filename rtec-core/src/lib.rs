//!
//! Rtec-Core is a collection of types and traits that layout the core of the
//! rtec execution context framework.
//!
//! Nothing in this crate performs any scheduling.  Instead it describes the
//! vocabulary shared between the components being scheduled, the execution
//! contexts scheduling them and whatever remote-invocation layer exposes the
//! administrative operations to the outside world.
//!

#![deny(unsafe_code)]
#![deny(missing_docs)]

pub mod return_code;
pub use return_code::ReturnCode;

pub mod lifecycle;
pub use lifecycle::LifecycleState;

pub mod component;
pub use component::{ComponentId, ComponentProxy};

pub mod execution_context;
pub use execution_context::{
    ExecutionContextService, ExecutionKind, ProfileSnapshot, Properties, SchedulerRunState,
};
