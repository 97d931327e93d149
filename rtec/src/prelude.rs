//!
//! The RTEC Prelude contains the types and traits needed by almost every
//! user of the framework.
//!

pub use rtec_core::{
    ComponentId, ComponentProxy, ExecutionContextService, ExecutionKind, LifecycleState,
    ReturnCode,
};

pub use rtec_executors::{EcConfig, EcError, ExecutionContext, Manager};
