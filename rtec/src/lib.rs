//!
//! # RTEC
//!
//! RTEC is a real-time execution context framework for component-based
//! robotics software.
//!
//! ## Description
//!
//! A component is a unit of work with a lifecycle.  An execution context is
//! a worker thread that owns the lifecycle of the components attached to it
//! and periodically invokes the active ones.  Components never run their own
//! threads, so the timing of a whole control loop is decided in one place:
//! the execution context.
//!
//! ## Technical Overview
//!
//! A component implements the `ComponentProxy` trait.  The only required
//! callback is `on_execute`, invoked once per tick while the component is
//! ACTIVE.  Everything else (activation, deactivation, error handling,
//! reset, rate changes) has a default implementation returning OK.
//!
//! The lifecycle of a component inside an execution context looks like:
//!
//! ```text
//! CREATED -> INACTIVE <-> ACTIVE
//!               ^           |
//!               |           v
//!               +-------- ERROR
//! ```
//!
//! Administrative calls (`activate_component`, `deactivate_component`,
//! `reset_component`) only *request* a transition.  The worker applies it on
//! its next tick and invokes the matching callback, so every callback of a
//! component runs on the worker thread.
//!
//! ### Timing models
//!
//! * `periodic` - a cooperative sleep on a plain thread
//! * `rt_preempt` - a real-time periodic task on a PREEMPT_RT Linux kernel
//! * `ext_trigger` - one tick per external trigger
//!
//! ### Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use rtec::prelude::*;
//!
//! struct Blinker;
//!
//! impl ComponentProxy for Blinker {
//!     fn on_execute(&self, cycle: u64) -> ReturnCode {
//!         println!("blink {}", cycle);
//!         ReturnCode::Ok
//!     }
//! }
//!
//! let manager = Manager::new();
//! let blinker = manager.register_component(Arc::new(Blinker));
//! let ec = manager.create_context(&EcConfig::default().rate(2.0)).unwrap();
//! ec.add_component(blinker);
//! ec.activate_component(blinker);
//! ec.start();
//! ```
//!

pub mod prelude;

/// RTEC Core Types and Traits
pub use rtec_core as core;
/// RTEC Execution Contexts
pub use rtec_executors as executors;
