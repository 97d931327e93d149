//!
//! Wait Strategies decide when the next tick of an execution context
//! happens.
//!
//! The worker loop of an execution context is written once and only ever
//! talks to a [`WaitStrategy`].  The strategies differ in what drives the
//! wake-up: a cooperative sleep until a deadline, the kernel's
//! wait-for-next-period primitive, or an external trigger.
//!

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use quanta::{Clock, Instant};

use rtec_core::ExecutionKind;

use crate::error::{EcError, Result};

pub mod periodic;
pub use periodic::PeriodicStrategy;

pub mod ext_trigger;
pub use ext_trigger::ExtTriggerStrategy;

#[cfg(target_os = "linux")]
pub mod rt_preempt;
#[cfg(target_os = "linux")]
pub use rt_preempt::RtPreemptStrategy;

/// What ended a wait for the next cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cycle {
    /// The next tick is due
    Tick,
    /// The worker was asked to stop
    Interrupted,
}

/// The point in time the next periodic tick is due
#[derive(Clone, Copy)]
pub struct Deadline<'a> {
    clock: &'a Clock,
    at: Instant,
}

impl<'a> Deadline<'a> {
    /// A deadline measured on `clock`
    pub fn new(clock: &'a Clock, at: Instant) -> Self {
        Self { clock, at }
    }

    /// The instant the next tick is due
    pub fn instant(&self) -> Instant {
        self.at
    }

    /// How long until the deadline, zero if it has already passed
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(self.clock.now())
    }
}

/// The pluggable mechanism an execution context blocks on between ticks.
///
/// `prepare`, `await_next_cycle` and `teardown` are only ever called from
/// the worker thread, in that order.  The remaining methods may be called
/// from any administrative caller.
pub trait WaitStrategy: Send + Sync {
    /// The name the strategy is registered under
    fn name(&self) -> &'static str;

    /// The timing model this strategy implements
    fn kind(&self) -> ExecutionKind;

    /// Acquire whatever timing resource the strategy needs before the first
    /// tick.  A failure aborts the start of the execution context.
    fn prepare(&self, period: Duration) -> Result<()>;

    /// Block until the next tick is due or the worker is interrupted
    fn await_next_cycle(&self, deadline: Deadline<'_>) -> Cycle;

    /// Release the timing resource acquired by `prepare`
    fn teardown(&self) -> Result<()>;

    /// Make a worker blocked in (or about to enter) `await_next_cycle`
    /// return [`Cycle::Interrupted`] until the next `prepare`
    fn interrupt(&self);

    /// The period currently in force
    fn period(&self) -> Duration;

    /// Put a new period in force.
    ///
    /// Strategies holding a registration with an external scheduler
    /// re-register with the new period; on failure the previous period
    /// stays in force.
    fn reconfigure(&self, period: Duration) -> Result<()>;

    /// Trigger a tick from outside the worker.
    ///
    /// Only externally triggered strategies support this.  Implementations
    /// must not block beyond setting a flag and signalling.
    fn trigger(&self) -> Result<()> {
        Err(EcError::Unsupported("external triggering"))
    }

    /// Called on the worker thread when it starts ticking again after it
    /// was parked
    fn resume(&self) {}

    /// The number of triggers folded into an already pending one
    fn coalesced(&self) -> u64 {
        0
    }

    /// The number of periodic releases that had already passed when the
    /// worker was ready to wait for them
    fn missed_releases(&self) -> u64 {
        0
    }
}

/// A period that can be swapped while the worker reads it
#[derive(Debug)]
pub(crate) struct PeriodCell {
    nanos: AtomicU64,
}

impl PeriodCell {
    pub fn new(period: Duration) -> Self {
        Self {
            nanos: AtomicU64::new(Self::to_nanos(period)),
        }
    }

    pub fn get(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Acquire))
    }

    pub fn set(&self, period: Duration) {
        self.nanos.store(Self::to_nanos(period), Ordering::Release);
    }

    fn to_nanos(period: Duration) -> u64 {
        u64::try_from(period.as_nanos()).unwrap_or(u64::MAX)
    }
}
