//!
//! The Periodic Strategy is the cooperative, thread-based timing model.
//!
//! After each tick the worker sleeps for whatever is left of the period,
//! measured on a monotonic clock.  The sleep happens on a gate so stopping
//! the execution context does not have to wait for the sleep to finish.
//!

use std::time::Duration;

use rtec_core::ExecutionKind;

use crate::{
    error::Result,
    gate::{Gate, Signal, Wake},
    strategy::{Cycle, Deadline, PeriodCell, WaitStrategy},
};

/// Cooperative periodic timing on a plain thread
pub struct PeriodicStrategy {
    /// Closed to interrupt the worker's sleep
    gate: Gate<Signal>,
    /// The period in force
    period: PeriodCell,
}

impl PeriodicStrategy {
    /// The name this strategy is registered under
    pub const NAME: &'static str = "periodic";

    /// Create a new periodic strategy with a given period
    pub fn new(period: Duration) -> Self {
        Self {
            gate: Gate::signal(),
            period: PeriodCell::new(period),
        }
    }
}

impl WaitStrategy for PeriodicStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn kind(&self) -> ExecutionKind {
        ExecutionKind::Periodic
    }

    fn prepare(&self, period: Duration) -> Result<()> {
        self.gate.reopen();
        self.period.set(period);
        Ok(())
    }

    fn await_next_cycle(&self, deadline: Deadline<'_>) -> Cycle {
        loop {
            let remaining = deadline.remaining();
            if remaining.is_zero() {
                return if self.gate.is_closed() {
                    Cycle::Interrupted
                } else {
                    Cycle::Tick
                };
            }
            match self.gate.park_timeout(remaining) {
                Wake::Closed => return Cycle::Interrupted,
                Wake::TimedOut => return Cycle::Tick,
                Wake::Signaled => continue,
            }
        }
    }

    fn teardown(&self) -> Result<()> {
        Ok(())
    }

    fn interrupt(&self) {
        self.gate.close();
    }

    fn period(&self) -> Duration {
        self.period.get()
    }

    fn reconfigure(&self, period: Duration) -> Result<()> {
        self.period.set(period);
        Ok(())
    }
}
