//!
//! The External Trigger Strategy has no timing source of its own.
//!
//! Something outside the execution context (a hardware interrupt handler,
//! a simulator, another component) calls [`WaitStrategy::trigger`] and the
//! worker executes exactly one tick per wake-up.
//!
//! The trigger flag is cleared when the worker wakes, before the tick runs.
//! A trigger arriving while a tick is executing is therefore kept and
//! causes one more tick right after the current one, while any further
//! triggers in that window are folded into it and counted as coalesced.
//!

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use tracing::trace;

use rtec_core::ExecutionKind;

use crate::{
    error::Result,
    gate::Gate,
    strategy::{Cycle, Deadline, PeriodCell, WaitStrategy},
};

/// The flags shared between the trigger and the worker
#[derive(Debug, Default)]
struct TriggerState {
    ticked: bool,
    interrupted: bool,
}

/// Interrupt-driven timing
pub struct ExtTriggerStrategy {
    /// The trigger flags
    gate: Gate<TriggerState>,
    /// The nominal period, only reported
    period: PeriodCell,
    /// The number of triggers folded into a pending one
    coalesced: AtomicU64,
}

impl ExtTriggerStrategy {
    /// The name this strategy is registered under
    pub const NAME: &'static str = "ext_trigger";

    /// Create a new externally triggered strategy with a nominal period
    pub fn new(period: Duration) -> Self {
        Self {
            gate: Gate::new(TriggerState::default()),
            period: PeriodCell::new(period),
            coalesced: AtomicU64::new(0),
        }
    }
}

impl WaitStrategy for ExtTriggerStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn kind(&self) -> ExecutionKind {
        ExecutionKind::EventDriven
    }

    fn prepare(&self, period: Duration) -> Result<()> {
        *self.gate.lock() = TriggerState::default();
        self.period.set(period);
        Ok(())
    }

    fn await_next_cycle(&self, _deadline: Deadline<'_>) -> Cycle {
        self.gate.wait_for(|state| {
            if state.interrupted {
                Some(Cycle::Interrupted)
            } else if state.ticked {
                state.ticked = false;
                Some(Cycle::Tick)
            } else {
                None
            }
        })
    }

    fn teardown(&self) -> Result<()> {
        Ok(())
    }

    fn interrupt(&self) {
        self.gate.wake_with(|state| state.interrupted = true);
    }

    fn period(&self) -> Duration {
        self.period.get()
    }

    fn reconfigure(&self, period: Duration) -> Result<()> {
        self.period.set(period);
        Ok(())
    }

    fn trigger(&self) -> Result<()> {
        let coalesced = self.gate.wake_with(|state| std::mem::replace(&mut state.ticked, true));
        if coalesced {
            let total = self.coalesced.fetch_add(1, Ordering::AcqRel) + 1;
            trace!(coalesced = total, "trigger folded into a pending one");
        }
        Ok(())
    }

    fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Acquire)
    }
}
