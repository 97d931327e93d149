//!
//! A component counting the ticks it receives.
//!
//! Every `fault_every` ticks the counter reports a failure, which sends it
//! to ERROR until someone resets it.
//!

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{info, warn};

use rtec::prelude::*;

/// Counts the ticks it was executed for
pub struct CounterComponent {
    name: &'static str,
    fault_every: Option<u64>,
    count: AtomicU64,
}

impl CounterComponent {
    /// Create a new counter that never fails
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            fault_every: None,
            count: AtomicU64::new(0),
        }
    }

    /// Create a new counter that fails every `fault_every` ticks
    pub fn faulty(name: &'static str, fault_every: u64) -> Self {
        Self {
            fault_every: Some(fault_every.max(1)),
            ..Self::new(name)
        }
    }

    /// The number of ticks counted so far
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }
}

impl ComponentProxy for CounterComponent {
    fn on_execute(&self, _cycle: u64) -> ReturnCode {
        let count = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        match self.fault_every {
            Some(every) if count % every == 0 => {
                warn!(counter = self.name, count, "simulated fault");
                ReturnCode::Error
            }
            _ => ReturnCode::Ok,
        }
    }

    fn on_activated(&self, _cycle: u64) -> ReturnCode {
        info!(counter = self.name, "activated");
        ReturnCode::Ok
    }

    fn on_deactivated(&self, cycle: u64) -> ReturnCode {
        info!(counter = self.name, cycles = cycle, "deactivated");
        ReturnCode::Ok
    }

    fn on_reset(&self, _cycle: u64) -> ReturnCode {
        info!(counter = self.name, "reset");
        ReturnCode::Ok
    }
}
