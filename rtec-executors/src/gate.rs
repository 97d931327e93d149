//!
//! The Gate is the one place a worker blocks on another thread.
//!
//! Every wait strategy and the execution context itself need the same
//! mutex + condition variable dance: one side changes some shared state
//! and signals, the other side sleeps until the state satisfies a
//! predicate.  The gate implements that once.
//!

use std::{
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

/// Shared state guarded by a mutex and paired with a condition variable
#[derive(Debug, Default)]
pub struct Gate<S> {
    state: Mutex<S>,
    cond: Condvar,
}

impl<S> Gate<S> {
    /// Create a new gate around some initial state
    pub fn new(state: S) -> Self {
        Self {
            state: Mutex::new(state),
            cond: Condvar::new(),
        }
    }

    /// Lock the state without notifying anyone.
    ///
    /// A panic on another thread while it held the lock does not poison the
    /// gate, the state is simply handed back as it was left.
    pub fn lock(&self) -> MutexGuard<'_, S> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutate the state and wake every waiter so they can re-check their
    /// predicate
    pub fn wake_with<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let ret = f(&mut self.lock());
        self.cond.notify_all();
        ret
    }

    /// Block until `ready` returns `Some`.
    ///
    /// `ready` is always evaluated under the lock so it may also consume
    /// the state it is waiting for.
    pub fn wait_for<R>(&self, mut ready: impl FnMut(&mut S) -> Option<R>) -> R {
        let mut state = self.lock();
        loop {
            if let Some(ret) = ready(&mut state) {
                return ret;
            }
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until `ready` returns `Some` or `timeout` has passed, whichever
    /// comes first.  Returns `None` on timeout.
    pub fn wait_for_timeout<R>(
        &self,
        timeout: Duration,
        mut ready: impl FnMut(&mut S) -> Option<R>,
    ) -> Option<R> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.lock();
        loop {
            if let Some(ret) = ready(&mut state) {
                return Some(ret);
            }
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => Duration::MAX,
            };
            if remaining.is_zero() {
                return None;
            }
            state = self
                .cond
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// The state of a plain park / wake gate
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Signal {
    raised: bool,
    closed: bool,
}

/// Why a parked thread returned
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wake {
    /// Someone called [`Gate::wake`]
    Signaled,
    /// The gate was closed
    Closed,
    /// The timeout passed without a signal
    TimedOut,
}

impl Gate<Signal> {
    /// Create an open gate with no pending signal
    pub fn signal() -> Self {
        Self::new(Signal::default())
    }

    /// Block until the gate is woken or closed.
    ///
    /// A wake that happened before parking is not lost, it is consumed by
    /// the next park.
    pub fn park(&self) -> Wake {
        self.wait_for(Self::consume)
    }

    /// Block until the gate is woken, closed or `timeout` has passed
    pub fn park_timeout(&self, timeout: Duration) -> Wake {
        self.wait_for_timeout(timeout, Self::consume)
            .unwrap_or(Wake::TimedOut)
    }

    /// Wake the parked thread (or the next one to park)
    pub fn wake(&self) {
        self.wake_with(|signal| signal.raised = true);
    }

    /// Close the gate.  Every park returns [`Wake::Closed`] until the gate
    /// is reopened.
    pub fn close(&self) {
        self.wake_with(|signal| signal.closed = true);
    }

    /// Reopen a closed gate and drop any pending signal
    pub fn reopen(&self) {
        *self.lock() = Signal::default();
    }

    /// Whether the gate is currently closed
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn consume(signal: &mut Signal) -> Option<Wake> {
        if signal.closed {
            Some(Wake::Closed)
        } else if signal.raised {
            signal.raised = false;
            Some(Wake::Signaled)
        } else {
            None
        }
    }
}
