//!
//! The Lifecycle State Machine of a single participant.
//!
//! Administrative callers only ever *request* the next state of a
//! participant.  The worker of the execution context is the only thread
//! that *applies* a pending transition and invokes the matching callback on
//! the component, which keeps administrative calls fast and lets every
//! callback of a component run on the same thread.
//!

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use tracing::{debug, error, trace, warn};

use rtec_core::{ComponentId, ComponentProxy, LifecycleState, ReturnCode};

use crate::error::{EcError, Result};

/// The current and requested state of a participant.
///
/// When `curr == next` there is no transition pending.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct States {
    /// The state the participant is in
    pub curr: LifecycleState,
    /// The state the participant will be in after the next tick
    pub next: LifecycleState,
}

impl States {
    /// Whether a transition is waiting to be applied
    pub fn is_pending(&self) -> bool {
        self.curr != self.next
    }
}

/// A transition applied by [`LifecycleStateMachine::apply_pending`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    /// The state the participant left
    pub from: LifecycleState,
    /// The state the participant ended up in
    pub to: LifecycleState,
    /// The return code of the callback that drove the transition
    pub code: ReturnCode,
}

/// A participant of an execution context: the component proxy together
/// with its lifecycle state
pub struct LifecycleStateMachine {
    /// The id the component was attached with
    id: ComponentId,
    /// The callbacks of the component
    proxy: Arc<dyn ComponentProxy>,
    /// The current and requested state
    states: Mutex<States>,
    /// The number of ticks since the last activation
    cycles: AtomicU64,
    /// Set when the rate changed and `on_rate_changed` is still owed
    rate_changed: AtomicBool,
}

impl LifecycleStateMachine {
    /// Create the state machine of a freshly attached component.
    ///
    /// The component starts in CREATED with a pending move to INACTIVE.
    pub fn new(id: ComponentId, proxy: Arc<dyn ComponentProxy>) -> Self {
        Self {
            id,
            proxy,
            states: Mutex::new(States {
                curr: LifecycleState::Created,
                next: LifecycleState::Inactive,
            }),
            cycles: AtomicU64::new(0),
            rate_changed: AtomicBool::new(false),
        }
    }

    /// The id of the component
    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// The proxy of the component
    pub fn proxy(&self) -> &Arc<dyn ComponentProxy> {
        &self.proxy
    }

    /// The current and requested state
    pub fn states(&self) -> States {
        *self.lock()
    }

    /// The current state
    pub fn current(&self) -> LifecycleState {
        self.lock().curr
    }

    /// Whether the participant is currently in `state`
    pub fn is_current(&self, state: LifecycleState) -> bool {
        self.current() == state
    }

    /// The number of ticks since the last activation
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Acquire)
    }

    /// Request a move to `state` on the next tick.
    ///
    /// Fails if a transition is already pending or if `state` is not a legal
    /// successor of the current state.  Requests are never queued.
    pub fn request_next(&self, state: LifecycleState) -> Result<()> {
        self.request(None, state)
    }

    /// Request a move from `from` to `to`, failing unless the participant is
    /// currently in `from`
    pub fn request_from(&self, from: LifecycleState, to: LifecycleState) -> Result<()> {
        self.request(Some(from), to)
    }

    /// Request a move to ERROR if the participant is ACTIVE, overriding any
    /// pending deactivation.  Returns whether ERROR is now pending.
    pub fn request_error(&self) -> bool {
        let mut states = self.lock();
        if states.curr == LifecycleState::Active {
            states.next = LifecycleState::Error;
            true
        } else {
            false
        }
    }

    /// Record that the rate of the execution context changed.  The worker
    /// delivers `on_rate_changed` during the post-do phase of its next tick.
    pub fn notify_rate_changed(&self) {
        self.rate_changed.store(true, Ordering::Release);
    }

    /// Whether `on_rate_changed` is still owed
    pub fn rate_change_pending(&self) -> bool {
        self.rate_changed.load(Ordering::Acquire)
    }

    /// Deliver an owed `on_rate_changed`.  A failure sends an ACTIVE
    /// participant to ERROR.
    pub fn deliver_rate_change(&self) -> Option<ReturnCode> {
        if !self.rate_changed.swap(false, Ordering::AcqRel) {
            return None;
        }
        let code = self.invoke("on_rate_changed", |proxy, cycle| proxy.on_rate_changed(cycle));
        if !code.is_ok() {
            self.request_error();
        }
        Some(code)
    }

    /// Invoke the do-action of the current state.
    ///
    /// ACTIVE participants run their periodic action, participants in ERROR
    /// run `on_error`.  A failing periodic action requests ERROR.
    pub fn do_action(&self) -> Option<ReturnCode> {
        let states = self.states();
        match states.curr {
            LifecycleState::Active if states.next != LifecycleState::Error => {
                let code = self.invoke("on_execute", |proxy, cycle| proxy.on_execute(cycle));
                self.cycles.fetch_add(1, Ordering::AcqRel);
                if !code.is_ok() {
                    self.request_error();
                }
                Some(code)
            }
            LifecycleState::Error => Some(self.invoke("on_error", |proxy, cycle| proxy.on_error(cycle))),
            _ => None,
        }
    }

    /// Invoke the post-do action of the current state.
    ///
    /// Only ACTIVE participants without a pending transition have one,
    /// `on_state_update`.
    pub fn post_action(&self) -> Option<ReturnCode> {
        let states = self.states();
        if states.curr != LifecycleState::Active || states.is_pending() {
            return None;
        }
        let code = self.invoke("on_state_update", |proxy, cycle| proxy.on_state_update(cycle));
        if !code.is_ok() {
            self.request_error();
        }
        Some(code)
    }

    /// Apply the pending transition, if any, and invoke its callback.
    ///
    /// On success the participant moves to the requested state.  When the
    /// callback fails the participant ends up in ERROR instead (entering
    /// ERROR always runs `on_aborting`).
    ///
    /// Note: only the worker of the execution context may call this.
    pub fn apply_pending(&self) -> Option<Transition> {
        let States { curr, next } = self.states();
        if curr == next {
            return None;
        }

        use LifecycleState::*;
        let code = match (curr, next) {
            (Inactive, Active) => {
                self.cycles.store(0, Ordering::Release);
                self.invoke("on_activated", |proxy, cycle| proxy.on_activated(cycle))
            }
            (Active, Inactive) => {
                self.invoke("on_deactivated", |proxy, cycle| proxy.on_deactivated(cycle))
            }
            (Error, Inactive) => self.invoke("on_reset", |proxy, cycle| proxy.on_reset(cycle)),
            _ => ReturnCode::Ok,
        };

        let to = if code.is_ok() { next } else { Error };
        if to == Error && curr != Error {
            self.invoke("on_aborting", |proxy, cycle| proxy.on_aborting(cycle));
        }

        {
            let mut states = self.lock();
            states.curr = to;
            // ERROR requested while the callback ran stays pending
            if states.next == next || to == Error {
                states.next = to;
            }
        }

        if to == Error {
            warn!(component = %self.id, from = %curr, requested = %next, "participant entered ERROR");
        } else {
            debug!(component = %self.id, from = %curr, to = %to, "transition applied");
        }
        Some(Transition { from: curr, to, code })
    }

    /// Force the participant into the terminal EXITING state without
    /// invoking any callback
    pub fn exit(&self) {
        let mut states = self.lock();
        states.curr = LifecycleState::Exiting;
        states.next = LifecycleState::Exiting;
    }

    /// Invoke a callback on the component, turning a panic into
    /// [`ReturnCode::Error`] so one participant can never take the worker
    /// down with it
    pub(crate) fn invoke(
        &self,
        callback: &'static str,
        f: impl FnOnce(&dyn ComponentProxy, u64) -> ReturnCode,
    ) -> ReturnCode {
        let cycle = self.cycles();
        match panic::catch_unwind(AssertUnwindSafe(|| f(self.proxy.as_ref(), cycle))) {
            Ok(code) => {
                if !code.is_ok() {
                    warn!(component = %self.id, callback, %code, "callback failed");
                }
                code
            }
            Err(_) => {
                error!(component = %self.id, callback, "callback panicked");
                ReturnCode::Error
            }
        }
    }

    fn request(&self, expected: Option<LifecycleState>, state: LifecycleState) -> Result<()> {
        let mut states = self.lock();
        if states.is_pending() {
            return Err(EcError::TransitionPending {
                current: states.curr,
                pending: states.next,
            });
        }
        let expected = expected.unwrap_or(states.curr);
        if states.curr != expected || !states.curr.can_transition_to(state) {
            return Err(EcError::IllegalTransition {
                current: states.curr,
                requested: state,
            });
        }
        states.next = state;
        trace!(component = %self.id, from = %states.curr, to = %state, "transition requested");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, States> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
