//!
//! A Schedulable Component.
//!
//! In rtec, components are the units of work an execution context drives.
//! An execution context never sees a concrete component type.  It only
//! holds a [`ComponentProxy`] (the set of callbacks it may invoke) and
//! refers to the component through an opaque [`ComponentId`].
//!

use std::fmt;

use crate::ReturnCode;

/// An opaque handle identifying a component.
///
/// Ids are handed out by a component arena and are made of a slot index and
/// the generation of that slot, so an id of a component that was removed
/// never refers to a later component occupying the same slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId {
    index: u32,
    generation: u32,
}

impl ComponentId {
    /// The nil component id.  It never resolves to a component.
    pub const NIL: ComponentId = ComponentId {
        index: u32::MAX,
        generation: 0,
    };

    /// Create a component id from its raw parts
    pub const fn from_parts(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// The arena slot of this id
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The generation of the arena slot this id was issued for
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Whether this is the nil id
    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            f.write_str("nil")
        } else {
            write!(f, "{}v{}", self.index, self.generation)
        }
    }
}

/// The capability set an execution context needs from a participant.
///
/// Every callback receives the number of cycles the participant has been
/// ticked since its last activation and reports its outcome as a
/// [`ReturnCode`].  Any code other than [`ReturnCode::Ok`] from a lifecycle
/// or periodic callback sends the participant to the ERROR state.
///
/// Only `on_execute` must be implemented; every other callback defaults to
/// doing nothing successfully.
///
/// Note: callbacks are invoked from the worker of the execution context
/// while administrative callers may hold their own reference to the same
/// component, so proxies take `&self` and are expected to use interior
/// mutability for their state.
pub trait ComponentProxy: Send + Sync {
    /// Called once per tick while the participant is ACTIVE.
    ///
    /// This is the periodic action of the component and should contain the
    /// work the component completes every cycle.
    fn on_execute(&self, cycle: u64) -> ReturnCode;

    /// Called when the participant enters the ACTIVE state
    fn on_activated(&self, _cycle: u64) -> ReturnCode {
        ReturnCode::Ok
    }

    /// Called when the participant leaves the ACTIVE state for INACTIVE
    fn on_deactivated(&self, _cycle: u64) -> ReturnCode {
        ReturnCode::Ok
    }

    /// Called when the participant enters the ERROR state
    fn on_aborting(&self, _cycle: u64) -> ReturnCode {
        ReturnCode::Ok
    }

    /// Called once per tick while the participant is in the ERROR state
    fn on_error(&self, _cycle: u64) -> ReturnCode {
        ReturnCode::Ok
    }

    /// Called when the participant is reset out of the ERROR state.
    ///
    /// A failing reset leaves the participant in ERROR.
    fn on_reset(&self, _cycle: u64) -> ReturnCode {
        ReturnCode::Ok
    }

    /// Called after `on_execute` of every participant, once per tick, while
    /// the participant is ACTIVE
    fn on_state_update(&self, _cycle: u64) -> ReturnCode {
        ReturnCode::Ok
    }

    /// Called on the tick following a change of the rate of the execution
    /// context.  A failure sends an ACTIVE participant to ERROR.
    fn on_rate_changed(&self, _cycle: u64) -> ReturnCode {
        ReturnCode::Ok
    }

    /// Called when the execution context starts
    fn on_startup(&self, _cycle: u64) -> ReturnCode {
        ReturnCode::Ok
    }

    /// Called when the execution context stops.
    ///
    /// Stopping is not deactivation: ACTIVE participants stay ACTIVE and do
    /// not receive `on_deactivated`.
    fn on_shutdown(&self, _cycle: u64) -> ReturnCode {
        ReturnCode::Ok
    }
}
