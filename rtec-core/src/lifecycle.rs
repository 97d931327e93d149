//!
//! The Lifecycle of a Participant.
//!
//! Every component attached to an execution context moves through a small
//! finite set of states.  The execution context only ever changes the state
//! of a component on its worker, while administrative callers request the
//! next state.
//!
//! ```text
//!   CREATED ──► INACTIVE ◄──► ACTIVE ──► ERROR
//!                  ▲                       │
//!                  └──────── reset ────────┘
//!
//!   (any state) ──► EXITING
//! ```
//!

use std::fmt;

/// The lifecycle state of a participant
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// The participant was attached but its first transition has not been
    /// processed yet
    Created,
    /// The participant is attached and idle
    Inactive,
    /// The participant's periodic action is invoked every tick
    Active,
    /// A callback of the participant failed and it waits to be reset
    Error,
    /// The execution context is being torn down.  This state is terminal.
    Exiting,
    /// Reported for components that are not participants of the queried
    /// execution context.  No state machine ever holds this state.
    Unknown,
}

impl LifecycleState {
    /// Whether a participant in this state may be requested to move to `next`
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        match (*self, next) {
            (Exiting, _) | (Unknown, _) | (_, Unknown) | (_, Created) => false,
            (_, Exiting) => true,
            (Created, Inactive) => true,
            (Inactive, Active) | (Active, Inactive) => true,
            (Active, Error) => true,
            (Error, Inactive) => true,
            _ => false,
        }
    }

    /// The canonical upper-case name of this state
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Created => "CREATED",
            LifecycleState::Inactive => "INACTIVE",
            LifecycleState::Active => "ACTIVE",
            LifecycleState::Error => "ERROR",
            LifecycleState::Exiting => "EXITING",
            LifecycleState::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleState::*;

    #[test]
    fn test_legal_transitions() {
        assert!(Created.can_transition_to(Inactive));
        assert!(Inactive.can_transition_to(Active));
        assert!(Active.can_transition_to(Inactive));
        assert!(Active.can_transition_to(Error));
        assert!(Error.can_transition_to(Inactive));
        for state in [Created, Inactive, Active, Error] {
            assert!(state.can_transition_to(Exiting));
        }
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!Created.can_transition_to(Active));
        assert!(!Inactive.can_transition_to(Error));
        assert!(!Error.can_transition_to(Active));
        assert!(!Inactive.can_transition_to(Inactive));
        assert!(!Active.can_transition_to(Created));
        assert!(!Exiting.can_transition_to(Inactive));
        assert!(!Exiting.can_transition_to(Exiting));
        assert!(!Inactive.can_transition_to(Unknown));
    }
}
