//!
//! Structured errors for execution contexts.
//!
//! Every administrative operation has a typed form returning
//! `Result<_, EcError>` and a service form returning a flat [`ReturnCode`].
//! [`EcError::code`] is the only place where the two meet.
//!

use thiserror::Error;

use rtec_core::{ComponentId, LifecycleState, ReturnCode};

/// An error from an execution context or one of its collaborators
#[derive(Debug, Error)]
pub enum EcError {
    /// An invalid, duplicate or missing argument was given
    #[error("bad parameter: {0}")]
    BadParameter(String),

    /// The given id does not resolve to a component
    #[error("component {0} does not exist")]
    NoSuchComponent(ComponentId),

    /// The component exists but is not a participant of this context
    #[error("component {0} is not a participant of this execution context")]
    NotParticipant(ComponentId),

    /// The component is already a participant of this context
    #[error("component {0} is already a participant of this execution context")]
    AlreadyParticipant(ComponentId),

    /// The requested lifecycle transition is not legal from the current state
    #[error("cannot move from {current} to {requested}")]
    IllegalTransition {
        /// The state the participant is in
        current: LifecycleState,
        /// The state that was requested
        requested: LifecycleState,
    },

    /// A transition was requested while another one is still pending
    #[error("a transition from {current} to {pending} is still pending")]
    TransitionPending {
        /// The state the participant is in
        current: LifecycleState,
        /// The state the participant is about to move to
        pending: LifecycleState,
    },

    /// The operation is not supported by this execution context
    #[error("{0} is not supported by this execution context")]
    Unsupported(&'static str),

    /// A component callback returned something other than OK
    #[error("{callback} of component {component} returned {code}")]
    CallbackFailed {
        /// The component whose callback failed
        component: ComponentId,
        /// The name of the callback
        callback: &'static str,
        /// The code the callback returned
        code: ReturnCode,
    },

    /// Registering, re-registering or deregistering a timing resource failed
    #[error("timing registration failed: {0}")]
    Timing(String),

    /// No factory is registered under the given name
    #[error("unknown execution context type '{0}'")]
    UnknownContextType(String),

    /// The worker thread could not be opened
    #[error("worker thread failure: {0}")]
    Thread(String),

    /// The configuration could not be decoded
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// The configuration could not be read
    #[error("could not read configuration: {0}")]
    Io(#[from] std::io::Error),
}

impl EcError {
    /// The return code reported for this error across the administrative
    /// boundary
    pub fn code(&self) -> ReturnCode {
        match self {
            EcError::BadParameter(_)
            | EcError::NoSuchComponent(_)
            | EcError::NotParticipant(_)
            | EcError::AlreadyParticipant(_)
            | EcError::UnknownContextType(_)
            | EcError::Config(_) => ReturnCode::BadParameter,
            EcError::IllegalTransition { .. }
            | EcError::TransitionPending { .. }
            | EcError::Unsupported(_) => ReturnCode::PreconditionNotMet,
            EcError::CallbackFailed { code, .. } => *code,
            EcError::Timing(_) | EcError::Thread(_) | EcError::Io(_) => ReturnCode::Error,
        }
    }
}

impl From<EcError> for ReturnCode {
    fn from(value: EcError) -> Self {
        value.code()
    }
}

/// A convenience alias for results of execution context operations
pub type Result<T> = std::result::Result<T, EcError>;
