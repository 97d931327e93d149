//!
//! Return codes shared by every administrative operation and every
//! component callback.
//!

use std::fmt;

/// The result of an administrative operation or a component callback.
///
/// Return codes are deliberately flat so they can cross whatever transport
/// exposes an execution context without carrying any Rust-specific error
/// information.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReturnCode {
    /// The operation succeeded
    Ok,
    /// A generic internal failure (including kernel timing registration
    /// failures)
    Error,
    /// An invalid, duplicate or missing argument was given
    BadParameter,
    /// The operation is not legal in the current state
    PreconditionNotMet,
}

impl ReturnCode {
    /// Whether this return code signals success
    pub fn is_ok(&self) -> bool {
        *self == ReturnCode::Ok
    }

    /// The canonical upper-case name of this code
    pub fn as_str(&self) -> &'static str {
        match self {
            ReturnCode::Ok => "RTC_OK",
            ReturnCode::Error => "RTC_ERROR",
            ReturnCode::BadParameter => "BAD_PARAMETER",
            ReturnCode::PreconditionNotMet => "PRECONDITION_NOT_MET",
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
