//! Stage transition errors
//!
//! Raised by the upload state machine when a pending record is asked to
//! move out of order, and by entity methods whose guards reject a change.

use thiserror::Error;

/// Why a record could not advance
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StateError {
    #[error("Cannot go from {from} to {to} on {event}")]
    InvalidTransition {
        from: String,
        to: String,
        event: String,
    },

    #[error("Rejected by guard: {0}")]
    GuardFailed(String),

    #[error("{0} is final; no further stages run")]
    TerminalState(String),
}
