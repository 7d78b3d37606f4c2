// Protocol errors
//
// Each variant is a distinct signal the manager's recovery policy branches on.

use crate::link::LinkError;
use thiserror::Error;

/// Outcomes of a bridge exchange other than success
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The bridge answered NAK
    #[error("Bridge rejected command: {0}")]
    Rejected(String),

    /// The parameter echo did not match what was sent
    #[error("Sent parameter {expected:?}, bridge echoed {received:?}")]
    EchoMismatch { expected: String, received: String },

    /// The bridge rebooted; all bridge-side session state is gone
    #[error("Bridge restarted")]
    Restarted,

    /// Nothing usable arrived within the retry budget
    #[error("No valid response after {0} retries")]
    TooManyRetries(u32),

    /// A time query was answered by an unrelated line, carried here unread
    #[error("Data waiting: {0}")]
    DataWaiting(String),

    /// The cancel token was raised while waiting
    #[error("Cancelled")]
    Cancelled,

    #[error("Link error: {0}")]
    Link(#[from] LinkError),
}

impl ProtocolError {
    /// Check if the bridge needs its configuration replayed
    pub fn is_restart(&self) -> bool {
        matches!(self, Self::Restarted)
    }

    /// Check if this failure is local to one command and the session is still good
    pub fn is_command_local(&self) -> bool {
        matches!(self, Self::Rejected(_) | Self::EchoMismatch { .. })
    }

    /// Check if the connection should be closed and reopened
    pub fn needs_reopen(&self) -> bool {
        match self {
            Self::Link(e) => e.needs_reopen(),
            _ => false,
        }
    }
}
