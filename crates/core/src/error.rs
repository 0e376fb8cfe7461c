use thiserror::Error;

use crate::send::SendState;

/// Errors raised by core type conversions and state-machine checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A stored state string did not name a known [`SendState`].
    #[error("unknown send state: {0}")]
    UnknownState(String),

    /// A stored kind string did not name a known send kind.
    #[error("unknown send kind: {0}")]
    UnknownKind(String),

    /// The requested state change is not an edge of the send state machine.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: SendState, to: SendState },

    /// A mutation tried to move a record back to `active`.
    #[error("send records never return to active")]
    Revival,

    /// A download was consumed from a record with none remaining.
    #[error("no downloads remaining")]
    NoDownloadsRemaining,
}
