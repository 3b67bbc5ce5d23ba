//! Session error types.

use thiserror::Error;

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The session was ended and no longer accepts changes.
    #[error("session {0} has ended")]
    SessionEnded(String),

    /// A role name was not recognized.
    #[error("unknown role: {0} (expected client, trainer or admin)")]
    UnknownRole(String),
}
