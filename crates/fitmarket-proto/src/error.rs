//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A predicate string could not be parsed.
    #[error("invalid predicate '{input}': {reason}")]
    InvalidPredicate { input: String, reason: String },

    /// An event kind name was not recognized.
    #[error("unknown event kind: {0}")]
    UnknownEventKind(String),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn predicate(input: &str, reason: impl Into<String>) -> Self {
        Error::InvalidPredicate {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}
