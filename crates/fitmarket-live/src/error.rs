//! Live subscription error types.

use thiserror::Error;

/// Live subscription errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The subscription request is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The change feed could not establish or keep a channel.
    #[error("connection error on channel {channel_id}: {reason}")]
    Connection { channel_id: String, reason: String },

    /// A handler panicked while processing an event.
    #[error("handler fault on channel {channel_id}: {message}")]
    HandlerFault { channel_id: String, message: String },

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] fitmarket_proto::Error),
}
