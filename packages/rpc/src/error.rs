//! Error types for the RPC session engine.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::CodecError;

/// Shared result type.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Errors surfaced by [`crate::Session`] operations.
///
/// None of these are fatal to the session: it stays usable and the caller
/// decides whether to reconnect.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Socket connect/read/write failure
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Unexpected opcode, event or reply shape
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Frame could not be decoded
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Authorization or authentication rejected
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Operation attempted before `connect()` succeeded
    #[error("not connected")]
    NotConnected,

    /// No reply within the configured bound
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The peer answered with an `ERROR` event
    #[error("command rejected ({code}): {message}")]
    Command { code: i64, message: String },
}
