//! Error types shared by both tiers.

use thiserror::Error;

/// A received event could not be turned into a typed value.
///
/// These are never fatal to a connection: the dispatcher logs them and
/// discards the offending message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown event `{0}`")]
    UnknownEvent(String),

    #[error("event `{event}` expects {expected} arguments, got {found}")]
    ArgumentCount {
        event: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("argument {index} should be {expected}")]
    ArgumentType { index: usize, expected: &'static str },

    #[error("argument {index} is not a finite number")]
    NonFinite { index: usize },

    #[error("argument {index} is out of range")]
    OutOfRange { index: usize },

    #[error("frame of {0} bytes exceeds the frame limit")]
    FrameTooLarge(usize),

    #[error("malformed frame: {0}")]
    Frame(#[from] bincode::Error),
}

/// Connecting to or talking through a transport failed.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    Closed,

    #[error("nick `{0}` is already in use")]
    NickInUse(String),

    #[error("server said goodbye: {0}")]
    Rejected(String),

    #[error("no connection with handle {0}")]
    UnknownConnection(u32),

    #[error("protocol error during handshake: {0}")]
    Protocol(#[from] ProtocolError),
}
