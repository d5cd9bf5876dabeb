//! Error types for the message-passing runtime.

use std::time::Duration;
use thiserror::Error;

/// Result type for communicator operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while setting up, using, or tearing down a
/// communicator.
#[derive(Error, Debug)]
pub enum Error {
    /// A peer could not be reached, or an established channel was severed.
    #[error("connection error: {0}")]
    Connection(String),

    /// A send named a rank outside the communicator, or the sender itself.
    #[error("invalid destination rank {rank} (communicator size {size})")]
    InvalidDestination { rank: usize, size: usize },

    /// A receive named a rank outside the communicator, or the receiver
    /// itself.
    #[error("invalid source rank {rank} (communicator size {size})")]
    InvalidSource { rank: usize, size: usize },

    /// A collective named a root rank outside the communicator.
    #[error("invalid root rank {rank} (communicator size {size})")]
    InvalidRoot { rank: usize, size: usize },

    /// A tag above [`crate::message::MAX_TAG`].
    #[error("invalid tag {0}")]
    InvalidTag(u32),

    /// The received payload is not of the type the call site expected.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// The received bytes could not be decoded into a payload at all.
    #[error("codec error: {0}")]
    Codec(String),

    /// A receive waited longer than the configured receive timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The communicator was already closed.
    #[error("communicator is closed")]
    Closed,

    /// A rank running under the local launcher panicked.
    #[error("rank {0} panicked")]
    RankPanicked(usize),

    /// Bad bootstrap arguments.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Connection(e.to_string())
    }
}
