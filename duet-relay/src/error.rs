//! Error types for duet-relay.
//!
//! Errors are typed by kind so the HTTP boundary can map them to status codes
//! without looking at messages. Messages carry key fingerprints, never keys.

use duet_types::{ConnectionId, HostId, KeyFingerprint};
use std::sync::Arc;

/// Main error type for duet-relay startup and serving.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Rendezvous store errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// Unknown, closed, or expired mailbox.
    #[error("no such host: {0}")]
    NoSuchHost(HostId),

    /// Key is neither the owner key nor the super-key.
    #[error("wrong key: {0}")]
    WrongKey(KeyFingerprint),
}

impl HostError {
    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            HostError::NoSuchHost(_) => "no such host",
            HostError::WrongKey(_) => "wrong key",
        }
    }
}

/// Relay pairing engine errors.
///
/// `Clone` so one transfer outcome can be reported to both the sender and
/// the receiver.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RelayError {
    /// Unknown or expired connection.
    #[error("no such socket: {0}")]
    NoSuchSocket(ConnectionId),

    /// Key has not joined this connection.
    #[error("wrong key: {0}")]
    WrongKey(KeyFingerprint),

    /// Both sides are already taken by other keys.
    #[error("already established")]
    AlreadyEstablished,

    /// This side already closed.
    #[error("already closed")]
    AlreadyClosed,

    /// The connection expired while the operation was pending or in flight.
    #[error("timeout")]
    Timeout,

    /// The byte source or sink failed mid-transfer.
    #[error("transport error: {0}")]
    Transport(Arc<std::io::Error>),

    /// The task driving the matched transfer went away before it settled.
    #[error("transfer abandoned by counterpart")]
    Abandoned,
}

impl RelayError {
    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::NoSuchSocket(_) => "no such socket",
            RelayError::WrongKey(_) => "wrong key",
            RelayError::AlreadyEstablished => "already established",
            RelayError::AlreadyClosed => "already closed",
            RelayError::Timeout => "timeout",
            RelayError::Transport(_) => "transport",
            RelayError::Abandoned => "abandoned",
        }
    }
}

impl From<std::io::Error> for RelayError {
    fn from(e: std::io::Error) -> Self {
        RelayError::Transport(Arc::new(e))
    }
}

impl From<duet_core::PairError> for RelayError {
    fn from(e: duet_core::PairError) -> Self {
        match e {
            duet_core::PairError::AlreadyEstablished => RelayError::AlreadyEstablished,
            duet_core::PairError::AlreadyClosed => RelayError::AlreadyClosed,
        }
    }
}

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Result type alias for rendezvous store operations.
pub type HostResult<T> = std::result::Result<T, HostError>;

/// Result type alias for relay operations.
pub type RelayResult<T> = std::result::Result<T, RelayError>;
