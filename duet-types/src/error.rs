//! Error types for duet identifiers.

use thiserror::Error;

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// Host id is not a UUID.
    #[error("invalid host id: {0}")]
    InvalidHostId(String),

    /// Connection id is empty or too long.
    #[error("invalid connection id (length {0})")]
    InvalidConnectionId(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = IdError::InvalidHostId("nope".into());
        assert_eq!(err.to_string(), "invalid host id: nope");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<IdError>();
    }
}
