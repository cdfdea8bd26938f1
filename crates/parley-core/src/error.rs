//! Error types for the session engine.
//!
//! Transport and parse failures never cross the session boundary: they are
//! reported through [`crate::ConnectionState`] and logs. What callers do see
//! is listed in [`SessionError`].

use parley_protocol::{ProtocolError, RoomId};
use parley_transport::TransportError;
use thiserror::Error;

/// An outgoing message was rejected before touching the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Nothing left after trimming whitespace.
    #[error("Message is empty")]
    Empty,

    /// Longer than the configured limit.
    #[error("Message is {length} characters long, the limit is {limit}")]
    TooLong {
        /// Length in code points.
        length: usize,
        /// Allowed maximum.
        limit: usize,
    },
}

/// Connection manager errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// A send was attempted while the link is not live.
    #[error("Not connected")]
    NotConnected,

    /// The live link refused the publish.
    #[error("Send failed: {0}")]
    SendFailed(#[source] TransportError),
}

/// Room and history lookup errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    /// The room does not exist.
    #[error("Room not found: {0}")]
    NotFound(String),

    /// The lookup service could not be reached or failed.
    #[error("Directory unavailable: {0}")]
    Unavailable(String),

    /// The lookup service answered with something unreadable.
    #[error("Invalid directory response: {0}")]
    InvalidResponse(String),
}

/// A passive notification could not be raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    /// The platform refused (permission revoked mid-session, for example).
    #[error("Notification permission denied")]
    PermissionDenied,

    /// The notification or sound backend failed.
    #[error("Notification backend failed: {0}")]
    Backend(String),
}

/// Errors surfaced by [`crate::SessionController`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// Send attempted while the connection is not live.
    #[error("Not connected")]
    NotConnected,

    /// Outgoing message rejected locally.
    #[error("Invalid message: {0}")]
    Validation(#[from] ValidationError),

    /// The requested room does not exist.
    #[error("Room not found: {0}")]
    NotFound(RoomId),

    /// Room lookup failed for another reason.
    #[error("Room lookup failed: {0}")]
    Directory(DirectoryError),

    /// The link accepted the send attempt but failed to publish.
    #[error("Send failed: {0}")]
    SendFailed(#[source] TransportError),

    /// Outgoing envelope could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl From<ConnectionError> for SessionError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::NotConnected => SessionError::NotConnected,
            ConnectionError::SendFailed(e) => SessionError::SendFailed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_errors_map_to_session_errors() {
        assert!(matches!(
            SessionError::from(ConnectionError::NotConnected),
            SessionError::NotConnected
        ));
        assert!(matches!(
            SessionError::from(ConnectionError::SendFailed(TransportError::ConnectionClosed)),
            SessionError::SendFailed(_)
        ));
    }

    #[test]
    fn test_validation_messages() {
        let err = ValidationError::TooLong {
            length: 2001,
            limit: 2000,
        };
        assert_eq!(
            err.to_string(),
            "Message is 2001 characters long, the limit is 2000"
        );
    }
}
