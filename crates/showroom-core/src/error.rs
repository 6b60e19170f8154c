//! Error types for the connection layer.
//!
//! Strongly-typed errors for handshake, timeout and transport failures. The
//! connection manager never returns these across its public contract; they
//! describe why a transition happened and are logged by the caller.

use std::time::Duration;

use thiserror::Error;

use crate::connection::{ConnectionState, TransportId};

/// Reasons the connection layer leaves or refuses a state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Operation not valid in the current state
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidState {
        /// Current state when error occurred
        state: ConnectionState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Event tagged with a transport that is no longer the live one
    #[error("stale transport {got:?} (live: {live:?})")]
    StaleTransport {
        /// Transport the event was tagged with
        got: TransportId,
        /// Currently live transport, if any
        live: Option<TransportId>,
    },

    /// Handshake did not complete within timeout
    #[error("handshake timeout after {elapsed:?}")]
    HandshakeTimeout {
        /// How long we waited
        elapsed: Duration,
    },

    /// Server refused the bearer token
    #[error("authentication rejected: {reason}")]
    AuthRejected {
        /// Reason reported by the server
        reason: String,
    },

    /// Transport dropped or could not be established
    #[error("transport dropped: {0}")]
    TransportDropped(String),

    /// No token available for a reconnect attempt
    #[error("no token available")]
    MissingToken,
}

impl ConnectionError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Network drops and timeouts are recovered by backoff. An auth rejection
    /// needs a fresh token first, and protocol misuse never heals by itself.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::HandshakeTimeout { .. } | Self::TransportDropped(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_and_timeouts_are_transient() {
        assert!(ConnectionError::TransportDropped("reset".into()).is_transient());
        assert!(
            ConnectionError::HandshakeTimeout { elapsed: Duration::from_secs(11) }.is_transient()
        );
    }

    #[test]
    fn auth_and_state_errors_are_not() {
        assert!(!ConnectionError::AuthRejected { reason: "expired".into() }.is_transient());
        assert!(!ConnectionError::MissingToken.is_transient());
        assert!(
            !ConnectionError::InvalidState {
                state: ConnectionState::Disconnected,
                operation: "transport_opened",
            }
            .is_transient()
        );
    }
}
