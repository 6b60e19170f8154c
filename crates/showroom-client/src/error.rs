//! Chat layer error taxonomy.
//!
//! `ChatSession` never returns these: each failure becomes observable state
//! (connection state, message status, room flags) and is logged with its
//! `ChatError` rendering. The async runtime and [`crate::ChatHandle`] do
//! return them.

use showroom_core::ConnectionError;
use showroom_proto::{MessageId, ProtocolError, RoomId};
use thiserror::Error;

use crate::{api::ApiError, transport::TransportError};

/// Errors surfaced by the chat layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Handshake refused (expired or invalid token).
    ///
    /// Recovered by one token refresh; a second rejection signs the user out.
    #[error("authentication rejected: {reason}")]
    AuthRejected {
        /// Reason reported by the server.
        reason: String,
    },

    /// The live transport dropped; reconnect with backoff follows.
    #[error("transport dropped: {0}")]
    TransportDropped(String),

    /// No confirmation for a send within the acknowledgement timeout.
    #[error("send {correlation} to {room_id} timed out")]
    SendTimeout {
        /// Target room.
        room_id: RoomId,
        /// Temporary id of the send.
        correlation: MessageId,
    },

    /// The server refused a send.
    #[error("send {correlation} to {room_id} rejected: {reason}")]
    SendRejected {
        /// Target room.
        room_id: RoomId,
        /// Temporary id of the send.
        correlation: MessageId,
        /// Reason reported by the server.
        reason: String,
    },

    /// History re-fetch for a stale room failed; retried with backoff.
    #[error("history fetch for stale room {room_id} failed: {reason}")]
    StaleRoomFetchFailed {
        /// Room being re-fetched.
        room_id: RoomId,
        /// Failure description.
        reason: String,
    },

    /// Operation requires a live connection.
    #[error("not connected")]
    NotConnected,

    /// The runtime has shut down.
    #[error("chat runtime closed")]
    Closed,

    /// Connection layer failure.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Malformed frame.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// REST failure.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
