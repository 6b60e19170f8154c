//! Real-time frame taxonomy and JSON codec.
//!
//! The persistent connection carries text frames, each a JSON object tagged
//! by `type`. The first client frame on a fresh transport must be
//! [`ClientFrame::Authenticate`]; the server answers with
//! [`ServerFrame::AuthAccepted`] or [`ServerFrame::AuthRejected`] before any
//! other traffic.
//!
//! # Invariants
//!
//! - Decoding rejects frames above [`MAX_FRAME_LEN`] without parsing them.
//! - Unknown `type` tags are errors, never silently ignored.

use serde::{Deserialize, Serialize};

use crate::{
    BearerToken, MessageId, RoomId, RoomSummary, ServerMessage, UserId,
    error::{ProtocolError, Result},
};

/// Maximum encoded frame size accepted by the decoder (64 KiB).
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Handshake carrying the bearer token.
    Authenticate {
        /// Current bearer token.
        token: BearerToken,
    },

    /// Post a message to a room.
    SendMessage {
        /// Target room.
        room_id: RoomId,
        /// Message text.
        body: String,
        /// Temporary id of the optimistic entry, echoed on confirmation.
        correlation: MessageId,
    },

    /// Read acknowledgement up to and including `up_to`.
    MarkRead {
        /// Room being acknowledged.
        room_id: RoomId,
        /// Highest server sequence number the user has seen.
        up_to: u64,
    },

    /// Keepalive.
    Ping,
}

/// Frames pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake accepted.
    AuthAccepted {
        /// Identity the token belongs to.
        user_id: UserId,
    },

    /// Handshake rejected (expired or invalid token).
    AuthRejected {
        /// Human-readable reason.
        reason: String,
    },

    /// A message was posted to a room the user participates in.
    MessageSent {
        /// The confirmed message.
        message: ServerMessage,
    },

    /// Acknowledgement of one of our own sends.
    MessageDelivered {
        /// The confirmed message, with `correlation` set.
        message: ServerMessage,
    },

    /// One of our own sends was refused.
    MessageFailed {
        /// Room of the refused send.
        room_id: RoomId,
        /// Temporary id of the refused send.
        correlation: MessageId,
        /// Human-readable reason.
        reason: String,
    },

    /// Room metadata changed (participants, last message).
    RoomUpdated {
        /// New room summary.
        room: RoomSummary,
    },

    /// Keepalive reply.
    Pong,
}

impl ClientFrame {
    /// Encode as a JSON text frame.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Decode a JSON text frame.
    pub fn decode(text: &str) -> Result<Self> {
        check_len(text)?;
        Ok(serde_json::from_str(text)?)
    }
}

impl ServerFrame {
    /// Encode as a JSON text frame.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Decode a JSON text frame.
    pub fn decode(text: &str) -> Result<Self> {
        check_len(text)?;
        Ok(serde_json::from_str(text)?)
    }

    /// Room this frame concerns, if any.
    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            Self::MessageSent { message } | Self::MessageDelivered { message } => {
                Some(&message.room_id)
            },
            Self::MessageFailed { room_id, .. } => Some(room_id),
            Self::RoomUpdated { room } => Some(&room.id),
            Self::AuthAccepted { .. } | Self::AuthRejected { .. } | Self::Pong => None,
        }
    }
}

fn check_len(text: &str) -> Result<()> {
    if text.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge { size: text.len(), max: MAX_FRAME_LEN });
    }
    Ok(())
}
