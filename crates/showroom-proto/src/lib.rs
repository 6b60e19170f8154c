//! Showroom chat protocol
//!
//! Data model shared by the chat session manager, the REST client and the
//! real-time transport: identifiers, server-confirmed messages, room
//! summaries, unread baselines and the JSON frame taxonomy exchanged over the
//! persistent connection.
//!
//! # Frames
//!
//! Every real-time frame is a JSON object tagged by `type`. Clients send
//! [`ClientFrame`]s (handshake, sends, read acknowledgements), servers push
//! [`ServerFrame`]s (handshake verdicts, message events, room updates).
//! Frames larger than [`MAX_FRAME_LEN`] are rejected before parsing.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod frame;
mod ids;
mod model;
mod token;

pub use error::{ProtocolError, Result};
pub use frame::{ClientFrame, MAX_FRAME_LEN, ServerFrame};
pub use ids::{MessageId, RoomId, UserId};
pub use model::{LastMessage, MessageHistory, RealtimeEndpoint, RoomSummary, ServerMessage, UnreadCounts};
pub use token::BearerToken;
