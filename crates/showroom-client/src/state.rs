//! Client-side views of rooms and messages.

use showroom_core::ConnectionState;
use showroom_proto::{LastMessage, MessageId, RoomId, ServerMessage, UserId};

/// Why a send ended in [`DeliveryStatus::Failed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// No confirmation arrived within the acknowledgement timeout.
    Timeout,
    /// The server refused the message.
    Rejected(String),
    /// The send was attempted while the connection was down.
    NotConnected,
}

/// Delivery status of a message.
///
/// Starts at `Pending` for local sends; `Sent` and `Failed` are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Sent optimistically, awaiting confirmation.
    Pending,
    /// Confirmed by the server.
    Sent,
    /// Will not be delivered; the user may re-send as a new message.
    Failed(FailureReason),
}

/// A message as displayed in a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Server id once confirmed, otherwise the temporary correlation id.
    pub id: MessageId,
    /// Room the message belongs to.
    pub room_id: RoomId,
    /// Author.
    pub sender: UserId,
    /// Message text.
    pub body: String,
    /// Creation time, unix milliseconds.
    pub created_at: u64,
    /// Server sequence number; `None` until confirmed.
    pub seq: Option<u64>,
    /// Delivery status.
    pub status: DeliveryStatus,
}

impl ChatMessage {
    /// A server-confirmed message.
    pub fn confirmed(message: &ServerMessage) -> Self {
        Self {
            id: message.id.clone(),
            room_id: message.room_id.clone(),
            sender: message.sender.clone(),
            body: message.body.clone(),
            created_at: message.created_at,
            seq: Some(message.seq),
            status: DeliveryStatus::Sent,
        }
    }

    /// Whether the message still awaits confirmation.
    pub fn is_pending(&self) -> bool {
        self.status == DeliveryStatus::Pending
    }
}

/// Room as presented to the UI: sync state joined with its unread count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomView {
    /// Room id.
    pub id: RoomId,
    /// Participants in server order.
    pub participants: Vec<UserId>,
    /// Last-message summary.
    pub last_message: Option<LastMessage>,
    /// Unread count for the current user.
    pub unread: u32,
    /// Whether history is being re-fetched after a reconnect.
    pub stale: bool,
    /// Messages in display order.
    pub messages: Vec<ChatMessage>,
}

/// Point-in-time copy of everything the chat layer exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSnapshot {
    /// Connection state.
    pub connection: ConnectionState,
    /// Signed-in user, if any.
    pub user: Option<UserId>,
    /// Room currently open in the UI.
    pub active_room: Option<RoomId>,
    /// Rooms, most recently active first.
    pub rooms: Vec<RoomView>,
    /// Sum of all per-room unread counts.
    pub unread_total: u32,
}

impl Default for ChatSnapshot {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            user: None,
            active_room: None,
            rooms: Vec::new(),
            unread_total: 0,
        }
    }
}

impl ChatSnapshot {
    /// Room by id.
    pub fn room(&self, room_id: &RoomId) -> Option<&RoomView> {
        self.rooms.iter().find(|r| &r.id == room_id)
    }
}
