//! REST and frame payload types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{MessageId, RoomId, UserId};

/// A message as confirmed by the server.
///
/// `seq` is the server-assigned position within the room and is the only
/// ordering the client trusts. `correlation` echoes the temporary id of the
/// optimistic send that produced this message, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMessage {
    /// Server-issued message id.
    pub id: MessageId,
    /// Room the message belongs to.
    pub room_id: RoomId,
    /// Author of the message.
    pub sender: UserId,
    /// Message text.
    pub body: String,
    /// Creation time, unix milliseconds.
    pub created_at: u64,
    /// Server sequence number within the room.
    pub seq: u64,
    /// Temporary id of the originating send.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<MessageId>,
}

/// Last-message summary shown in the room list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    /// Message text.
    pub body: String,
    /// Author of the message.
    pub sender: UserId,
    /// Creation time, unix milliseconds.
    pub created_at: u64,
    /// Server sequence number within the room.
    pub seq: u64,
}

impl LastMessage {
    /// Whether `self` describes a later message than `other`.
    ///
    /// Timestamps decide; the sequence number breaks ties between messages
    /// created within the same millisecond.
    pub fn is_newer_than(&self, other: &LastMessage) -> bool {
        (self.created_at, self.seq) > (other.created_at, other.seq)
    }
}

impl From<&ServerMessage> for LastMessage {
    fn from(message: &ServerMessage) -> Self {
        Self {
            body: message.body.clone(),
            sender: message.sender.clone(),
            created_at: message.created_at,
            seq: message.seq,
        }
    }
}

/// Room entry of `GET /chat/rooms`, also carried by `room_updated` frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    /// Room id.
    pub id: RoomId,
    /// Participants, in server order.
    pub participants: Vec<UserId>,
    /// Most recent message, if the room has any.
    #[serde(default)]
    pub last_message: Option<LastMessage>,
}

/// Response of `GET /chat/unread`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCounts {
    /// Unread messages per room. Rooms with zero may be omitted.
    pub rooms: BTreeMap<RoomId, u32>,
}

/// Response of `GET /chat/rooms/{id}/messages`: the full room history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHistory {
    /// Room id.
    pub room_id: RoomId,
    /// Messages in server sequence order.
    pub messages: Vec<ServerMessage>,
}

/// Response of `GET /chat/realtime`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeEndpoint {
    /// WebSocket URL of the real-time endpoint.
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn last(created_at: u64, seq: u64) -> LastMessage {
        LastMessage { body: String::new(), sender: UserId::from("u"), created_at, seq }
    }

    #[test]
    fn newer_by_timestamp_then_seq() {
        assert!(last(10, 1).is_newer_than(&last(9, 5)));
        assert!(last(10, 6).is_newer_than(&last(10, 5)));
        assert!(!last(10, 5).is_newer_than(&last(10, 5)));
        assert!(!last(8, 9).is_newer_than(&last(9, 1)));
    }

    #[test]
    fn room_summary_without_last_message() {
        let json = r#"{"id":"r1","participants":["a","b"]}"#;
        let room: RoomSummary = serde_json::from_str(json).unwrap();
        assert_eq!(room.participants.len(), 2);
        assert!(room.last_message.is_none());
    }
}
