//! Observable state snapshots for invariant checking.
//!
//! Snapshots capture the observable state of a session at a point in time.
//! Invariants operate on snapshots rather than live state so checks are
//! atomic, and snapshots serialize for `insta` assertions.

use std::collections::BTreeMap;

use serde::Serialize;
use showroom_client::{ChatSession, DeliveryStatus};
use showroom_core::Environment;

/// Snapshot of one chat session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// Signed-in user.
    pub user: Option<String>,
    /// Connection state, rendered.
    pub connection: String,
    /// Room the user is viewing.
    pub active_room: Option<String>,
    /// Total unread count as reported by the session.
    pub unread_total: u32,
    /// Non-zero unread counts, including rooms not yet listed.
    pub unread: BTreeMap<String, u32>,
    /// Rooms, most recently active first.
    pub rooms: Vec<RoomSnapshot>,
}

impl SessionSnapshot {
    /// Empty snapshot (signed out, no rooms).
    pub fn empty() -> Self {
        Self { connection: "Disconnected".into(), ..Self::default() }
    }

    /// Capture a session's observable state.
    pub fn capture<E: Environment>(session: &ChatSession<E>) -> Self {
        let rooms = session
            .rooms()
            .map(|room| RoomSnapshot {
                id: room.id().to_string(),
                unread: session.unread(room.id()),
                stale: session.is_stale(room.id()),
                history_loaded: room.history_loaded(),
                messages: room
                    .messages()
                    .iter()
                    .map(|m| MessageSnapshot {
                        id: m.id.to_string(),
                        seq: m.seq,
                        status: status_label(&m.status),
                    })
                    .collect(),
            })
            .collect();

        Self {
            user: session.user().map(ToString::to_string),
            connection: format!("{:?}", session.connection_state()),
            active_room: session.active_room().map(ToString::to_string),
            unread_total: session.unread_total(),
            unread: session.unread_counts().map(|(id, n)| (id.to_string(), n)).collect(),
            rooms,
        }
    }

    /// Add a room.
    pub fn with_room(mut self, room: RoomSnapshot) -> Self {
        self.rooms.push(room);
        self
    }

    /// Set a room's unread count, keeping the total in step.
    pub fn with_unread(mut self, room: &str, count: u32) -> Self {
        let previous = self.unread.insert(room.to_owned(), count).unwrap_or(0);
        self.unread_total = self.unread_total - previous + count;
        self
    }

    /// Room by id.
    pub fn room(&self, id: &str) -> Option<&RoomSnapshot> {
        self.rooms.iter().find(|r| r.id == id)
    }
}

/// Snapshot of one room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoomSnapshot {
    /// Room id.
    pub id: String,
    /// Unread count.
    pub unread: u32,
    /// Whether a catch-up fetch is in flight.
    pub stale: bool,
    /// Whether the full history has been merged.
    pub history_loaded: bool,
    /// Messages in display order.
    pub messages: Vec<MessageSnapshot>,
}

impl RoomSnapshot {
    /// Room with no messages.
    pub fn new(id: &str) -> Self {
        Self { id: id.to_owned(), ..Self::default() }
    }

    /// Set the unread count.
    pub fn with_unread(mut self, unread: u32) -> Self {
        self.unread = unread;
        self
    }

    /// Append a message.
    pub fn with_message(mut self, id: &str, seq: Option<u64>, status: &str) -> Self {
        self.messages.push(MessageSnapshot { id: id.to_owned(), seq, status: status.to_owned() });
        self
    }

    /// Ids of confirmed messages in display order.
    pub fn confirmed_ids(&self) -> Vec<&str> {
        self.messages.iter().filter(|m| m.seq.is_some()).map(|m| m.id.as_str()).collect()
    }
}

/// Snapshot of one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageSnapshot {
    /// Message id (temporary until confirmed).
    pub id: String,
    /// Server sequence number.
    pub seq: Option<u64>,
    /// `pending`, `sent` or `failed`.
    pub status: String,
}

fn status_label(status: &DeliveryStatus) -> String {
    match status {
        DeliveryStatus::Pending => "pending",
        DeliveryStatus::Sent => "sent",
        DeliveryStatus::Failed(_) => "failed",
    }
    .to_owned()
}
