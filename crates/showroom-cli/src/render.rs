//! Turns successive snapshots into terminal lines.

use std::collections::HashMap;

use showroom_client::{ChatMessage, ChatSnapshot, DeliveryStatus, FailureReason};
use showroom_core::ConnectionState;
use showroom_proto::{MessageId, RoomId};

/// Remembers what was already shown so only changes are printed.
#[derive(Debug, Default)]
pub struct Renderer {
    connection: Option<ConnectionState>,
    unread_total: u32,
    shown: HashMap<RoomId, HashMap<MessageId, DeliveryStatus>>,
}

impl Renderer {
    /// Lines describing what changed since the previous snapshot.
    pub fn update(&mut self, snapshot: &ChatSnapshot) -> Vec<String> {
        let mut lines = Vec::new();

        if self.connection != Some(snapshot.connection) {
            self.connection = Some(snapshot.connection);
            lines.push(format!("* connection: {}", connection_label(snapshot.connection)));
        }

        if snapshot.user.is_none() && !self.shown.is_empty() {
            self.shown.clear();
            lines.push("* signed out".to_owned());
        }

        if let Some(active) = &snapshot.active_room
            && let Some(room) = snapshot.room(active)
        {
            let shown = self.shown.entry(active.clone()).or_default();
            for message in &room.messages {
                if shown.get(&message.id) != Some(&message.status) {
                    shown.insert(message.id.clone(), message.status.clone());
                    lines.push(message_line(message));
                }
            }
        }

        if snapshot.unread_total != self.unread_total {
            self.unread_total = snapshot.unread_total;
            lines.push(format!("* unread: {}", snapshot.unread_total));
        }

        lines
    }
}

/// Room list with unread counts.
pub fn room_list(snapshot: &ChatSnapshot) -> Vec<String> {
    if snapshot.rooms.is_empty() {
        return vec!["* no rooms".to_owned()];
    }
    snapshot
        .rooms
        .iter()
        .map(|room| {
            let marker = if snapshot.active_room.as_ref() == Some(&room.id) { '>' } else { ' ' };
            let preview = room.last_message.as_ref().map_or("", |m| m.body.as_str());
            match room.unread {
                0 => format!("{marker} {} {preview}", room.id),
                n => format!("{marker} {} ({n}) {preview}", room.id),
            }
        })
        .collect()
}

fn message_line(message: &ChatMessage) -> String {
    let status = match &message.status {
        DeliveryStatus::Sent => String::new(),
        DeliveryStatus::Pending => " [sending]".to_owned(),
        DeliveryStatus::Failed(FailureReason::Timeout) => " [failed: timed out]".to_owned(),
        DeliveryStatus::Failed(FailureReason::NotConnected) => " [failed: offline]".to_owned(),
        DeliveryStatus::Failed(FailureReason::Rejected(reason)) => format!(" [failed: {reason}]"),
    };
    format!("[{}] {}: {}{status}", message.room_id, message.sender, message.body)
}

fn connection_label(state: ConnectionState) -> String {
    match state {
        ConnectionState::Disconnected => "disconnected".to_owned(),
        ConnectionState::Connecting => "connecting".to_owned(),
        ConnectionState::Authenticating => "authenticating".to_owned(),
        ConnectionState::Connected => "connected".to_owned(),
        ConnectionState::Reconnecting { attempt } => format!("reconnecting (attempt {attempt})"),
    }
}

#[cfg(test)]
mod tests {
    use showroom_client::RoomView;
    use showroom_proto::UserId;

    use super::*;

    fn message(id: &str, status: DeliveryStatus) -> ChatMessage {
        ChatMessage {
            id: MessageId::from(id),
            room_id: RoomId::from("lobby"),
            sender: UserId::from("bob"),
            body: "hi".into(),
            created_at: 0,
            seq: None,
            status,
        }
    }

    fn snapshot(messages: Vec<ChatMessage>) -> ChatSnapshot {
        ChatSnapshot {
            connection: ConnectionState::Connected,
            user: Some(UserId::from("alice")),
            active_room: Some(RoomId::from("lobby")),
            rooms: vec![RoomView {
                id: RoomId::from("lobby"),
                participants: Vec::new(),
                last_message: None,
                unread: 0,
                stale: false,
                messages,
            }],
            unread_total: 0,
        }
    }

    #[test]
    fn only_changes_are_rendered() {
        let mut renderer = Renderer::default();
        let first = renderer.update(&snapshot(vec![message("tmp-1", DeliveryStatus::Pending)]));
        assert_eq!(first, ["* connection: connected", "[lobby] bob: hi [sending]"]);

        let same = renderer.update(&snapshot(vec![message("tmp-1", DeliveryStatus::Pending)]));
        assert!(same.is_empty());

        let failed = renderer.update(&snapshot(vec![message(
            "tmp-1",
            DeliveryStatus::Failed(FailureReason::Timeout),
        )]));
        assert_eq!(failed, ["[lobby] bob: hi [failed: timed out]"]);
    }

    #[test]
    fn room_list_marks_active_and_unread() {
        let mut state = snapshot(Vec::new());
        state.rooms[0].unread = 2;
        assert_eq!(room_list(&state), ["> lobby (2) "]);
    }
}
