//! In-memory chat backend.
//!
//! `SimServer` plays both external services the chat layer talks to: the REST
//! API (room list, unread baseline, history) and the real-time service
//! (handshake, message fan-out, read acknowledgements). Everything is
//! synchronous; the [`SimDriver`](crate::SimDriver) decides when frames are
//! delivered.
//!
//! Server behavior mirrors the production contract:
//! - every message gets the next per-room sequence number
//! - the sender's connection receives `MessageDelivered` with the correlation,
//!   every other connection of a participant receives `MessageSent`
//! - unread counts are messages from others after the user's read mark

use std::collections::{BTreeMap, HashMap, VecDeque};

use showroom_client::ApiError;
use showroom_proto::{
    BearerToken, ClientFrame, LastMessage, MessageHistory, MessageId, RoomId, RoomSummary,
    ServerFrame, ServerMessage, UnreadCounts, UserId,
};

/// Base for server timestamps (unix millis); each message adds its sequence.
const SERVER_EPOCH_MILLIS: u64 = 1_700_000_000_000;

/// Handle for one simulated real-time connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnId(pub u64);

#[derive(Debug, Default)]
struct ServerRoom {
    participants: Vec<UserId>,
    messages: Vec<ServerMessage>,
}

impl ServerRoom {
    fn summary(&self, id: &RoomId) -> RoomSummary {
        RoomSummary {
            id: id.clone(),
            participants: self.participants.clone(),
            last_message: self.messages.last().map(LastMessage::from),
        }
    }
}

#[derive(Debug, Default)]
struct Connection {
    user: Option<UserId>,
    outbound: VecDeque<ServerFrame>,
}

/// In-memory chat backend.
#[derive(Debug, Default)]
pub struct SimServer {
    tokens: HashMap<BearerToken, UserId>,
    rooms: BTreeMap<RoomId, ServerRoom>,
    read_marks: BTreeMap<(UserId, RoomId), u64>,
    connections: BTreeMap<ConnId, Connection>,
    next_conn: u64,
    next_message: u64,
    reject_sends: bool,
}

impl SimServer {
    /// Empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` as proof of `user`.
    pub fn issue_token(&mut self, user: &UserId, token: &BearerToken) {
        self.tokens.insert(token.clone(), user.clone());
    }

    /// Stop accepting `token`.
    pub fn revoke_token(&mut self, token: &BearerToken) {
        self.tokens.remove(token);
    }

    /// Create (or replace the participants of) a room.
    pub fn create_room(&mut self, room_id: &RoomId, participants: &[UserId]) {
        self.rooms.entry(room_id.clone()).or_default().participants = participants.to_vec();
    }

    /// Refuse every subsequent send with `MessageFailed`.
    pub fn set_reject_sends(&mut self, reject: bool) {
        self.reject_sends = reject;
    }

    /// Messages of a room in sequence order.
    pub fn messages(&self, room_id: &RoomId) -> &[ServerMessage] {
        self.rooms.get(room_id).map(|r| r.messages.as_slice()).unwrap_or_default()
    }

    /// Rooms in id order.
    pub fn room_ids(&self) -> impl Iterator<Item = &RoomId> {
        self.rooms.keys()
    }

    /// Read mark of `user` in a room.
    pub fn read_mark(&self, user: &UserId, room_id: &RoomId) -> Option<u64> {
        self.read_marks.get(&(user.clone(), room_id.clone())).copied()
    }

    /// Open a real-time connection.
    pub fn connect(&mut self) -> ConnId {
        let id = ConnId(self.next_conn);
        self.next_conn += 1;
        self.connections.insert(id, Connection::default());
        id
    }

    /// Close a real-time connection, discarding undelivered frames.
    pub fn disconnect(&mut self, conn: ConnId) {
        self.connections.remove(&conn);
    }

    /// Whether a connection is open.
    pub fn is_connected(&self, conn: ConnId) -> bool {
        self.connections.contains_key(&conn)
    }

    /// Take frames queued for a connection.
    pub fn take_outbound(&mut self, conn: ConnId) -> Vec<ServerFrame> {
        self.connections.get_mut(&conn).map(|c| c.outbound.drain(..).collect()).unwrap_or_default()
    }

    /// Handle a frame from a client connection.
    pub fn receive(&mut self, conn: ConnId, frame: ClientFrame) {
        let Some(connection) = self.connections.get_mut(&conn) else {
            return;
        };

        match frame {
            ClientFrame::Authenticate { token } => match self.tokens.get(&token) {
                Some(user) => {
                    connection.user = Some(user.clone());
                    connection.outbound.push_back(ServerFrame::AuthAccepted { user_id: user.clone() });
                },
                None => {
                    connection.outbound.push_back(ServerFrame::AuthRejected {
                        reason: "invalid or expired token".into(),
                    });
                },
            },
            ClientFrame::Ping => connection.outbound.push_back(ServerFrame::Pong),
            ClientFrame::SendMessage { room_id, body, correlation } => {
                let Some(user) = connection.user.clone() else {
                    return;
                };
                let allowed = !self.reject_sends
                    && self.rooms.get(&room_id).is_some_and(|r| r.participants.contains(&user));
                if !allowed {
                    connection.outbound.push_back(ServerFrame::MessageFailed {
                        room_id,
                        correlation,
                        reason: "not allowed".into(),
                    });
                    return;
                }
                self.append(&room_id, &user, &body, Some(correlation), Some(conn));
            },
            ClientFrame::MarkRead { room_id, up_to } => {
                let Some(user) = connection.user.clone() else {
                    return;
                };
                let mark = self.read_marks.entry((user, room_id)).or_insert(up_to);
                *mark = (*mark).max(up_to);
            },
        }
    }

    /// Post a message on behalf of `sender` from outside any simulated
    /// client connection.
    pub fn post(&mut self, room_id: &RoomId, sender: &UserId, body: &str) -> ServerMessage {
        self.append(room_id, sender, body, None, None)
    }

    /// `GET /chat/rooms`.
    pub fn rooms_for(&self, token: &BearerToken) -> Result<Vec<RoomSummary>, ApiError> {
        let user = self.authorize(token)?;
        Ok(self
            .rooms
            .iter()
            .filter(|(_, room)| room.participants.contains(user))
            .map(|(id, room)| room.summary(id))
            .collect())
    }

    /// `GET /chat/unread`.
    pub fn unread_for(&self, token: &BearerToken) -> Result<UnreadCounts, ApiError> {
        let user = self.authorize(token)?;
        let mut counts = UnreadCounts::default();
        for (id, room) in self.rooms.iter().filter(|(_, r)| r.participants.contains(user)) {
            let mark = self.read_mark(user, id).unwrap_or(0);
            let unread =
                room.messages.iter().filter(|m| m.seq > mark && &m.sender != user).count() as u32;
            if unread > 0 {
                counts.rooms.insert(id.clone(), unread);
            }
        }
        Ok(counts)
    }

    /// `GET /chat/rooms/{id}/messages`.
    pub fn history(
        &self,
        token: &BearerToken,
        room_id: &RoomId,
    ) -> Result<MessageHistory, ApiError> {
        let user = self.authorize(token)?;
        let room = self
            .rooms
            .get(room_id)
            .filter(|r| r.participants.contains(user))
            .ok_or_else(|| ApiError::Http { status: 404, body: format!("no room {room_id}") })?;

        // Correlations are only meaningful to their sender.
        let messages = room
            .messages
            .iter()
            .map(|m| ServerMessage {
                correlation: m.correlation.clone().filter(|_| &m.sender == user),
                ..m.clone()
            })
            .collect();
        Ok(MessageHistory { room_id: room_id.clone(), messages })
    }

    fn authorize(&self, token: &BearerToken) -> Result<&UserId, ApiError> {
        self.tokens.get(token).ok_or(ApiError::Unauthorized)
    }

    fn append(
        &mut self,
        room_id: &RoomId,
        sender: &UserId,
        body: &str,
        correlation: Option<MessageId>,
        origin: Option<ConnId>,
    ) -> ServerMessage {
        self.next_message += 1;
        let room = self.rooms.entry(room_id.clone()).or_default();
        let seq = room.messages.last().map_or(1, |m| m.seq + 1);
        let message = ServerMessage {
            id: MessageId::new(format!("msg-{}", self.next_message)),
            room_id: room_id.clone(),
            sender: sender.clone(),
            body: body.to_owned(),
            created_at: SERVER_EPOCH_MILLIS + self.next_message,
            seq,
            correlation,
        };
        room.messages.push(message.clone());

        let participants = room.participants.clone();
        for (id, connection) in &mut self.connections {
            let Some(user) = &connection.user else {
                continue;
            };
            if Some(*id) == origin {
                connection
                    .outbound
                    .push_back(ServerFrame::MessageDelivered { message: message.clone() });
            } else if participants.contains(user) {
                let message = ServerMessage { correlation: None, ..message.clone() };
                connection.outbound.push_back(ServerFrame::MessageSent { message });
            }
        }
        message
    }
}
