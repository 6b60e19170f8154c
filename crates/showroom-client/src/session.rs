//! Chat session: composition of the chat state machines.
//!
//! Routes every input to the component that owns the affected state and
//! translates component actions into [`ChatAction`]s for the driver. No
//! component mutates another's state; cross-component effects (a new message
//! bumping an unread count, a handshake rejection triggering a token refresh)
//! flow through here as actions.
//!
//! [`ChatSession::handle`] never fails. Failures become observable state
//! (connection state, message status, stale flags) and are logged.

use std::{collections::BTreeMap, sync::Arc};

use showroom_core::{
    ConnectionAction, ConnectionManager, ConnectionState, Environment, SharedToken,
    SubscriptionId, TransportId,
};
use showroom_proto::{ClientFrame, RoomId, ServerFrame, UserId};

use crate::{
    binding::{BindingAction, SessionBinding},
    config::ChatConfig,
    error::ChatError,
    event::{ChatAction, ChatEvent, Generation},
    rooms::{Room, RoomChange, RoomSync, SyncAction},
    state::{ChatMessage, ChatSnapshot, RoomView},
    unread::{UnreadCounter, UnreadUpdate},
};

/// The chat session state machine.
pub struct ChatSession<E: Environment> {
    connection: ConnectionManager<E>,
    rooms: RoomSync<E>,
    unread: UnreadCounter,
    binding: SessionBinding,
    tokens: SharedToken,
    active_room: Option<RoomId>,
    generation: Generation,
    unread_requested: bool,
    unsent_reads: BTreeMap<RoomId, u64>,
}

impl<E: Environment> ChatSession<E> {
    /// Create a signed-out session.
    pub fn new(env: E, config: &ChatConfig) -> Self {
        let tokens = SharedToken::new();
        let connection =
            ConnectionManager::new(env.clone(), config.connection.clone(), Arc::new(tokens.clone()));
        Self {
            connection,
            rooms: RoomSync::new(env, config.sync.clone()),
            unread: UnreadCounter::new(),
            binding: SessionBinding::new(),
            tokens,
            active_room: None,
            generation: Generation(0),
            unread_requested: false,
            unsent_reads: BTreeMap::new(),
        }
    }

    /// Process one event.
    pub fn handle(&mut self, event: ChatEvent) -> Vec<ChatAction> {
        let mut out = Vec::new();

        match event {
            ChatEvent::Auth(change) => {
                let actions = self.binding.auth_changed(change);
                self.apply_binding(actions, &mut out);
            },
            ChatEvent::TransportOpened(transport) => {
                let actions = self.connection.transport_opened(transport);
                self.apply_connection(actions, &mut out);
            },
            ChatEvent::TransportClosed { transport, reason } => {
                if self.connection.transport() == Some(transport) {
                    tracing::warn!(error = %ChatError::TransportDropped(reason.clone()), "connection lost");
                }
                let actions = self.connection.transport_failed(transport, &reason);
                self.apply_connection(actions, &mut out);
            },
            ChatEvent::FrameReceived { transport, frame } => {
                self.handle_frame(transport, frame, &mut out);
            },
            ChatEvent::RoomsFetched { generation, request, result } => {
                if self.is_current(generation) {
                    let actions = self.rooms.rooms_fetched(request, result.map_err(|e| e.to_string()));
                    self.apply_sync(actions, &mut out);
                }
            },
            ChatEvent::UnreadFetched { generation, result } => {
                if self.is_current(generation) {
                    match result {
                        Ok(counts) => {
                            self.unread.apply_baseline(&counts);
                        },
                        Err(error) => {
                            tracing::warn!(%error, "unread baseline fetch failed");
                            // Retried on the next established connection.
                            self.unread_requested = false;
                        },
                    }
                }
            },
            ChatEvent::HistoryFetched { generation, room_id, request, result } => {
                if self.is_current(generation) {
                    let result = result.map(|h| h.messages).map_err(|e| e.to_string());
                    let actions = self.rooms.history_fetched(&room_id, request, result);
                    self.apply_sync(actions, &mut out);
                }
            },
            ChatEvent::TokenRefreshed { generation, result } => {
                if self.is_current(generation) {
                    let actions = self.binding.refresh_completed(result);
                    self.apply_binding(actions, &mut out);
                }
            },
            ChatEvent::SendMessage { room_id, body } => {
                let Some(user) = self.binding.user().cloned() else {
                    tracing::warn!(%room_id, "send while signed out ignored");
                    return out;
                };
                let connected = self.connection.state() == ConnectionState::Connected;
                let (_, actions) = self.rooms.send(&room_id, &body, &user, connected);
                self.apply_sync(actions, &mut out);
            },
            ChatEvent::MarkRead { room_id } => {
                if self.binding.user().is_some() {
                    self.mark_read(&room_id, &mut out);
                }
            },
            ChatEvent::OpenRoom(room_id) => {
                if self.binding.user().is_none() {
                    tracing::debug!(%room_id, "open room while signed out ignored");
                    return out;
                }
                self.active_room = Some(room_id.clone());
                self.unread.set_active(Some(room_id.clone()));
                let actions = self.rooms.open_room(&room_id);
                self.apply_sync(actions, &mut out);
                self.mark_read(&room_id, &mut out);
            },
            ChatEvent::CloseRoom => {
                self.active_room = None;
                self.unread.set_active(None);
            },
            ChatEvent::Tick => {
                let actions = self.connection.tick();
                self.apply_connection(actions, &mut out);
                let actions = self.rooms.tick();
                self.apply_sync(actions, &mut out);
            },
        }

        out
    }

    /// Close the connection for good (runtime shutdown).
    pub fn shutdown(&mut self) -> Vec<ChatAction> {
        let mut out = Vec::new();
        let actions = self.connection.close();
        self.apply_connection(actions, &mut out);
        out
    }

    /// Earliest deadline at which [`ChatEvent::Tick`] has work to do.
    pub fn next_deadline(&self) -> Option<E::Instant> {
        [self.connection.next_deadline(), self.rooms.next_deadline()].into_iter().flatten().min()
    }

    /// Token slot shared with the connection manager, for REST calls.
    pub fn token_source(&self) -> SharedToken {
        self.tokens.clone()
    }

    /// Connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Live transport, if any.
    pub fn transport(&self) -> Option<TransportId> {
        self.connection.transport()
    }

    /// Signed-in user.
    pub fn user(&self) -> Option<&UserId> {
        self.binding.user()
    }

    /// Current generation.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Rooms, most recently active first.
    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.rooms()
    }

    /// Messages of a room in display order.
    pub fn messages(&self, room_id: &RoomId) -> &[ChatMessage] {
        self.rooms.messages(room_id)
    }

    /// Whether a room is being re-fetched after missed messages.
    pub fn is_stale(&self, room_id: &RoomId) -> bool {
        self.rooms.is_stale(room_id)
    }

    /// Unread count of a room.
    pub fn unread(&self, room_id: &RoomId) -> u32 {
        self.unread.count(room_id)
    }

    /// Rooms with a non-zero unread count.
    pub fn unread_counts(&self) -> impl Iterator<Item = (&RoomId, u32)> {
        self.unread.counts()
    }

    /// Total unread count.
    pub fn unread_total(&self) -> u32 {
        self.unread.total()
    }

    /// Room currently open.
    pub fn active_room(&self) -> Option<&RoomId> {
        self.active_room.as_ref()
    }

    /// Copy of all observable state.
    pub fn snapshot(&self) -> ChatSnapshot {
        let rooms = self
            .rooms
            .rooms()
            .map(|room| RoomView {
                id: room.id().clone(),
                participants: room.participants().to_vec(),
                last_message: room.last_message().cloned(),
                unread: self.unread.count(room.id()),
                stale: self.rooms.is_stale(room.id()),
                messages: room.messages().to_vec(),
            })
            .collect();

        ChatSnapshot {
            connection: self.connection.state(),
            user: self.binding.user().cloned(),
            active_room: self.active_room.clone(),
            rooms,
            unread_total: self.unread.total(),
        }
    }

    /// Observe connection state transitions.
    pub fn subscribe_connection(
        &mut self,
        callback: impl FnMut(&ConnectionState) + Send + 'static,
    ) -> SubscriptionId {
        self.connection.subscribe(callback)
    }

    /// Stop observing connection state.
    pub fn unsubscribe_connection(&mut self, id: SubscriptionId) -> bool {
        self.connection.unsubscribe(id)
    }

    /// Observe room and message changes.
    pub fn subscribe_rooms(
        &mut self,
        callback: impl FnMut(&RoomChange) + Send + 'static,
    ) -> SubscriptionId {
        self.rooms.subscribe(callback)
    }

    /// Stop observing rooms.
    pub fn unsubscribe_rooms(&mut self, id: SubscriptionId) -> bool {
        self.rooms.unsubscribe(id)
    }

    /// Observe unread counts.
    pub fn subscribe_unread(
        &mut self,
        callback: impl FnMut(&UnreadUpdate) + Send + 'static,
    ) -> SubscriptionId {
        self.unread.subscribe(callback)
    }

    /// Stop observing unread counts.
    pub fn unsubscribe_unread(&mut self, id: SubscriptionId) -> bool {
        self.unread.unsubscribe(id)
    }

    fn is_current(&self, generation: Generation) -> bool {
        if generation != self.generation {
            tracing::debug!(?generation, current = ?self.generation, "dropping result of a cleared session");
            return false;
        }
        true
    }

    fn handle_frame(&mut self, transport: TransportId, frame: ServerFrame, out: &mut Vec<ChatAction>) {
        if self.connection.transport() != Some(transport) {
            tracing::trace!(?transport, "frame from stale transport");
            return;
        }

        match frame {
            ServerFrame::AuthAccepted { user_id } => {
                if let Some(user) = self.binding.user()
                    && user != &user_id
                {
                    tracing::warn!(expected = %user, got = %user_id, "handshake identity mismatch");
                }
                let actions = self.connection.handshake_accepted(transport);
                self.apply_connection(actions, out);
            },
            ServerFrame::AuthRejected { reason } => {
                let actions = self.connection.handshake_rejected(transport, reason);
                self.apply_connection(actions, out);
            },
            ServerFrame::Pong => {},
            frame => {
                if self.connection.state() != ConnectionState::Connected {
                    tracing::debug!("event before handshake ignored");
                    return;
                }
                let actions = self.rooms.handle_frame(&frame);
                self.apply_sync(actions, out);
            },
        }
    }

    fn apply_binding(&mut self, actions: Vec<BindingAction>, out: &mut Vec<ChatAction>) {
        for action in actions {
            match action {
                BindingAction::Open(token) => {
                    self.tokens.set(Some(token.clone()));
                    let actions = self.connection.open(token);
                    self.apply_connection(actions, out);
                },
                BindingAction::SetToken(token) => {
                    self.tokens.set(Some(token.clone()));
                    self.connection.set_token(token);
                },
                BindingAction::Close => {
                    let actions = self.connection.close();
                    self.apply_connection(actions, out);
                },
                BindingAction::ClearState => self.clear_state(),
                BindingAction::RefreshToken => {
                    out.push(ChatAction::RefreshToken { generation: self.generation });
                },
                BindingAction::ForceSignOut => out.push(ChatAction::ForceSignOut),
            }
        }
    }

    fn apply_connection(&mut self, actions: Vec<ConnectionAction>, out: &mut Vec<ChatAction>) {
        for action in actions {
            match action {
                ConnectionAction::StateChanged { from, to } => {
                    tracing::info!(?from, ?to, "chat connection");
                },
                ConnectionAction::Dial { transport } => out.push(ChatAction::Dial { transport }),
                ConnectionAction::SendHandshake { transport, token } => {
                    out.push(ChatAction::Send {
                        transport,
                        frame: ClientFrame::Authenticate { token },
                    });
                },
                ConnectionAction::SendPing { transport } => {
                    out.push(ChatAction::Send { transport, frame: ClientFrame::Ping });
                },
                ConnectionAction::CloseTransport { transport } => {
                    out.push(ChatAction::CloseTransport { transport });
                },
                ConnectionAction::Established { transport, resumed } => {
                    self.binding.handshake_succeeded();
                    let actions = self.rooms.on_established();
                    self.apply_sync(actions, out);

                    if !self.unread_requested {
                        self.unread_requested = true;
                        out.push(ChatAction::FetchUnread { generation: self.generation });
                    }

                    for (room_id, up_to) in std::mem::take(&mut self.unsent_reads) {
                        out.push(ChatAction::Send {
                            transport,
                            frame: ClientFrame::MarkRead { room_id, up_to },
                        });
                    }
                    tracing::debug!(resumed, "chat session established");
                },
                ConnectionAction::AuthRejected { reason } => {
                    tracing::warn!(error = %ChatError::AuthRejected { reason }, "handshake failed");
                    let actions = self.binding.auth_rejected();
                    self.apply_binding(actions, out);
                },
            }
        }
    }

    fn apply_sync(&mut self, actions: Vec<SyncAction>, out: &mut Vec<ChatAction>) {
        let mut read_active = false;

        for action in actions {
            match action {
                SyncAction::FetchRooms { request } => {
                    out.push(ChatAction::FetchRooms { generation: self.generation, request });
                },
                SyncAction::FetchHistory { room_id, request } => {
                    out.push(ChatAction::FetchHistory {
                        generation: self.generation,
                        room_id,
                        request,
                    });
                },
                SyncAction::Send(frame) => self.send_frame(frame, out),
                SyncAction::Applied { room_id, sender, seq } => {
                    if self.active_room.as_ref() == Some(&room_id) {
                        read_active = true;
                    } else if self.binding.user() != Some(&sender) {
                        self.unread.increment(&room_id, seq);
                    }
                },
            }
        }

        if read_active && let Some(room_id) = self.active_room.clone() {
            self.mark_read(&room_id, out);
        }
    }

    fn mark_read(&mut self, room_id: &RoomId, out: &mut Vec<ChatAction>) {
        let token = self.rooms.latest_seq(room_id);
        if let Some(frame) = self.unread.mark_read(room_id, token) {
            self.send_frame(frame, out);
        }
    }

    fn send_frame(&mut self, frame: ClientFrame, out: &mut Vec<ChatAction>) {
        if self.connection.state() == ConnectionState::Connected
            && let Some(transport) = self.connection.transport()
        {
            out.push(ChatAction::Send { transport, frame });
            return;
        }

        match frame {
            ClientFrame::MarkRead { room_id, up_to } => {
                let entry = self.unsent_reads.entry(room_id).or_insert(up_to);
                *entry = (*entry).max(up_to);
            },
            frame => tracing::debug!(?frame, "frame dropped while disconnected"),
        }
    }

    fn clear_state(&mut self) {
        self.rooms.clear();
        self.unread.clear();
        self.tokens.set(None);
        self.active_room = None;
        self.unread_requested = false;
        self.unsent_reads.clear();
        self.generation = Generation(self.generation.0 + 1);
        tracing::info!(generation = ?self.generation, "chat state cleared");
    }
}

impl<E: Environment> std::fmt::Debug for ChatSession<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("connection", &self.connection)
            .field("rooms", &self.rooms)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use showroom_core::ConnectionState;
    use showroom_proto::{
        BearerToken, LastMessage, MessageHistory, MessageId, RoomSummary, ServerMessage,
        UnreadCounts,
    };

    use super::*;
    use crate::{
        api::ApiError,
        binding::AuthChange,
        rooms::RequestId,
        state::{DeliveryStatus, FailureReason},
        test_env::TestEnv,
    };

    fn session() -> (ChatSession<TestEnv>, TestEnv) {
        let env = TestEnv::new();
        (ChatSession::new(env.clone(), &ChatConfig::default()), env)
    }

    fn sign_in(user: &str, token: &str) -> ChatEvent {
        ChatEvent::Auth(AuthChange::SignedIn {
            user: UserId::from(user),
            token: Some(BearerToken::new(token)),
        })
    }

    fn msg(room: &str, id: &str, sender: &str, seq: u64) -> ServerMessage {
        ServerMessage {
            id: MessageId::from(id),
            room_id: RoomId::from(room),
            sender: UserId::from(sender),
            body: format!("body {id}"),
            created_at: 1_000 + seq,
            seq,
            correlation: None,
        }
    }

    fn dialed(actions: &[ChatAction]) -> TransportId {
        actions
            .iter()
            .find_map(|a| match a {
                ChatAction::Dial { transport } => Some(*transport),
                _ => None,
            })
            .unwrap()
    }

    fn rooms_request(actions: &[ChatAction]) -> (Generation, RequestId) {
        actions
            .iter()
            .find_map(|a| match a {
                ChatAction::FetchRooms { generation, request } => Some((*generation, *request)),
                _ => None,
            })
            .unwrap()
    }

    fn frame(transport: TransportId, frame: ServerFrame) -> ChatEvent {
        ChatEvent::FrameReceived { transport, frame }
    }

    /// Sign in as alice and complete the handshake.
    fn connected() -> (ChatSession<TestEnv>, TestEnv, TransportId, Vec<ChatAction>) {
        let (mut session, env) = session();
        let transport = dialed(&session.handle(sign_in("alice", "t1")));
        session.handle(ChatEvent::TransportOpened(transport));
        let actions = session.handle(frame(transport, ServerFrame::AuthAccepted {
            user_id: UserId::from("alice"),
        }));
        (session, env, transport, actions)
    }

    #[test]
    fn sign_in_connects_and_fetches_baselines() {
        let (mut session, _) = session();
        let actions = session.handle(sign_in("alice", "t1"));
        let transport = dialed(&actions);
        assert_eq!(session.connection_state(), ConnectionState::Connecting);

        let actions = session.handle(ChatEvent::TransportOpened(transport));
        assert_eq!(actions, vec![ChatAction::Send {
            transport,
            frame: ClientFrame::Authenticate { token: BearerToken::new("t1") },
        }]);

        let actions = session.handle(frame(transport, ServerFrame::AuthAccepted {
            user_id: UserId::from("alice"),
        }));
        assert_eq!(session.connection_state(), ConnectionState::Connected);
        assert!(actions.iter().any(|a| matches!(a, ChatAction::FetchRooms { .. })));
        assert!(actions.contains(&ChatAction::FetchUnread { generation: Generation(0) }));
    }

    #[test]
    fn inbound_messages_count_unread_except_own() {
        let (mut session, _, transport, _) = connected();

        session.handle(frame(transport, ServerFrame::MessageSent {
            message: msg("r1", "m1", "bob", 1),
        }));
        session.handle(frame(transport, ServerFrame::MessageSent {
            message: msg("r1", "m2", "alice", 2),
        }));

        assert_eq!(session.unread(&RoomId::from("r1")), 1);
        assert_eq!(session.unread_total(), 1);
        assert_eq!(session.messages(&RoomId::from("r1")).len(), 2);
    }

    #[test]
    fn active_room_marks_read_instead_of_counting() {
        let (mut session, _, transport, _) = connected();
        let room = RoomId::from("r1");
        session.handle(ChatEvent::OpenRoom(room.clone()));

        let actions = session.handle(frame(transport, ServerFrame::MessageSent {
            message: msg("r1", "m1", "bob", 1),
        }));

        assert_eq!(session.unread(&room), 0);
        assert!(actions.contains(&ChatAction::Send {
            transport,
            frame: ClientFrame::MarkRead { room_id: room, up_to: 1 },
        }));
    }

    #[test]
    fn mark_read_resets_count_and_acknowledges() {
        let (mut session, _, transport, _) = connected();
        let room = RoomId::from("r1");
        for seq in 1..=3 {
            session.handle(frame(transport, ServerFrame::MessageSent {
                message: msg("r1", &format!("m{seq}"), "bob", seq),
            }));
        }
        assert_eq!(session.unread(&room), 3);

        let actions = session.handle(ChatEvent::MarkRead { room_id: room.clone() });
        assert_eq!(session.unread(&room), 0);
        assert_eq!(actions, vec![ChatAction::Send {
            transport,
            frame: ClientFrame::MarkRead { room_id: room.clone(), up_to: 3 },
        }]);

        // A delayed increment for an already-read message is ignored.
        session.handle(frame(transport, ServerFrame::MessageSent {
            message: msg("r1", "m0", "bob", 0),
        }));
        assert_eq!(session.unread(&room), 0);
    }

    #[test]
    fn unread_baseline_applied_once() {
        let (mut session, _, _, _) = connected();
        let mut counts = UnreadCounts::default();
        counts.rooms.insert(RoomId::from("r1"), 4);

        session.handle(ChatEvent::UnreadFetched {
            generation: Generation(0),
            result: Ok(counts.clone()),
        });
        counts.rooms.insert(RoomId::from("r1"), 9);
        session.handle(ChatEvent::UnreadFetched { generation: Generation(0), result: Ok(counts) });

        assert_eq!(session.unread(&RoomId::from("r1")), 4);
    }

    #[test]
    fn send_while_disconnected_fails_immediately() {
        let (mut session, _) = session();
        session.handle(sign_in("alice", "t1"));

        let actions = session.handle(ChatEvent::SendMessage {
            room_id: RoomId::from("r1"),
            body: "hello".into(),
        });

        assert!(actions.is_empty());
        let messages = session.messages(&RoomId::from("r1"));
        assert_eq!(messages[0].status, DeliveryStatus::Failed(FailureReason::NotConnected));
    }

    #[test]
    fn send_emits_frame_on_live_transport() {
        let (mut session, _, transport, _) = connected();
        let actions = session.handle(ChatEvent::SendMessage {
            room_id: RoomId::from("r1"),
            body: "hello".into(),
        });

        assert!(matches!(
            &actions[..],
            [ChatAction::Send { transport: t, frame: ClientFrame::SendMessage { .. } }] if *t == transport
        ));
        assert!(session.messages(&RoomId::from("r1"))[0].is_pending());
    }

    #[test]
    fn sign_out_clears_and_ignores_late_results() {
        let (mut session, _, transport, actions) = connected();
        let (generation, request) = rooms_request(&actions);
        session.handle(frame(transport, ServerFrame::MessageSent {
            message: msg("r1", "m1", "bob", 1),
        }));

        let actions = session.handle(ChatEvent::Auth(AuthChange::SignedOut));
        assert!(actions.contains(&ChatAction::CloseTransport { transport }));
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert_eq!(session.rooms().count(), 0);
        assert_eq!(session.unread_total(), 0);

        session.handle(ChatEvent::RoomsFetched {
            generation,
            request,
            result: Ok(vec![RoomSummary {
                id: RoomId::from("old"),
                participants: vec![],
                last_message: None,
            }]),
        });
        assert_eq!(session.rooms().count(), 0);
    }

    #[test]
    fn new_identity_starts_empty() {
        let (mut session, _, transport, _) = connected();
        session.handle(frame(transport, ServerFrame::MessageSent {
            message: msg("r1", "m1", "bob", 1),
        }));

        let actions = session.handle(sign_in("carol", "t9"));
        assert!(actions.contains(&ChatAction::CloseTransport { transport }));
        assert!(actions.iter().any(|a| matches!(a, ChatAction::Dial { .. })));
        assert_eq!(session.rooms().count(), 0);
        assert_eq!(session.user(), Some(&UserId::from("carol")));
        assert_eq!(session.generation(), Generation(1));
    }

    #[test]
    fn rejection_refreshes_then_reconnects() {
        let (mut session, _) = session();
        let transport = dialed(&session.handle(sign_in("alice", "expired")));
        session.handle(ChatEvent::TransportOpened(transport));

        let actions = session.handle(frame(transport, ServerFrame::AuthRejected {
            reason: "expired".into(),
        }));
        assert!(actions.contains(&ChatAction::RefreshToken { generation: Generation(0) }));
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);

        let actions = session.handle(ChatEvent::TokenRefreshed {
            generation: Generation(0),
            result: Ok(BearerToken::new("fresh")),
        });
        let transport = dialed(&actions);
        let actions = session.handle(ChatEvent::TransportOpened(transport));
        assert!(actions.contains(&ChatAction::Send {
            transport,
            frame: ClientFrame::Authenticate { token: BearerToken::new("fresh") },
        }));
    }

    #[test]
    fn second_rejection_forces_sign_out() {
        let (mut session, _) = session();
        let transport = dialed(&session.handle(sign_in("alice", "bad")));
        session.handle(ChatEvent::TransportOpened(transport));
        session.handle(frame(transport, ServerFrame::AuthRejected { reason: "bad".into() }));

        let transport = dialed(&session.handle(ChatEvent::TokenRefreshed {
            generation: Generation(0),
            result: Ok(BearerToken::new("still-bad")),
        }));
        session.handle(ChatEvent::TransportOpened(transport));
        let actions =
            session.handle(frame(transport, ServerFrame::AuthRejected { reason: "bad".into() }));

        assert!(actions.contains(&ChatAction::ForceSignOut));
        assert_eq!(session.user(), None);
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn drop_then_reconnect_refetches_stale_rooms() {
        let (mut session, env, transport, actions) = connected();
        let (generation, request) = rooms_request(&actions);
        session.handle(ChatEvent::RoomsFetched { generation, request, result: Ok(vec![]) });
        session.handle(frame(transport, ServerFrame::MessageSent {
            message: msg("r1", "m1", "bob", 1),
        }));

        session.handle(ChatEvent::TransportClosed { transport, reason: "reset".into() });
        assert!(matches!(session.connection_state(), ConnectionState::Reconnecting { .. }));

        env.advance(Duration::from_secs(1));
        let transport = dialed(&session.handle(ChatEvent::Tick));
        session.handle(ChatEvent::TransportOpened(transport));
        let actions = session.handle(frame(transport, ServerFrame::AuthAccepted {
            user_id: UserId::from("alice"),
        }));
        assert!(!actions.iter().any(|a| matches!(a, ChatAction::FetchUnread { .. })));

        let (generation, request) = rooms_request(&actions);
        let m3 = msg("r1", "m3", "bob", 3);
        let actions = session.handle(ChatEvent::RoomsFetched {
            generation,
            request,
            result: Ok(vec![RoomSummary {
                id: RoomId::from("r1"),
                participants: vec![UserId::from("alice"), UserId::from("bob")],
                last_message: Some(LastMessage::from(&m3)),
            }]),
        });
        assert!(session.is_stale(&RoomId::from("r1")));

        let (room_id, request) = actions
            .iter()
            .find_map(|a| match a {
                ChatAction::FetchHistory { room_id, request, .. } => {
                    Some((room_id.clone(), *request))
                },
                _ => None,
            })
            .unwrap();
        session.handle(ChatEvent::HistoryFetched {
            generation,
            room_id,
            request,
            result: Ok(MessageHistory {
                room_id: RoomId::from("r1"),
                messages: vec![msg("r1", "m1", "bob", 1), msg("r1", "m2", "bob", 2), m3],
            }),
        });

        assert!(!session.is_stale(&RoomId::from("r1")));
        assert_eq!(session.messages(&RoomId::from("r1")).len(), 3);
        assert_eq!(session.unread(&RoomId::from("r1")), 3);
    }

    #[test]
    fn failed_unread_fetch_retried_on_next_connection() {
        let (mut session, env, transport, _) = connected();
        session.handle(ChatEvent::UnreadFetched {
            generation: Generation(0),
            result: Err(ApiError::Network("timeout".into())),
        });

        session.handle(ChatEvent::TransportClosed { transport, reason: "reset".into() });
        env.advance(Duration::from_secs(1));
        let transport = dialed(&session.handle(ChatEvent::Tick));
        session.handle(ChatEvent::TransportOpened(transport));
        let actions = session.handle(frame(transport, ServerFrame::AuthAccepted {
            user_id: UserId::from("alice"),
        }));

        assert!(actions.iter().any(|a| matches!(a, ChatAction::FetchUnread { .. })));
    }

    #[test]
    fn read_while_offline_flushed_on_reconnect() {
        let (mut session, env, transport, _) = connected();
        let room = RoomId::from("r1");
        session.handle(frame(transport, ServerFrame::MessageSent {
            message: msg("r1", "m1", "bob", 1),
        }));
        session.handle(ChatEvent::TransportClosed { transport, reason: "reset".into() });

        assert!(session.handle(ChatEvent::MarkRead { room_id: room.clone() }).is_empty());
        assert_eq!(session.unread(&room), 0);

        env.advance(Duration::from_secs(1));
        let transport = dialed(&session.handle(ChatEvent::Tick));
        session.handle(ChatEvent::TransportOpened(transport));
        let actions = session.handle(frame(transport, ServerFrame::AuthAccepted {
            user_id: UserId::from("alice"),
        }));

        assert!(actions.contains(&ChatAction::Send {
            transport,
            frame: ClientFrame::MarkRead { room_id: room, up_to: 1 },
        }));
    }

    #[test]
    fn events_from_stale_transport_ignored() {
        let (mut session, env, old, _) = connected();
        session.handle(ChatEvent::TransportClosed { transport: old, reason: "reset".into() });
        env.advance(Duration::from_secs(1));
        session.handle(ChatEvent::Tick);

        session.handle(frame(old, ServerFrame::MessageSent { message: msg("r1", "m1", "bob", 1) }));
        assert_eq!(session.rooms().count(), 0);
    }
}
