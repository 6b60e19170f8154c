//! Room and message synchronizer.
//!
//! Exclusive owner of the room list and each room's message list. Merges the
//! REST baseline, real-time events, optimistic local sends and history
//! re-fetches into one consistent, server-ordered view.
//!
//! # Invariants
//!
//! - Within a room, message ids are unique.
//! - Confirmed messages appear in ascending server sequence order. Pending
//!   and failed local sends keep the position they were appended at.
//! - A pending send is never dropped: it becomes `Sent` (replacing the
//!   temporary entry) or `Failed`.
//! - The room list is ordered by last activity, most recent first.
//!
//! # Stale rooms
//!
//! When a baseline reports a newer last message than a room with local
//! history knows about, messages were missed while offline. The room is
//! flagged stale and its history re-fetched in full. Real-time events for the
//! room are buffered meanwhile and replayed, in arrival order, once the
//! history is merged. A buffer that outgrows its cap is discarded and the
//! fetch re-issued under a new request id; the older response is ignored.

use std::{
    cmp::Reverse,
    collections::BTreeMap,
    time::Duration,
};

use showroom_core::{Backoff, BackoffConfig, Environment, Observers, SubscriptionId};
use showroom_proto::{
    ClientFrame, LastMessage, MessageId, RoomId, RoomSummary, ServerFrame, ServerMessage, UserId,
};

use crate::{
    error::ChatError,
    state::{ChatMessage, DeliveryStatus, FailureReason},
};

/// Default time to wait for a send confirmation.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Default cap on buffered events per stale room.
pub const DEFAULT_BUFFER_CAP: usize = 256;

/// Correlates a REST fetch with its result. Results carrying any other id
/// than the latest issued for that resource are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

/// Synchronizer tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Time to wait for a send confirmation before marking it failed.
    pub ack_timeout: Duration,
    /// Events buffered per stale room before the buffer is discarded.
    pub buffer_cap: usize,
    /// Backoff for failed room-list and history fetches.
    pub refetch_backoff: BackoffConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            buffer_cap: DEFAULT_BUFFER_CAP,
            refetch_backoff: BackoffConfig {
                initial: Duration::from_secs(1),
                ..BackoffConfig::default()
            },
        }
    }
}

/// Actions returned by the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// Fetch the room list baseline.
    FetchRooms {
        /// Correlation for the result.
        request: RequestId,
    },
    /// Fetch a room's full history.
    FetchHistory {
        /// Room to fetch.
        room_id: RoomId,
        /// Correlation for the result.
        request: RequestId,
    },
    /// Send a frame on the live transport.
    Send(ClientFrame),
    /// A confirmed message was newly added to a room.
    Applied {
        /// Room the message landed in.
        room_id: RoomId,
        /// Author.
        sender: UserId,
        /// Server sequence number.
        seq: u64,
    },
}

/// Notification sent to room observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomChange {
    /// A room was created or its messages or summary changed.
    Updated(RoomId),
    /// All rooms were discarded (sign-out).
    Cleared,
}

/// One room and its messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    id: RoomId,
    participants: Vec<UserId>,
    last_message: Option<LastMessage>,
    last_activity: u64,
    messages: Vec<ChatMessage>,
    history_loaded: bool,
}

impl Room {
    fn new(id: RoomId) -> Self {
        Self {
            id,
            participants: Vec::new(),
            last_message: None,
            last_activity: 0,
            messages: Vec::new(),
            history_loaded: false,
        }
    }

    /// Room id.
    pub fn id(&self) -> &RoomId {
        &self.id
    }

    /// Participants in server order.
    pub fn participants(&self) -> &[UserId] {
        &self.participants
    }

    /// Last confirmed message summary.
    pub fn last_message(&self) -> Option<&LastMessage> {
        self.last_message.as_ref()
    }

    /// Timestamp used to order the room list (unix millis).
    pub fn last_activity(&self) -> u64 {
        self.last_activity
    }

    /// Messages in display order.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Whether the full history has been merged at least once.
    pub fn history_loaded(&self) -> bool {
        self.history_loaded
    }

    /// Highest known server sequence number in the room.
    pub fn latest_seq(&self) -> Option<u64> {
        let local = self.messages.iter().filter_map(|m| m.seq).max();
        let summary = self.last_message.as_ref().map(|l| l.seq);
        local.max(summary)
    }

    fn contains(&self, id: &MessageId) -> bool {
        self.messages.iter().any(|m| &m.id == id)
    }

    fn insert_confirmed(&mut self, message: &ServerMessage) {
        let index = insertion_index(&self.messages, message.seq);
        self.messages.insert(index, ChatMessage::confirmed(message));
        self.record_activity(message);
    }

    fn record_activity(&mut self, message: &ServerMessage) {
        let summary = LastMessage::from(message);
        if self.last_message.as_ref().is_none_or(|last| summary.is_newer_than(last)) {
            self.last_message = Some(summary);
        }
        self.last_activity = self.last_activity.max(message.created_at);
    }
}

/// Index at which a confirmed message with `seq` belongs: before the first
/// confirmed message with a greater sequence number, else at the end.
fn insertion_index(messages: &[ChatMessage], seq: u64) -> usize {
    messages.iter().position(|m| m.seq.is_some_and(|s| s > seq)).unwrap_or(messages.len())
}

/// Whether the confirmed message at `index` sits between its confirmed
/// neighbours in sequence order.
fn in_server_order(messages: &[ChatMessage], index: usize) -> bool {
    let Some(seq) = messages[index].seq else {
        return true;
    };
    let before = messages[..index].iter().rev().find_map(|m| m.seq);
    let after = messages[index + 1..].iter().find_map(|m| m.seq);
    before.is_none_or(|b| b < seq) && after.is_none_or(|a| a > seq)
}

#[derive(Debug)]
struct HistoryFetch<I> {
    request: RequestId,
    stale: bool,
    in_flight: bool,
    retry_at: Option<I>,
    backoff: Backoff,
    buffer: Vec<ServerFrame>,
}

/// Room/message synchronizer.
pub struct RoomSync<E: Environment> {
    env: E,
    config: SyncConfig,
    rooms: BTreeMap<RoomId, Room>,
    order: Vec<RoomId>,
    fetches: BTreeMap<RoomId, HistoryFetch<E::Instant>>,
    acks: BTreeMap<MessageId, (RoomId, E::Instant)>,
    rooms_request: Option<RequestId>,
    rooms_retry_at: Option<E::Instant>,
    rooms_backoff: Backoff,
    established_marks: BTreeMap<RoomId, Option<LastMessage>>,
    next_request: u64,
    observers: Observers<RoomChange>,
}

impl<E: Environment> RoomSync<E> {
    /// Empty synchronizer.
    pub fn new(env: E, config: SyncConfig) -> Self {
        let rooms_backoff = Backoff::new(config.refetch_backoff.clone());
        Self {
            env,
            config,
            rooms: BTreeMap::new(),
            order: Vec::new(),
            fetches: BTreeMap::new(),
            acks: BTreeMap::new(),
            rooms_request: None,
            rooms_retry_at: None,
            rooms_backoff,
            established_marks: BTreeMap::new(),
            next_request: 0,
            observers: Observers::new(),
        }
    }

    /// Rooms, most recently active first.
    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.order.iter().filter_map(|id| self.rooms.get(id))
    }

    /// Room by id.
    pub fn room(&self, room_id: &RoomId) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    /// Messages of a room in display order (empty for unknown rooms).
    pub fn messages(&self, room_id: &RoomId) -> &[ChatMessage] {
        self.rooms.get(room_id).map(Room::messages).unwrap_or_default()
    }

    /// Highest known server sequence number in a room.
    pub fn latest_seq(&self, room_id: &RoomId) -> Option<u64> {
        self.rooms.get(room_id).and_then(Room::latest_seq)
    }

    /// Whether a room's history is being re-fetched after missed messages.
    pub fn is_stale(&self, room_id: &RoomId) -> bool {
        self.fetches.get(room_id).is_some_and(|f| f.stale)
    }

    /// Earliest pending deadline (ack timeout or fetch retry).
    pub fn next_deadline(&self) -> Option<E::Instant> {
        let acks = self.acks.values().map(|(_, at)| *at);
        let fetches = self.fetches.values().filter_map(|f| f.retry_at);
        acks.chain(fetches).chain(self.rooms_retry_at).min()
    }

    /// Observe room changes.
    pub fn subscribe(&mut self, callback: impl FnMut(&RoomChange) + Send + 'static) -> SubscriptionId {
        self.observers.subscribe(callback)
    }

    /// Stop observing.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// The connection was (re-)established: fetch the room-list baseline.
    ///
    /// Each room's last message is remembered so the baseline is compared
    /// against what the room held when the connection came up, not against
    /// live events that land before the baseline does.
    pub fn on_established(&mut self) -> Vec<SyncAction> {
        self.established_marks =
            self.rooms.iter().map(|(id, room)| (id.clone(), room.last_message.clone())).collect();
        vec![self.request_rooms()]
    }

    /// Merge a room-list baseline.
    ///
    /// Rooms known locally but absent from the baseline are kept.
    pub fn rooms_fetched(
        &mut self,
        request: RequestId,
        result: Result<Vec<RoomSummary>, String>,
    ) -> Vec<SyncAction> {
        if self.rooms_request != Some(request) {
            tracing::debug!(?request, "ignoring superseded room list");
            return Vec::new();
        }
        self.rooms_request = None;

        match result {
            Ok(summaries) => {
                self.rooms_backoff.reset();
                tracing::debug!(rooms = summaries.len(), "room list baseline");
                let actions =
                    summaries.into_iter().flat_map(|s| self.merge_summary(s, true)).collect();
                self.established_marks.clear();
                actions
            },
            Err(reason) => {
                let delay = self.rooms_backoff.next_delay(&self.env);
                self.rooms_retry_at = Some(self.env.now() + delay);
                tracing::warn!(%reason, ?delay, "room list fetch failed, retrying");
                Vec::new()
            },
        }
    }

    /// Merge a room's full history.
    pub fn history_fetched(
        &mut self,
        room_id: &RoomId,
        request: RequestId,
        result: Result<Vec<ServerMessage>, String>,
    ) -> Vec<SyncAction> {
        let Some(fetch) = self.fetches.get_mut(room_id) else {
            tracing::debug!(%room_id, "ignoring unsolicited history");
            return Vec::new();
        };
        if fetch.request != request || !fetch.in_flight {
            tracing::debug!(%room_id, ?request, "ignoring superseded history");
            return Vec::new();
        }

        let messages = match result {
            Ok(messages) => messages,
            Err(reason) => {
                fetch.in_flight = false;
                let delay = fetch.backoff.next_delay(&self.env);
                fetch.retry_at = Some(self.env.now() + delay);
                if fetch.stale {
                    let error = ChatError::StaleRoomFetchFailed { room_id: room_id.clone(), reason };
                    tracing::warn!(%error, ?delay, buffered = fetch.buffer.len(), "retrying");
                } else {
                    tracing::warn!(%room_id, %reason, ?delay, "history fetch failed, retrying");
                }
                return Vec::new();
            },
        };

        let Some(fetch) = self.fetches.remove(room_id) else {
            return Vec::new();
        };

        let mut actions = Vec::new();
        for message in messages.iter().filter(|m| &m.room_id == room_id) {
            // A correlated message settles a send whose ack was lost with the transport.
            let applied = self.apply_incoming(message);
            // Messages missed while offline count as new; an initial load does not.
            if fetch.stale {
                actions.extend(applied);
            }
        }

        let room = self.ensure_room(room_id);
        room.history_loaded = true;
        self.observers.notify(&RoomChange::Updated(room_id.clone()));
        tracing::debug!(%room_id, merged = messages.len(), replay = fetch.buffer.len(), "history merged");

        for frame in fetch.buffer {
            actions.extend(self.handle_frame(&frame));
        }
        actions
    }

    /// Apply a real-time event.
    pub fn handle_frame(&mut self, frame: &ServerFrame) -> Vec<SyncAction> {
        match frame {
            ServerFrame::MessageSent { message } | ServerFrame::MessageDelivered { message } => {
                if self.is_stale(&message.room_id) {
                    return self.buffer(&message.room_id, frame);
                }
                self.apply_incoming(message)
            },
            ServerFrame::MessageFailed { room_id, correlation, reason } => {
                let error = ChatError::SendRejected {
                    room_id: room_id.clone(),
                    correlation: correlation.clone(),
                    reason: reason.clone(),
                };
                tracing::warn!(%error, "send failed");
                self.fail_pending(room_id, correlation, FailureReason::Rejected(reason.clone()));
                Vec::new()
            },
            ServerFrame::RoomUpdated { room } => {
                if self.is_stale(&room.id) {
                    return self.buffer(&room.id, frame);
                }
                self.merge_summary(room.clone(), false)
            },
            ServerFrame::AuthAccepted { .. } | ServerFrame::AuthRejected { .. } | ServerFrame::Pong => {
                Vec::new()
            },
        }
    }

    /// Append an optimistic send.
    ///
    /// Returns the temporary id, or `None` for an empty body. While
    /// disconnected the entry is recorded as failed immediately.
    pub fn send(
        &mut self,
        room_id: &RoomId,
        body: &str,
        sender: &UserId,
        connected: bool,
    ) -> (Option<MessageId>, Vec<SyncAction>) {
        if body.trim().is_empty() {
            return (None, Vec::new());
        }

        let correlation = MessageId::new(format!("tmp-{:016x}", self.env.random_u64()));
        let created_at = self.env.wall_clock_millis();
        let status = if connected {
            DeliveryStatus::Pending
        } else {
            DeliveryStatus::Failed(FailureReason::NotConnected)
        };

        let room = self.ensure_room(room_id);
        room.messages.push(ChatMessage {
            id: correlation.clone(),
            room_id: room_id.clone(),
            sender: sender.clone(),
            body: body.to_owned(),
            created_at,
            seq: None,
            status,
        });
        room.last_activity = room.last_activity.max(created_at);
        self.touch(room_id);
        self.observers.notify(&RoomChange::Updated(room_id.clone()));

        if !connected {
            tracing::warn!(error = %ChatError::NotConnected, %room_id, "send failed");
            return (Some(correlation), Vec::new());
        }

        let deadline = self.env.now() + self.config.ack_timeout;
        self.acks.insert(correlation.clone(), (room_id.clone(), deadline));

        let frame = ClientFrame::SendMessage {
            room_id: room_id.clone(),
            body: body.to_owned(),
            correlation: correlation.clone(),
        };
        (Some(correlation), vec![SyncAction::Send(frame)])
    }

    /// The UI opened a room: load its history if it never was.
    pub fn open_room(&mut self, room_id: &RoomId) -> Vec<SyncAction> {
        let created = !self.rooms.contains_key(room_id);
        let room = self.ensure_room(room_id);
        let loaded = room.history_loaded;
        if created {
            self.observers.notify(&RoomChange::Updated(room_id.clone()));
        }
        if loaded || self.fetches.contains_key(room_id) {
            return Vec::new();
        }

        let request = self.next_request_id();
        self.fetches.insert(room_id.clone(), HistoryFetch {
            request,
            stale: false,
            in_flight: true,
            retry_at: None,
            backoff: Backoff::new(self.config.refetch_backoff.clone()),
            buffer: Vec::new(),
        });
        vec![SyncAction::FetchHistory { room_id: room_id.clone(), request }]
    }

    /// Fire expired ack timeouts and fetch retries.
    pub fn tick(&mut self) -> Vec<SyncAction> {
        let now = self.env.now();
        let mut actions = Vec::new();

        let expired: Vec<(MessageId, RoomId)> = self
            .acks
            .iter()
            .filter(|(_, (_, at))| *at <= now)
            .map(|(id, (room, _))| (id.clone(), room.clone()))
            .collect();
        for (correlation, room_id) in expired {
            let error = ChatError::SendTimeout {
                room_id: room_id.clone(),
                correlation: correlation.clone(),
            };
            tracing::warn!(%error, "send failed");
            self.fail_pending(&room_id, &correlation, FailureReason::Timeout);
        }

        if self.rooms_retry_at.is_some_and(|at| at <= now) {
            actions.push(self.request_rooms());
        }

        for (room_id, fetch) in &mut self.fetches {
            if !fetch.in_flight && fetch.retry_at.is_some_and(|at| at <= now) {
                let request = RequestId(self.next_request);
                self.next_request += 1;
                fetch.request = request;
                fetch.in_flight = true;
                fetch.retry_at = None;
                actions.push(SyncAction::FetchHistory { room_id: room_id.clone(), request });
            }
        }

        actions
    }

    /// Discard everything (sign-out or identity change).
    pub fn clear(&mut self) {
        self.rooms.clear();
        self.order.clear();
        self.fetches.clear();
        self.acks.clear();
        self.rooms_request = None;
        self.rooms_retry_at = None;
        self.rooms_backoff.reset();
        self.established_marks.clear();
        self.observers.notify(&RoomChange::Cleared);
    }

    fn request_rooms(&mut self) -> SyncAction {
        let request = self.next_request_id();
        self.rooms_request = Some(request);
        self.rooms_retry_at = None;
        SyncAction::FetchRooms { request }
    }

    fn next_request_id(&mut self) -> RequestId {
        let id = RequestId(self.next_request);
        self.next_request += 1;
        id
    }

    fn ensure_room(&mut self, room_id: &RoomId) -> &mut Room {
        self.rooms.entry(room_id.clone()).or_insert_with(|| {
            self.order.push(room_id.clone());
            Room::new(room_id.clone())
        })
    }

    /// Move a room to the front, then restore activity order. The sort is
    /// stable, so the touched room leads among equal timestamps.
    fn touch(&mut self, room_id: &RoomId) {
        if let Some(index) = self.order.iter().position(|id| id == room_id) {
            let id = self.order.remove(index);
            self.order.insert(0, id);
        }
        let rooms = &self.rooms;
        self.order.sort_by_key(|id| Reverse(rooms.get(id).map_or(0, Room::last_activity)));
    }

    fn merge_summary(&mut self, summary: RoomSummary, baseline: bool) -> Vec<SyncAction> {
        let room_id = summary.id.clone();
        let fetching = self.fetches.contains_key(&room_id);
        let mark = if baseline { self.established_marks.get(&room_id).cloned() } else { None };
        let room = self.ensure_room(&room_id);
        room.participants = summary.participants;

        let mut missed = false;
        if let Some(server_last) = summary.last_message {
            // A fetch in flight may predate the missed messages.
            let seen = mark.unwrap_or_else(|| room.last_message.clone());
            if seen.as_ref().is_none_or(|local| server_last.is_newer_than(local)) {
                missed = !room.messages.is_empty() || room.history_loaded || fetching;
            }
            if room.last_message.as_ref().is_none_or(|local| server_last.is_newer_than(local)) {
                room.last_activity = room.last_activity.max(server_last.created_at);
                room.last_message = Some(server_last);
                self.touch(&room_id);
            }
        }
        self.observers.notify(&RoomChange::Updated(room_id.clone()));

        if missed { self.mark_stale(&room_id) } else { Vec::new() }
    }

    fn mark_stale(&mut self, room_id: &RoomId) -> Vec<SyncAction> {
        let request = self.next_request_id();
        let backoff = self.config.refetch_backoff.clone();
        let fetch = self.fetches.entry(room_id.clone()).or_insert_with(|| HistoryFetch {
            request,
            stale: true,
            in_flight: true,
            retry_at: None,
            backoff: Backoff::new(backoff),
            buffer: Vec::new(),
        });
        fetch.request = request;
        fetch.stale = true;
        fetch.in_flight = true;
        fetch.retry_at = None;

        tracing::debug!(%room_id, ?request, "room stale, re-fetching history");
        self.observers.notify(&RoomChange::Updated(room_id.clone()));
        vec![SyncAction::FetchHistory { room_id: room_id.clone(), request }]
    }

    fn buffer(&mut self, room_id: &RoomId, frame: &ServerFrame) -> Vec<SyncAction> {
        let cap = self.config.buffer_cap;
        let Some(fetch) = self.fetches.get_mut(room_id) else {
            return Vec::new();
        };
        if fetch.buffer.len() >= cap {
            tracing::warn!(%room_id, cap, "stale buffer overflow, restarting history fetch");
            fetch.buffer.clear();
            return self.mark_stale(room_id);
        }
        fetch.buffer.push(frame.clone());
        Vec::new()
    }

    fn apply_incoming(&mut self, message: &ServerMessage) -> Vec<SyncAction> {
        if let Some(correlation) = &message.correlation
            && let Some(index) = self
                .rooms
                .get(&message.room_id)
                .and_then(|r| r.messages.iter().position(|m| &m.id == correlation))
        {
            return self.confirm(index, correlation, message);
        }
        self.apply_confirmed(message).into_iter().collect()
    }

    /// Replace the optimistic entry at `index` with its confirmed message.
    fn confirm(
        &mut self,
        index: usize,
        correlation: &MessageId,
        message: &ServerMessage,
    ) -> Vec<SyncAction> {
        self.acks.remove(correlation);
        let room_id = message.room_id.clone();
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return Vec::new();
        };

        if let DeliveryStatus::Failed(reason) = &room.messages[index].status {
            tracing::debug!(%correlation, ?reason, "late confirmation for failed send");
            return self.apply_confirmed(message).into_iter().collect();
        }

        if room.contains(&message.id) {
            room.messages.remove(index);
            self.observers.notify(&RoomChange::Updated(room_id));
            return Vec::new();
        }

        room.messages[index] = ChatMessage::confirmed(message);
        if !in_server_order(&room.messages, index) {
            let entry = room.messages.remove(index);
            let target = insertion_index(&room.messages, message.seq);
            room.messages.insert(target, entry);
        }
        room.record_activity(message);

        self.touch(&room_id);
        self.observers.notify(&RoomChange::Updated(room_id.clone()));
        vec![SyncAction::Applied { room_id, sender: message.sender.clone(), seq: message.seq }]
    }

    fn apply_confirmed(&mut self, message: &ServerMessage) -> Option<SyncAction> {
        let room_id = message.room_id.clone();
        let room = self.ensure_room(&room_id);
        if room.contains(&message.id) {
            return None;
        }
        room.insert_confirmed(message);

        self.touch(&room_id);
        self.observers.notify(&RoomChange::Updated(room_id.clone()));
        Some(SyncAction::Applied { room_id, sender: message.sender.clone(), seq: message.seq })
    }

    fn fail_pending(&mut self, room_id: &RoomId, correlation: &MessageId, reason: FailureReason) {
        self.acks.remove(correlation);
        let Some(room) = self.rooms.get_mut(room_id) else {
            return;
        };
        if let Some(entry) = room.messages.iter_mut().find(|m| &m.id == correlation && m.is_pending())
        {
            entry.status = DeliveryStatus::Failed(reason);
            self.observers.notify(&RoomChange::Updated(room_id.clone()));
        }
    }
}

impl<E: Environment> std::fmt::Debug for RoomSync<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomSync")
            .field("rooms", &self.rooms.len())
            .field("stale", &self.fetches.values().filter(|f| f.stale).count())
            .field("pending_acks", &self.acks.len())
            .finish_non_exhaustive()
    }
}
