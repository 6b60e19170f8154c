//! Session events and actions.

use showroom_core::TransportId;
use showroom_proto::{
    BearerToken, ClientFrame, MessageHistory, RoomId, RoomSummary, ServerFrame, UnreadCounts,
};

use crate::{api::ApiError, binding::AuthChange, rooms::RequestId};

/// Session epoch. Bumped whenever chat state is cleared, so results of
/// requests issued for a previous identity are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(pub u64);

/// Events the caller feeds into the session.
///
/// The caller is responsible for:
/// - Forwarding auth session changes
/// - Reporting transport lifecycle and received frames
/// - Executing fetches and reporting their results
/// - Forwarding UI commands
/// - Driving time forward via ticks
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// The external auth session changed.
    Auth(AuthChange),

    /// A dialed transport finished opening.
    TransportOpened(TransportId),

    /// A transport dropped or failed to open.
    TransportClosed {
        /// Transport that closed.
        transport: TransportId,
        /// Failure description.
        reason: String,
    },

    /// Frame received on a transport.
    FrameReceived {
        /// Transport the frame arrived on.
        transport: TransportId,
        /// Decoded frame.
        frame: ServerFrame,
    },

    /// Result of [`ChatAction::FetchRooms`].
    RoomsFetched {
        /// Generation the request was issued in.
        generation: Generation,
        /// Request correlation.
        request: RequestId,
        /// Room list or failure.
        result: Result<Vec<RoomSummary>, ApiError>,
    },

    /// Result of [`ChatAction::FetchUnread`].
    UnreadFetched {
        /// Generation the request was issued in.
        generation: Generation,
        /// Unread baseline or failure.
        result: Result<UnreadCounts, ApiError>,
    },

    /// Result of [`ChatAction::FetchHistory`].
    HistoryFetched {
        /// Generation the request was issued in.
        generation: Generation,
        /// Room fetched.
        room_id: RoomId,
        /// Request correlation.
        request: RequestId,
        /// History or failure.
        result: Result<MessageHistory, ApiError>,
    },

    /// Result of [`ChatAction::RefreshToken`].
    TokenRefreshed {
        /// Generation the request was issued in.
        generation: Generation,
        /// Fresh token or failure description.
        result: Result<BearerToken, String>,
    },

    /// User sends a message.
    SendMessage {
        /// Target room.
        room_id: RoomId,
        /// Message text.
        body: String,
    },

    /// User read a room up to its latest message.
    MarkRead {
        /// Room read.
        room_id: RoomId,
    },

    /// User opened a room.
    OpenRoom(RoomId),

    /// User left the open room.
    CloseRoom,

    /// Time tick for deadline processing.
    Tick,
}

/// Actions the session produces for the caller to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatAction {
    /// Open a transport.
    Dial {
        /// Id to tag the transport's events with.
        transport: TransportId,
    },

    /// Send a frame on a transport.
    Send {
        /// Target transport.
        transport: TransportId,
        /// Frame to send.
        frame: ClientFrame,
    },

    /// Release a transport.
    CloseTransport {
        /// Transport to close.
        transport: TransportId,
    },

    /// `GET /chat/rooms`, answered with [`ChatEvent::RoomsFetched`].
    FetchRooms {
        /// Generation to echo back.
        generation: Generation,
        /// Request correlation to echo back.
        request: RequestId,
    },

    /// `GET /chat/unread`, answered with [`ChatEvent::UnreadFetched`].
    FetchUnread {
        /// Generation to echo back.
        generation: Generation,
    },

    /// `GET /chat/rooms/{id}/messages`, answered with
    /// [`ChatEvent::HistoryFetched`].
    FetchHistory {
        /// Generation to echo back.
        generation: Generation,
        /// Room to fetch.
        room_id: RoomId,
        /// Request correlation to echo back.
        request: RequestId,
    },

    /// Ask the auth session for a fresh token, answered with
    /// [`ChatEvent::TokenRefreshed`].
    RefreshToken {
        /// Generation to echo back.
        generation: Generation,
    },

    /// Tell the auth session to sign the user out.
    ForceSignOut,
}
