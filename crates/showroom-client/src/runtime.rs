//! Async runtime
//!
//! Event loop that drives a [`ChatSession`] with real I/O. Uses
//! `tokio::select!` over UI commands, auth changes, results of spawned I/O
//! tasks and the session's next deadline. Every action the session returns is
//! executed here: REST fetches, token refreshes and transports run as spawned
//! tasks that report back through one event channel, so the session itself
//! only ever sees a serialized event stream.

use std::{collections::HashMap, sync::Arc, time::Duration};

use showroom_core::{Environment, SharedToken, TokenSource, TransportId};
use showroom_proto::{RoomId, ServerFrame};
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
};

use crate::{
    api::{ApiError, ChatApi},
    auth::AuthSession,
    binding::AuthChange,
    config::ChatConfig,
    error::ChatError,
    event::{ChatAction, ChatEvent},
    session::ChatSession,
    state::ChatSnapshot,
    transport::{Connector, TransportError},
};

/// UI commands accepted by the runtime.
#[derive(Debug)]
enum Command {
    Event(ChatEvent),
    Shutdown,
}

/// Cloneable handle the UI uses to talk to a running [`Runtime`].
#[derive(Debug, Clone)]
pub struct ChatHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<ChatSnapshot>,
}

impl ChatHandle {
    /// Send a message to a room.
    pub fn send_message(
        &self,
        room_id: RoomId,
        body: impl Into<String>,
    ) -> Result<(), ChatError> {
        self.event(ChatEvent::SendMessage { room_id, body: body.into() })
    }

    /// Mark a room read up to its latest message.
    pub fn mark_read(&self, room_id: RoomId) -> Result<(), ChatError> {
        self.event(ChatEvent::MarkRead { room_id })
    }

    /// Open a room, loading its history on first open.
    pub fn open_room(&self, room_id: RoomId) -> Result<(), ChatError> {
        self.event(ChatEvent::OpenRoom(room_id))
    }

    /// Leave the open room.
    pub fn close_room(&self) -> Result<(), ChatError> {
        self.event(ChatEvent::CloseRoom)
    }

    /// Stop the runtime, closing the connection.
    pub fn shutdown(&self) -> Result<(), ChatError> {
        self.commands.send(Command::Shutdown).map_err(|_| ChatError::Closed)
    }

    /// Latest published state.
    pub fn snapshot(&self) -> ChatSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified whenever the published state changes.
    pub fn snapshots(&self) -> watch::Receiver<ChatSnapshot> {
        self.snapshots.clone()
    }

    fn event(&self, event: ChatEvent) -> Result<(), ChatError> {
        self.commands.send(Command::Event(event)).map_err(|_| ChatError::Closed)
    }
}

/// One open transport: outbound queue plus the task doing the I/O.
struct Link {
    outbound: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl Drop for Link {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Everything a spawned I/O task needs, cheap to clone.
#[derive(Clone)]
struct Io {
    api: Arc<dyn ChatApi>,
    connector: Arc<dyn Connector>,
    auth: Arc<dyn AuthSession>,
    tokens: SharedToken,
    realtime_url: Option<String>,
    events: mpsc::UnboundedSender<ChatEvent>,
}

/// Async driver of a [`ChatSession`].
pub struct Runtime<E: Environment> {
    env: E,
    session: ChatSession<E>,
    io: Io,
    tick_interval: Duration,
    events: mpsc::UnboundedReceiver<ChatEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    snapshots: watch::Sender<ChatSnapshot>,
    links: HashMap<TransportId, Link>,
}

impl<E: Environment> Runtime<E> {
    /// Build a runtime and the handle controlling it.
    pub fn new(
        env: E,
        config: &ChatConfig,
        api: Arc<dyn ChatApi>,
        connector: Arc<dyn Connector>,
        auth: Arc<dyn AuthSession>,
    ) -> (Self, ChatHandle) {
        let session = ChatSession::new(env.clone(), config);
        let (events_tx, events) = mpsc::unbounded_channel();
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (snapshots, snapshots_rx) = watch::channel(session.snapshot());

        let io = Io {
            api,
            connector,
            auth,
            tokens: session.token_source(),
            realtime_url: config.realtime_url.clone(),
            events: events_tx,
        };

        let runtime = Self {
            env,
            session,
            io,
            tick_interval: config.tick_interval,
            events,
            commands,
            snapshots,
            links: HashMap::new(),
        };
        (runtime, ChatHandle { commands: commands_tx, snapshots: snapshots_rx })
    }

    /// Run until [`ChatHandle::shutdown`] or until every handle is dropped.
    pub async fn run(mut self) {
        let mut auth_changes = self.io.auth.changes();
        let mut auth_open = true;

        if let Some(change) = self.io.auth.current() {
            self.dispatch(ChatEvent::Auth(change));
        }

        loop {
            let wait = self.next_wait();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Event(event)) => self.dispatch(event),
                    Some(Command::Shutdown) | None => break,
                },

                Some(event) = self.events.recv() => self.dispatch(event),

                change = auth_changes.recv(), if auth_open => match change {
                    Ok(change) => self.dispatch(ChatEvent::Auth(change)),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "auth changes lagged, resyncing");
                        let change = self.io.auth.current().unwrap_or(AuthChange::SignedOut);
                        self.dispatch(ChatEvent::Auth(change));
                    },
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!("auth session closed its change stream");
                        auth_open = false;
                    },
                },

                () = self.env.sleep(wait) => self.dispatch(ChatEvent::Tick),
            }
        }

        let actions = self.session.shutdown();
        self.execute(actions);
        self.links.clear();
        self.publish();
        tracing::info!("chat runtime stopped");
    }

    fn next_wait(&self) -> Duration {
        let now = self.env.now();
        match self.session.next_deadline() {
            Some(deadline) if deadline > now => (deadline - now).min(self.tick_interval),
            Some(_) => Duration::ZERO,
            None => self.tick_interval,
        }
    }

    fn dispatch(&mut self, event: ChatEvent) {
        let actions = self.session.handle(event);
        self.execute(actions);
        self.publish();
    }

    fn publish(&self) {
        let snapshot = self.session.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }

    fn execute(&mut self, actions: Vec<ChatAction>) {
        for action in actions {
            match action {
                ChatAction::Dial { transport } => {
                    let (outbound, outbound_rx) = mpsc::unbounded_channel();
                    let task = tokio::spawn(run_link(self.io.clone(), transport, outbound_rx));
                    self.links.insert(transport, Link { outbound, task });
                },
                ChatAction::Send { transport, frame } => {
                    let Some(link) = self.links.get(&transport) else {
                        tracing::debug!(?transport, "send on released transport");
                        continue;
                    };
                    match frame.encode() {
                        Ok(text) => {
                            if link.outbound.send(text).is_err() {
                                tracing::debug!(?transport, "transport task already gone");
                            }
                        },
                        Err(e) => tracing::warn!(error = %ChatError::from(e), "dropping frame"),
                    }
                },
                ChatAction::CloseTransport { transport } => {
                    self.links.remove(&transport);
                },
                ChatAction::FetchRooms { generation, request } => {
                    let io = self.io.clone();
                    tokio::spawn(async move {
                        let result = match io.tokens.current_token() {
                            Some(token) => io.api.fetch_rooms(&token).await,
                            None => Err(ApiError::Unauthorized),
                        };
                        let _ = io.events.send(ChatEvent::RoomsFetched { generation, request, result });
                    });
                },
                ChatAction::FetchUnread { generation } => {
                    let io = self.io.clone();
                    tokio::spawn(async move {
                        let result = match io.tokens.current_token() {
                            Some(token) => io.api.fetch_unread(&token).await,
                            None => Err(ApiError::Unauthorized),
                        };
                        let _ = io.events.send(ChatEvent::UnreadFetched { generation, result });
                    });
                },
                ChatAction::FetchHistory { generation, room_id, request } => {
                    let io = self.io.clone();
                    tokio::spawn(async move {
                        let result = match io.tokens.current_token() {
                            Some(token) => io.api.fetch_history(&token, &room_id).await,
                            None => Err(ApiError::Unauthorized),
                        };
                        let _ = io.events.send(ChatEvent::HistoryFetched {
                            generation,
                            room_id,
                            request,
                            result,
                        });
                    });
                },
                ChatAction::RefreshToken { generation } => {
                    let io = self.io.clone();
                    tokio::spawn(async move {
                        let result = io.auth.refresh().await;
                        let _ = io.events.send(ChatEvent::TokenRefreshed { generation, result });
                    });
                },
                ChatAction::ForceSignOut => {
                    let io = self.io.clone();
                    tokio::spawn(async move { io.auth.force_sign_out().await });
                },
            }
        }
    }
}

impl<E: Environment> std::fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("session", &self.session)
            .field("links", &self.links.len())
            .finish_non_exhaustive()
    }
}

/// Connect, then shuttle frames until the transport ends or the link is
/// dropped.
async fn run_link(io: Io, transport: TransportId, mut outbound: mpsc::UnboundedReceiver<String>) {
    let reason = match drive_link(&io, transport, &mut outbound).await {
        Ok(()) => TransportError::Closed.to_string(),
        Err(e) => e.to_string(),
    };
    let _ = io.events.send(ChatEvent::TransportClosed { transport, reason });
}

async fn drive_link(
    io: &Io,
    transport: TransportId,
    outbound: &mut mpsc::UnboundedReceiver<String>,
) -> Result<(), ChatError> {
    let url = match &io.realtime_url {
        Some(url) => url.clone(),
        None => {
            let token = io.tokens.current_token().ok_or(ChatError::Connection(
                showroom_core::ConnectionError::MissingToken,
            ))?;
            io.api.realtime_url(&token).await?
        },
    };

    tracing::debug!(?transport, %url, "dialing");
    let mut conn = io.connector.connect(&url).await?;
    io.events.send(ChatEvent::TransportOpened(transport)).map_err(|_| ChatError::Closed)?;

    loop {
        tokio::select! {
            text = outbound.recv() => {
                let Some(text) = text else { return Ok(()) };
                conn.to_server.send(text).map_err(|_| TransportError::Closed)?;
            },

            inbound = conn.from_server.recv() => match inbound {
                Some(Ok(text)) => match ServerFrame::decode(&text) {
                    Ok(frame) => {
                        io.events
                            .send(ChatEvent::FrameReceived { transport, frame })
                            .map_err(|_| ChatError::Closed)?;
                    },
                    Err(e) => tracing::warn!(error = %e, "dropping undecodable frame"),
                },
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(()),
            },
        }
    }
}
